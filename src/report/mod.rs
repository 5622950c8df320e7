//! Score report inspection.
//!
//! - [`validator`]: decides whether a report artifact contains a usable scored entry.
//! - [`completion`]: tracks which checklist metrics already have valid reports.

pub mod completion;
pub mod validator;

pub use completion::{
    aggregate_complete, aggregate_log_path, aggregate_report_path, classify_metric_report,
    completed_metrics, metric_log_path, metric_report_path, missing_metrics,
    remove_stale_aggregate_artifacts, remove_stale_metric_artifacts, report_file_stem,
    MetricReportState,
};
pub use validator::{
    is_scored_entry, is_valid_report, ReportInspection, ReportMode, ReportValidator, ScoreEntry,
};

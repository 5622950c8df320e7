//! Completion tracking over a job's report directory.
//!
//! Two layouts are supported:
//!
//! - **Aggregate**: one `round{N}.jsonl` file per job per round, judged valid or not
//!   as a whole by the [`ReportValidator`].
//! - **Per-metric**: one `{metric}.json` file per metric. A file counts as completed
//!   iff it is non-empty, parses as a single JSON value, and that value is a non-empty
//!   object with a `score` key.
//!
//! Scanning the per-metric layout is self-healing: files that fail strict JSON
//! parsing are deleted so the next retry regenerates them. Files that parse but are
//! unscored (`{}`, `[]`, no `score`) are left in place and reported as such.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use super::validator::ReportValidator;

/// State of one per-metric report file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricReportState {
    /// No report file exists.
    Missing,
    /// Strictly valid, scored report.
    Completed,
    /// Parses as JSON but is empty or carries no `score`.
    Unscored,
    /// Fails strict JSON parsing (including empty files).
    Corrupt,
}

/// Maps a metric name to the file stem used for its report and log.
///
/// Characters that cannot appear in a file name are percent-escaped, and so is `%`
/// itself, so distinct metric names never share a report file.
pub fn report_file_stem(metric: &str) -> String {
    let mut stem = String::with_capacity(metric.len());
    for c in metric.chars() {
        match c {
            '%' => stem.push_str("%25"),
            '/' => stem.push_str("%2F"),
            '\\' => stem.push_str("%5C"),
            '\0' => stem.push_str("%00"),
            other => stem.push(other),
        }
    }
    stem
}

/// Path of the per-metric report for `metric`.
pub fn metric_report_path(report_dir: &Path, metric: &str) -> PathBuf {
    report_dir.join(format!("{}.json", report_file_stem(metric)))
}

/// Path of the raw transport log for `metric`.
pub fn metric_log_path(report_dir: &Path, metric: &str) -> PathBuf {
    report_dir.join(format!("{}.log", report_file_stem(metric)))
}

/// Path of the whole-job aggregate report for `round`.
pub fn aggregate_report_path(report_dir: &Path, round: u32) -> PathBuf {
    report_dir.join(format!("round{}.jsonl", round))
}

/// Path of the raw transport log for the whole-job query of `round`.
pub fn aggregate_log_path(report_dir: &Path, round: u32) -> PathBuf {
    report_dir.join(format!("round{}.log", round))
}

/// Classifies raw per-metric report content without touching the filesystem.
pub fn classify_metric_content(bytes: &[u8]) -> MetricReportState {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return MetricReportState::Corrupt;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) if !map.is_empty() && map.contains_key("score") => {
            MetricReportState::Completed
        }
        Ok(_) => MetricReportState::Unscored,
        Err(_) => MetricReportState::Corrupt,
    }
}

/// Classifies the report file at `path`.
pub fn classify_metric_report(path: &Path) -> MetricReportState {
    match fs::read(path) {
        Ok(bytes) => classify_metric_content(&bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => MetricReportState::Missing,
        Err(_) => MetricReportState::Corrupt,
    }
}

/// Returns the checklist metrics that already have a valid report in `report_dir`.
///
/// Corrupt `*.json` files found during the scan are deleted. Report files that do not
/// belong to any checklist metric are ignored.
pub fn completed_metrics<S: AsRef<str>>(report_dir: &Path, checklist: &[S]) -> BTreeSet<String> {
    let by_stem: BTreeMap<String, &str> = checklist
        .iter()
        .map(|m| (report_file_stem(m.as_ref()), m.as_ref()))
        .collect();

    let mut completed = BTreeSet::new();
    let entries = match fs::read_dir(report_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %report_dir.display(), error = %e, "Report directory not readable");
            return completed;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        match classify_metric_report(&path) {
            MetricReportState::Completed => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if let Some(name) = by_stem.get(&stem) {
                    completed.insert((*name).to_string());
                }
            }
            MetricReportState::Corrupt => {
                warn!(path = %path.display(), "Deleting corrupt metric report");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to delete corrupt report");
                }
            }
            MetricReportState::Unscored => {
                debug!(path = %path.display(), "Metric report has no score");
            }
            MetricReportState::Missing => {}
        }
    }

    completed
}

/// Returns the checklist metrics without a valid report, in checklist order.
pub fn missing_metrics<S: AsRef<str>>(report_dir: &Path, checklist: &[S]) -> Vec<String> {
    let done = completed_metrics(report_dir, checklist);
    checklist
        .iter()
        .map(|m| m.as_ref())
        .filter(|m| !done.contains(*m))
        .map(str::to_string)
        .collect()
}

/// Returns true if the aggregate report for `round` exists and validates with at
/// least `min_segments` objects on the segmentation path.
pub fn aggregate_complete(report_dir: &Path, round: u32, min_segments: usize) -> bool {
    match fs::read(aggregate_report_path(report_dir, round)) {
        Ok(bytes) => ReportValidator::with_min_segments(min_segments).is_valid(&bytes),
        Err(_) => false,
    }
}

/// Removes the report and log of a metric that is about to be retried.
///
/// A report that is already complete is never removed.
pub fn remove_stale_metric_artifacts(report_dir: &Path, metric: &str) -> io::Result<Vec<PathBuf>> {
    let report = metric_report_path(report_dir, metric);
    if classify_metric_report(&report) == MetricReportState::Completed {
        return Ok(Vec::new());
    }
    remove_existing(&[report, metric_log_path(report_dir, metric)])
}

/// Removes an invalid aggregate report and its log before a whole-job retry.
pub fn remove_stale_aggregate_artifacts(
    report_dir: &Path,
    round: u32,
    min_segments: usize,
) -> io::Result<Vec<PathBuf>> {
    if aggregate_complete(report_dir, round, min_segments) {
        return Ok(Vec::new());
    }
    remove_existing(&[
        aggregate_report_path(report_dir, round),
        aggregate_log_path(report_dir, round),
    ])
}

fn remove_existing(paths: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => removed.push(path.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::validator::WHOLE_JOB_MIN_SEGMENTS;
    use tempfile::TempDir;

    fn checklist(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_classify_metric_content() {
        assert_eq!(
            classify_metric_content(br#"{"metric": "a", "score": 1}"#),
            MetricReportState::Completed
        );
        assert_eq!(classify_metric_content(b"{}"), MetricReportState::Unscored);
        assert_eq!(classify_metric_content(b"[]"), MetricReportState::Unscored);
        assert_eq!(
            classify_metric_content(br#"{"metric": "a"}"#),
            MetricReportState::Unscored
        );
        assert_eq!(
            classify_metric_content(br#"[{"score": 1}]"#),
            MetricReportState::Unscored
        );
        assert_eq!(classify_metric_content(b""), MetricReportState::Corrupt);
        assert_eq!(classify_metric_content(b"  \n"), MetricReportState::Corrupt);
        assert_eq!(
            classify_metric_content(br#"{"score": 1}{"score": 2}"#),
            MetricReportState::Corrupt
        );
    }

    #[test]
    fn test_three_of_five_completed() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let names = checklist(&["m1", "m2", "m3", "m4", "m5"]);
        for m in ["m1", "m3", "m5"] {
            write(dir, &format!("{}.json", m), &format!(r#"{{"metric":"{}","score":1}}"#, m));
        }

        let done = completed_metrics(dir, &names);
        assert_eq!(done, ["m1", "m3", "m5"].iter().map(|s| s.to_string()).collect());
        assert_eq!(missing_metrics(dir, &names), vec!["m2", "m4"]);
    }

    #[test]
    fn test_completed_metrics_idempotent() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let names = checklist(&["a", "b", "c"]);
        write(dir, "a.json", r#"{"score": 2}"#);
        write(dir, "b.json", "{}");
        write(dir, "c.json", "{broken");

        let first = completed_metrics(dir, &names);
        let second = completed_metrics(dir, &names);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_corrupt_deleted_unscored_kept() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let names = checklist(&["a", "b", "c"]);
        let corrupt = write(dir, "a.json", "{\"score\": ");
        let empty = write(dir, "b.json", "");
        let unscored = write(dir, "c.json", r#"{"metric": "c"}"#);

        let done = completed_metrics(dir, &names);
        assert!(done.is_empty());
        assert!(!corrupt.exists());
        assert!(!empty.exists());
        assert!(unscored.exists());
    }

    #[test]
    fn test_unknown_reports_ignored() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "other.json", r#"{"score": 1}"#);
        write(dir, "a.log", "raw response");
        let done = completed_metrics(dir, &checklist(&["a"]));
        assert!(done.is_empty());
    }

    #[test]
    fn test_missing_dir_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(completed_metrics(&missing, &checklist(&["a"])).is_empty());
        assert_eq!(missing_metrics(&missing, &checklist(&["a"])), vec!["a"]);
    }

    #[test]
    fn test_metric_names_with_separators() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let names = checklist(&["2.1 input/output handling"]);
        let path = metric_report_path(dir, &names[0]);
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "2.1 input%2Foutput handling.json"
        );
        fs::write(&path, r#"{"score": 0}"#).unwrap();
        assert!(completed_metrics(dir, &names).contains("2.1 input/output handling"));
    }

    #[test]
    fn test_similar_metric_names_get_distinct_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        let names = checklist(&["io/a", "io_a", "io%2Fa", "io\\a"]);
        let paths: BTreeSet<PathBuf> = names.iter().map(|m| metric_report_path(dir, m)).collect();
        assert_eq!(paths.len(), names.len());
        let logs: BTreeSet<PathBuf> = names.iter().map(|m| metric_log_path(dir, m)).collect();
        assert_eq!(logs.len(), names.len());

        for name in &names {
            fs::write(metric_report_path(dir, name), r#"{"score": 1}"#).unwrap();
        }
        assert_eq!(completed_metrics(dir, &names).len(), names.len());
        assert!(missing_metrics(dir, &names).is_empty());
    }

    #[test]
    fn test_aggregate_complete() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        assert!(!aggregate_complete(dir, 1, WHOLE_JOB_MIN_SEGMENTS));

        write(dir, "round1.jsonl", r#"{"metric":"m1","score":2}"#);
        assert!(!aggregate_complete(dir, 1, WHOLE_JOB_MIN_SEGMENTS));
        assert!(aggregate_complete(dir, 1, 1));

        let lines: Vec<String> = (0..3)
            .map(|i| format!(r#"{{"metric":"m{}","score":1}}"#, i))
            .collect();
        write(dir, "round1.jsonl", &lines.join("\n"));
        assert!(aggregate_complete(dir, 1, WHOLE_JOB_MIN_SEGMENTS));
        assert!(!aggregate_complete(dir, 2, WHOLE_JOB_MIN_SEGMENTS));
    }

    #[test]
    fn test_remove_stale_metric_artifacts() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "a.json", "{}");
        write(dir, "a.log", "old response");
        write(dir, "b.json", r#"{"score": 1}"#);
        write(dir, "b.log", "kept");

        let removed = remove_stale_metric_artifacts(dir, "a").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!dir.join("a.json").exists());
        assert!(!dir.join("a.log").exists());

        let removed = remove_stale_metric_artifacts(dir, "b").unwrap();
        assert!(removed.is_empty());
        assert!(dir.join("b.log").exists());

        // Nothing left to remove.
        assert!(remove_stale_metric_artifacts(dir, "a").unwrap().is_empty());
    }

    #[test]
    fn test_remove_stale_aggregate_artifacts() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "round2.jsonl", "garbage");
        write(dir, "round2.log", "raw");
        let removed = remove_stale_aggregate_artifacts(dir, 2, WHOLE_JOB_MIN_SEGMENTS).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!aggregate_report_path(dir, 2).exists());
    }
}

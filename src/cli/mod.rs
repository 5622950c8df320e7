//! Command-line interface for judge-forge.
//!
//! Provides commands for running evaluations, checking reports offline,
//! and serving the interactive shell tools.

mod commands;

pub use commands::{
    check_job_dir, check_path, check_report_file, parse_cli, run, run_with_cli, CheckReport, Cli,
};

//! Per-job evaluation pipeline.
//!
//! This module provides everything needed to evaluate a single job:
//!
//! - **Config**: evaluation and agent settings (defaults, YAML, env)
//! - **Checklist**: metric specs loaded from `evaluation/`
//! - **Prompts**: `tera` templates for whole-job and single-metric queries
//! - **Assets**: non-overwriting copy of auxiliary evaluation files
//! - **Runner**: one agent query per call, with the raw response persisted
//!
//! The retry loop around the runner lives in [`crate::scheduler`].

pub mod assets;
pub mod checklist;
pub mod config;
pub mod prompts;
pub mod runner;

pub use checklist::{load_checklist, load_for_project, Checklist, MetricSpec, MetricType, TestCase};
pub use config::{AgentConfig, ConfigFile, EvalConfig, Settings};
pub use runner::{mint_session_id, JobExecutor, JobRunner};

//! Report validation for agent-written score reports.
//!
//! A report is valid when it parses under one of the tolerant grammars below and
//! yields at least one JSON object carrying a `score` key. Grammars are tried in
//! order and the first one that applies decides the outcome:
//!
//! 1. [`ArrayGrammar`] - content wrapped in `[` ... `]`
//! 2. [`JsonLinesGrammar`] - two or more non-empty lines, each a standalone JSON value
//! 3. [`SegmentGrammar`] - brace-depth segmentation of loosely concatenated objects,
//!    requiring a minimum number of segments
//!
//! Validation never fails: anything that cannot be parsed is simply invalid.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::json_extraction::segment_top_level_objects;

/// Minimum segment count for a single-metric report.
pub const SINGLE_METRIC_MIN_SEGMENTS: usize = 3;

/// Minimum segment count for a whole-job aggregate report.
pub const WHOLE_JOB_MIN_SEGMENTS: usize = 5;

/// Which kind of report is being validated. Only affects the segmentation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    SingleMetric,
    WholeJob,
}

impl ReportMode {
    /// Minimum number of brace segments the segmentation grammar requires.
    pub fn min_segments(self) -> usize {
        match self {
            ReportMode::SingleMetric => SINGLE_METRIC_MIN_SEGMENTS,
            ReportMode::WholeJob => WHOLE_JOB_MIN_SEGMENTS,
        }
    }
}

/// Outcome of a single grammar attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum GrammarOutcome {
    /// The grammar does not recognise the content; try the next one.
    NotApplicable,
    /// The grammar recognised and parsed the content.
    Parsed(Vec<Value>),
    /// The grammar recognised the content but it is malformed.
    Rejected(String),
}

/// A report grammar tried by [`ReportValidator`].
pub trait ReportGrammar: Send + Sync {
    /// Short name used in logs and inspections.
    fn name(&self) -> &'static str;

    /// Attempts to parse already-trimmed, non-empty content.
    fn parse(&self, content: &str) -> GrammarOutcome;
}

/// A JSON array of entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrayGrammar;

impl ReportGrammar for ArrayGrammar {
    fn name(&self) -> &'static str {
        "array"
    }

    fn parse(&self, content: &str) -> GrammarOutcome {
        if !(content.starts_with('[') && content.ends_with(']')) {
            return GrammarOutcome::NotApplicable;
        }
        match serde_json::from_str::<Vec<Value>>(content) {
            Ok(values) => GrammarOutcome::Parsed(values),
            Err(e) => GrammarOutcome::Rejected(e.to_string()),
        }
    }
}

/// JSON Lines: every non-empty line is a standalone JSON value.
///
/// A single line is not treated as JSONL; a lone object falls through to
/// segmentation and its minimum-count rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesGrammar;

impl ReportGrammar for JsonLinesGrammar {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn parse(&self, content: &str) -> GrammarOutcome {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() < 2 {
            return GrammarOutcome::NotApplicable;
        }

        let mut values = Vec::with_capacity(lines.len());
        for line in lines {
            match serde_json::from_str::<Value>(line) {
                Ok(v) => values.push(v),
                Err(_) => return GrammarOutcome::NotApplicable,
            }
        }
        GrammarOutcome::Parsed(values)
    }
}

/// Brace-depth segmentation of loosely concatenated objects.
#[derive(Debug, Clone, Copy)]
pub struct SegmentGrammar {
    min_segments: usize,
}

impl SegmentGrammar {
    pub fn new(min_segments: usize) -> Self {
        Self { min_segments }
    }
}

impl ReportGrammar for SegmentGrammar {
    fn name(&self) -> &'static str {
        "segments"
    }

    fn parse(&self, content: &str) -> GrammarOutcome {
        let segments = segment_top_level_objects(content);
        if segments.len() < self.min_segments {
            return GrammarOutcome::Rejected(format!(
                "found {} object segments, need at least {}",
                segments.len(),
                self.min_segments
            ));
        }

        let mut values = Vec::with_capacity(segments.len());
        for segment in segments {
            match serde_json::from_str::<Value>(segment) {
                Ok(v) => values.push(v),
                Err(e) => return GrammarOutcome::Rejected(e.to_string()),
            }
        }
        GrammarOutcome::Parsed(values)
    }
}

/// What the validator concluded about one report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportInspection {
    /// Grammar that decided the outcome, if any applied.
    pub grammar: Option<&'static str>,
    /// Entries parsed by that grammar.
    pub entries: Vec<Value>,
    /// Rejection reason, when the deciding grammar rejected the content.
    pub rejection: Option<String>,
    /// Whether the report is valid.
    pub valid: bool,
}

impl ReportInspection {
    fn invalid(grammar: Option<&'static str>, reason: impl Into<String>) -> Self {
        Self {
            grammar,
            entries: Vec::new(),
            rejection: Some(reason.into()),
            valid: false,
        }
    }

    /// Entries that are objects with a `score` key.
    pub fn scored_entries(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().filter(|v| is_scored_entry(v))
    }
}

/// Ordered chain of report grammars.
pub struct ReportValidator {
    grammars: Vec<Box<dyn ReportGrammar>>,
}

impl ReportValidator {
    /// Creates the standard array → JSONL → segmentation chain for `mode`.
    pub fn new(mode: ReportMode) -> Self {
        Self::with_min_segments(mode.min_segments())
    }

    /// Creates the standard chain with a custom segmentation threshold.
    pub fn with_min_segments(min_segments: usize) -> Self {
        Self {
            grammars: vec![
                Box::new(ArrayGrammar),
                Box::new(JsonLinesGrammar),
                Box::new(SegmentGrammar::new(min_segments)),
            ],
        }
    }

    /// Creates a validator from an explicit grammar chain.
    pub fn from_grammars(grammars: Vec<Box<dyn ReportGrammar>>) -> Self {
        Self { grammars }
    }

    /// Runs the grammar chain and reports which grammar decided and why.
    pub fn inspect(&self, content: &str) -> ReportInspection {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return ReportInspection::invalid(None, "empty report");
        }

        for grammar in &self.grammars {
            match grammar.parse(trimmed) {
                GrammarOutcome::NotApplicable => continue,
                GrammarOutcome::Rejected(reason) => {
                    return ReportInspection::invalid(Some(grammar.name()), reason);
                }
                GrammarOutcome::Parsed(entries) => {
                    let valid = entries.iter().any(is_scored_entry);
                    let rejection = (!valid).then(|| "no entry carries a score".to_string());
                    return ReportInspection {
                        grammar: Some(grammar.name()),
                        entries,
                        rejection,
                        valid,
                    };
                }
            }
        }

        ReportInspection::invalid(None, "no grammar applied")
    }

    /// Returns true if `bytes` hold a valid report.
    pub fn is_valid(&self, bytes: &[u8]) -> bool {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.inspect(text).valid,
            Err(_) => false,
        }
    }
}

/// Returns true if `bytes` hold a valid report under the standard chain for `mode`.
pub fn is_valid_report(bytes: &[u8], mode: ReportMode) -> bool {
    ReportValidator::new(mode).is_valid(bytes)
}

/// Returns true if `value` is an object containing a `score` key.
pub fn is_scored_entry(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("score"))
}

/// A typed view of one score entry, used for summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    #[serde(default, alias = "metric_name")]
    pub metric: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub score: Value,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl ScoreEntry {
    /// Numeric score if the entry carries one (numbers or numeric strings).
    pub fn numeric_score(&self) -> Option<f64> {
        match &self.score {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

//! Metric checklists.
//!
//! Each job ships an ordered list of metrics under `evaluation/`. The checklist is
//! loaded once per job and is immutable afterwards; [`MetricSpec::rewrite_paths`]
//! produces the per-query copy with paths anchored to the job's project directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChecklistError;

/// Checklist locations relative to a project directory, in lookup order.
pub const CHECKLIST_CANDIDATES: [&str; 2] = [
    "evaluation/detailed_test_plan.json",
    "evaluation/metric.json",
];

/// Kind of check a metric performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    UnitTest,
    ShellInteraction,
    FileComparison,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::UnitTest => write!(f, "unit_test"),
            MetricType::ShellInteraction => write!(f, "shell_interaction"),
            MetricType::FileComparison => write!(f, "file_comparison"),
        }
    }
}

/// One command/input pair of a metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_input: Option<String>,
    /// Fields the orchestrator does not interpret, passed through to the prompt.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One named, independently scorable checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    #[serde(rename = "metric", alias = "metric_name", alias = "name")]
    pub metric_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<MetricType>,
    #[serde(default)]
    pub testcases: Vec<TestCase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_output_files: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metric_name: name.into(),
            description: String::new(),
            metric_type: None,
            testcases: Vec::new(),
            input_files: Vec::new(),
            expected_output: None,
            expected_output_files: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = Some(metric_type);
        self
    }

    pub fn with_testcase(mut self, command: Option<&str>, input: Option<&str>) -> Self {
        self.testcases.push(TestCase {
            test_command: command.map(str::to_string),
            test_input: input.map(str::to_string),
            extra: Map::new(),
        });
        self
    }

    /// Returns a copy whose relative paths are anchored under `project_dir`.
    ///
    /// - relative `test_input`, `input_files` and `expected_output_files` become absolute
    /// - `test_command` tokens naming an existing relative path become absolute
    /// - every `test_command` is prefixed with `cd <project_dir> && `
    pub fn rewrite_paths(&self, project_dir: &Path) -> MetricSpec {
        let mut spec = self.clone();
        for case in &mut spec.testcases {
            if let Some(input) = case.test_input.as_mut() {
                if looks_like_relative_path(input) {
                    *input = absolutize(project_dir, input);
                }
            }
            if let Some(command) = case.test_command.as_mut() {
                *command = rewrite_command(command, project_dir);
            }
        }
        for file in spec
            .input_files
            .iter_mut()
            .chain(spec.expected_output_files.iter_mut())
        {
            if looks_like_relative_path(file) {
                *file = absolutize(project_dir, file);
            }
        }
        spec
    }

    /// JSON payload embedded in prompts.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// An ordered, duplicate-free list of metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Checklist {
    pub path: PathBuf,
    pub metrics: Vec<MetricSpec>,
}

impl Checklist {
    /// Metric names in checklist order.
    pub fn names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.metric_name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|m| m.metric_name == name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Finds the checklist file for a project directory.
pub fn locate_checklist(project_dir: &Path) -> Option<PathBuf> {
    CHECKLIST_CANDIDATES
        .iter()
        .map(|rel| project_dir.join(rel))
        .find(|p| p.is_file())
}

/// Locates and loads the checklist for a project directory.
pub fn load_for_project(project_dir: &Path) -> Result<Checklist, ChecklistError> {
    let path = locate_checklist(project_dir)
        .ok_or_else(|| ChecklistError::NotFound(project_dir.display().to_string()))?;
    load_checklist(&path)
}

/// Loads a checklist file: either a top-level array or an object with a `metrics` array.
pub fn load_checklist(path: &Path) -> Result<Checklist, ChecklistError> {
    let content = std::fs::read_to_string(path)?;
    let metrics = parse_checklist(&content).map_err(|message| ChecklistError::Malformed {
        path: path.display().to_string(),
        message,
    })?;

    let mut seen = HashSet::new();
    for metric in &metrics {
        if !seen.insert(metric.metric_name.as_str()) {
            return Err(ChecklistError::DuplicateMetric(metric.metric_name.clone()));
        }
    }

    Ok(Checklist {
        path: path.to_path_buf(),
        metrics,
    })
}

fn parse_checklist(content: &str) -> Result<Vec<MetricSpec>, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("metrics") {
            Some(Value::Array(items)) => items,
            _ => return Err("expected an array of metrics".to_string()),
        },
        _ => return Err("expected an array of metrics".to_string()),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let spec: MetricSpec =
                serde_json::from_value(item).map_err(|e| format!("metric #{}: {}", i, e))?;
            if spec.metric_name.trim().is_empty() {
                return Err(format!("metric #{}: empty metric name", i));
            }
            Ok(spec)
        })
        .collect()
}

fn looks_like_relative_path(value: &str) -> bool {
    !value.is_empty() && !value.contains('\n') && Path::new(value).is_relative()
}

fn absolutize(project_dir: &Path, rel: &str) -> String {
    let rel = rel.strip_prefix("./").unwrap_or(rel);
    project_dir.join(rel).display().to_string()
}

fn cd_prefix(project_dir: &Path) -> String {
    format!("cd {} && ", shell_quote(&project_dir.display().to_string()))
}

fn shell_quote(value: &str) -> String {
    if value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", value.replace('\'', r"'\''"))
    } else {
        value.to_string()
    }
}

fn command_token_regex() -> Option<&'static Regex> {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\S+").ok()).as_ref()
}

/// Absolutizes path tokens in place and makes sure the command starts with the
/// `cd` prefix. Whitespace between tokens is never touched.
fn rewrite_command(command: &str, project_dir: &Path) -> String {
    let prefix = cd_prefix(project_dir);
    let body = command.strip_prefix(&prefix).unwrap_or(command);

    let rewritten = match command_token_regex() {
        Some(re) => re
            .replace_all(body, |caps: &Captures| {
                let token = &caps[0];
                if is_path_token(token, project_dir) {
                    absolutize(project_dir, token)
                } else {
                    token.to_string()
                }
            })
            .into_owned(),
        None => body.to_string(),
    };

    format!("{}{}", prefix, rewritten)
}

fn is_path_token(token: &str, project_dir: &Path) -> bool {
    let candidate = token.strip_prefix("./").unwrap_or(token);
    !token.starts_with('-')
        && token != "."
        && token != ".."
        && Path::new(token).is_relative()
        && project_dir.join(candidate).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PLAN: &str = r#"[
        {
            "metric": "1.1 startup",
            "description": "program starts",
            "type": "shell_interaction",
            "testcases": [{"test_command": "python main.py", "test_input": "inputs/start.in"}],
            "expected_output": "menu shown"
        },
        {
            "metric_name": "1.2 tests",
            "type": "unit_test",
            "testcases": [{"test_command": "pytest tests/test_core.py -q", "timeout": 30}],
            "input_files": ["data/a.csv", "/abs/b.csv"],
            "expected_output_files": ["expected/out.txt"],
            "weight": 2
        }
    ]"#;

    fn project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("evaluation")).unwrap();
        fs::create_dir_all(tmp.path().join("tests")).unwrap();
        fs::write(tmp.path().join("main.py"), "print('hi')").unwrap();
        fs::write(tmp.path().join("tests/test_core.py"), "").unwrap();
        tmp
    }

    #[test]
    fn test_load_detailed_plan() {
        let tmp = project();
        fs::write(tmp.path().join("evaluation/detailed_test_plan.json"), PLAN).unwrap();

        let checklist = load_for_project(tmp.path()).unwrap();
        assert_eq!(checklist.names(), vec!["1.1 startup", "1.2 tests"]);
        let first = checklist.get("1.1 startup").unwrap();
        assert_eq!(first.metric_type, Some(MetricType::ShellInteraction));
        assert_eq!(first.expected_output.as_deref(), Some("menu shown"));

        let second = checklist.get("1.2 tests").unwrap();
        assert_eq!(second.extra.get("weight"), Some(&Value::from(2)));
        assert_eq!(second.testcases[0].extra.get("timeout"), Some(&Value::from(30)));
    }

    #[test]
    fn test_falls_back_to_metric_json() {
        let tmp = project();
        fs::write(
            tmp.path().join("evaluation/metric.json"),
            r#"{"metrics": [{"name": "only"}]}"#,
        )
        .unwrap();
        let checklist = load_for_project(tmp.path()).unwrap();
        assert_eq!(checklist.names(), vec!["only"]);
        assert!(checklist.path.ends_with("evaluation/metric.json"));
    }

    #[test]
    fn test_missing_checklist() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            load_for_project(tmp.path()),
            Err(ChecklistError::NotFound(_))
        ));
    }

    #[test]
    fn test_malformed_and_duplicate() {
        let tmp = project();
        let path = tmp.path().join("evaluation/metric.json");

        fs::write(&path, r#"{"metric": "x"}"#).unwrap();
        assert!(matches!(
            load_checklist(&path),
            Err(ChecklistError::Malformed { .. })
        ));

        fs::write(&path, r#"[{"metric": ""}]"#).unwrap();
        assert!(matches!(
            load_checklist(&path),
            Err(ChecklistError::Malformed { .. })
        ));

        fs::write(&path, r#"[{"metric": "a"}, {"metric": "a"}]"#).unwrap();
        assert!(matches!(
            load_checklist(&path),
            Err(ChecklistError::DuplicateMetric(name)) if name == "a"
        ));
    }

    #[test]
    fn test_rewrite_paths() {
        let tmp = project();
        let dir = tmp.path();
        fs::write(dir.join("evaluation/detailed_test_plan.json"), PLAN).unwrap();
        let checklist = load_for_project(dir).unwrap();

        let first = checklist.metrics[0].rewrite_paths(dir);
        let case = &first.testcases[0];
        let prefix = format!("cd {} && ", dir.display());
        assert_eq!(
            case.test_command.as_deref().unwrap(),
            format!("{}python {}", prefix, dir.join("main.py").display())
        );
        assert_eq!(
            case.test_input.as_deref().unwrap(),
            dir.join("inputs/start.in").display().to_string()
        );

        let second = checklist.metrics[1].rewrite_paths(dir);
        assert_eq!(
            second.testcases[0].test_command.as_deref().unwrap(),
            format!(
                "{}pytest {} -q",
                prefix,
                dir.join("tests/test_core.py").display()
            )
        );
        assert_eq!(second.input_files[0], dir.join("data/a.csv").display().to_string());
        assert_eq!(second.input_files[1], "/abs/b.csv");
        assert_eq!(
            second.expected_output_files[0],
            dir.join("expected/out.txt").display().to_string()
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let tmp = project();
        let dir = tmp.path();
        let spec = MetricSpec::new("m")
            .with_testcase(Some("python main.py"), None)
            .with_testcase(Some("pytest  tests/test_core.py\n  -q"), None);
        let once = spec.rewrite_paths(dir);
        let twice = once.rewrite_paths(dir);
        assert_eq!(once, twice);

        // A command that already carries the prefix still gets its paths rewritten.
        let prefixed = format!("cd {} && python main.py", dir.display());
        let spec = MetricSpec::new("m").with_testcase(Some(&prefixed), None);
        let rewritten = spec.rewrite_paths(dir).testcases[0]
            .test_command
            .clone()
            .unwrap();
        assert_eq!(
            rewritten,
            format!("cd {} && python {}", dir.display(), dir.join("main.py").display())
        );
    }

    #[test]
    fn test_rewrite_keeps_command_layout() {
        let tmp = project();
        let dir = tmp.path();
        let prefix = format!("cd {} && ", dir.display());
        let rewrite = |command: &str| {
            MetricSpec::new("m")
                .with_testcase(Some(command), None)
                .rewrite_paths(dir)
                .testcases[0]
                .test_command
                .clone()
                .unwrap()
        };

        let heredoc = "python3 - <<EOF\nprint(1)\nEOF";
        assert_eq!(rewrite(heredoc), format!("{}{}", prefix, heredoc));

        let spaced = "printf 'a  b\\n'";
        assert_eq!(rewrite(spaced), format!("{}{}", prefix, spaced));

        assert_eq!(
            rewrite("python\tmain.py  <<EOF\nmain.py\nEOF"),
            format!(
                "{}python\t{}  <<EOF\n{}\nEOF",
                prefix,
                dir.join("main.py").display(),
                dir.join("main.py").display()
            )
        );
    }

    #[test]
    fn test_rewrite_quotes_dir_with_spaces() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("my job");
        fs::create_dir_all(&dir).unwrap();
        let spec = MetricSpec::new("m").with_testcase(Some("ls"), None);
        let cmd = spec.rewrite_paths(&dir).testcases[0]
            .test_command
            .clone()
            .unwrap();
        assert_eq!(cmd, format!("cd '{}' && ls", dir.display()));
    }

    #[test]
    fn test_payload_uses_wire_names() {
        let spec = MetricSpec::new("m").with_type(MetricType::FileComparison);
        let payload = spec.to_payload();
        assert_eq!(payload["metric"], "m");
        assert_eq!(payload["type"], "file_comparison");
        assert!(payload.get("metric_name").is_none());
    }
}

//! Evaluation prompt templates.
//!
//! Prompts are rendered with `tera`. Their wording is deliberately generic; what
//! matters to the orchestrator is that each prompt names the report path the agent
//! must write and carries the metric payload it must score.

use std::path::Path;

use tera::{Context, Tera};

use super::checklist::MetricSpec;

/// Prompt for evaluating every metric of a job in one session.
pub const WHOLE_JOB_TEMPLATE: &str = r#"You are evaluating the project in {{ project_dir }} (job {{ job_id }}, round {{ round }}).

Work through every metric below in order. For each metric, run the listed test commands with the interactive_shell tool, compare the observed behaviour with the expectation, and award a score of 0, 1 or 2.

Metrics:
{{ metrics_json }}

Write one JSON object per metric, one per line, to {{ report_path }}. Each object must have the keys "metric", "description", "score" and "explanation". Do not write anything else to that file.
"#;

/// Prompt for evaluating a single metric.
pub const SINGLE_METRIC_TEMPLATE: &str = r#"You are evaluating one metric of the project in {{ project_dir }} (job {{ job_id }}).

Metric:
{{ metric_json }}

Run the test commands with the interactive_shell tool. Answer any prompts the program shows using the provided test input, then compare the result with the expected output and award a score of 0, 1 or 2.

Write a single JSON object to {{ report_path }} with the keys "metric", "description", "score" and "explanation". The "metric" value must be exactly "{{ metric_name }}".
"#;

/// Renders the whole-job prompt.
pub fn render_whole_job_prompt(
    job_id: &str,
    project_dir: &Path,
    round: u32,
    metrics: &[MetricSpec],
    report_path: &Path,
) -> Result<String, tera::Error> {
    let payload: Vec<_> = metrics.iter().map(MetricSpec::to_payload).collect();
    let mut context = Context::new();
    context.insert("job_id", job_id);
    context.insert("project_dir", &project_dir.display().to_string());
    context.insert("round", &round);
    context.insert("metrics_json", &pretty(&payload));
    context.insert("report_path", &report_path.display().to_string());
    Tera::one_off(WHOLE_JOB_TEMPLATE, &context, false)
}

/// Renders the single-metric prompt. `metric` should already have its paths rewritten.
pub fn render_metric_prompt(
    job_id: &str,
    project_dir: &Path,
    metric: &MetricSpec,
    report_path: &Path,
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("job_id", job_id);
    context.insert("project_dir", &project_dir.display().to_string());
    context.insert("metric_name", &metric.metric_name);
    context.insert("metric_json", &pretty(&metric.to_payload()));
    context.insert("report_path", &report_path.display().to_string());
    Tera::one_off(SINGLE_METRIC_TEMPLATE, &context, false)
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::checklist::MetricType;

    #[test]
    fn test_render_whole_job_prompt() {
        let metrics = vec![
            MetricSpec::new("1.1 startup").with_type(MetricType::ShellInteraction),
            MetricSpec::new("1.2 <output>"),
        ];
        let prompt = render_whole_job_prompt(
            "12",
            Path::new("/jobs/12"),
            2,
            &metrics,
            Path::new("/jobs/12/reports/round2.jsonl"),
        )
        .unwrap();

        assert!(prompt.contains("job 12, round 2"));
        assert!(prompt.contains("/jobs/12/reports/round2.jsonl"));
        assert!(prompt.contains("\"metric\": \"1.1 startup\""));
        // Autoescape is off, so metric names are passed through verbatim.
        assert!(prompt.contains("1.2 <output>"));
    }

    #[test]
    fn test_render_metric_prompt() {
        let metric = MetricSpec::new("2.3 save file").with_testcase(Some("cd /p && ls"), None);
        let prompt = render_metric_prompt(
            "4",
            Path::new("/p"),
            &metric,
            Path::new("/p/reports/2.3 save file.json"),
        )
        .unwrap();

        assert!(prompt.contains("must be exactly \"2.3 save file\""));
        assert!(prompt.contains("/p/reports/2.3 save file.json"));
        assert!(prompt.contains("cd /p && ls"));
    }
}

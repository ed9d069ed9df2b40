// ABOUTME: Output formatters for run reports (JSON, YAML, text)
// ABOUTME: Handles serialization and presentation of runs and their per-task records

use async_trait::async_trait;
use serde_json::{self, Value as JsonValue};

use super::config::{truncate, OutputConfig, OutputOptions};
use super::error::{OutputError, Result};
use crate::engine::run::{Run, TaskRecord, TaskState};
use crate::warehouse::format_rows;

#[async_trait]
pub trait OutputFormatter: Send + Sync {
    async fn format_run(&self, run: &Run, config: &OutputConfig) -> Result<String>;
}

pub struct JsonFormatter {
    pretty: bool,
}

pub struct YamlFormatter;

pub struct TextFormatter;

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn new_pretty() -> Self {
        Self { pretty: true }
    }
}

#[async_trait]
impl OutputFormatter for JsonFormatter {
    async fn format_run(&self, run: &Run, config: &OutputConfig) -> Result<String> {
        let formatted = prepare_run_output(run, &config.options)?;

        if self.pretty {
            serde_json::to_string_pretty(&formatted).map_err(OutputError::SerializationError)
        } else {
            serde_json::to_string(&formatted).map_err(OutputError::SerializationError)
        }
    }
}

fn include_task(record: &TaskRecord, options: &OutputOptions) -> bool {
    !options.only_unsuccessful || record.state != TaskState::Succeeded
}

fn prepare_run_output(run: &Run, options: &OutputOptions) -> Result<JsonValue> {
    let mut output = serde_json::Map::new();

    output.insert("pipeline".to_string(), JsonValue::String(run.pipeline.clone()));
    output.insert("run_id".to_string(), JsonValue::String(run.id.clone()));
    output.insert("status".to_string(), JsonValue::String(run.status.to_string()));
    output.insert("window".to_string(), serde_json::to_value(run.window)?);

    if options.include_timestamps {
        output.insert(
            "created_at".to_string(),
            JsonValue::String(run.created_at.to_rfc3339()),
        );
        if let Some(finished_at) = run.finished_at {
            output.insert(
                "finished_at".to_string(),
                JsonValue::String(finished_at.to_rfc3339()),
            );
        }
    }

    output.insert("summary".to_string(), serde_json::to_value(run.summary())?);

    if options.include_task_results {
        let mut tasks = Vec::new();
        for (task_id, record) in &run.tasks {
            if !include_task(record, options) {
                continue;
            }
            let mut task = serde_json::Map::new();
            task.insert("task_id".to_string(), JsonValue::String(task_id.clone()));
            task.insert("kind".to_string(), JsonValue::String(record.kind.to_string()));
            task.insert("state".to_string(), JsonValue::String(record.state.to_string()));
            task.insert("attempts".to_string(), JsonValue::from(record.attempts));
            if let Some(ref failure) = record.last_failure {
                let mut failure_json = serde_json::to_value(failure)?;
                if let Some(message) = failure_json.get_mut("message") {
                    *message = JsonValue::String(truncate(
                        &failure.message,
                        options.max_message_length,
                    ));
                }
                task.insert("failure".to_string(), failure_json);
            }
            tasks.push(JsonValue::Object(task));
        }
        output.insert("tasks".to_string(), JsonValue::Array(tasks));
    }

    if options.include_events {
        output.insert("events".to_string(), serde_json::to_value(&run.events)?);
    }

    Ok(JsonValue::Object(output))
}

#[async_trait]
impl OutputFormatter for YamlFormatter {
    async fn format_run(&self, run: &Run, config: &OutputConfig) -> Result<String> {
        let json_value = prepare_run_output(run, &config.options)?;
        serde_yaml::to_string(&json_value).map_err(OutputError::YamlSerializationError)
    }
}

impl Default for YamlFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl YamlFormatter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutputFormatter for TextFormatter {
    async fn format_run(&self, run: &Run, config: &OutputConfig) -> Result<String> {
        let options = &config.options;
        let summary = run.summary();
        let mut output = String::new();

        output.push_str(&format!("Pipeline: {} ({})\n", run.pipeline, run.id));
        output.push_str(&format!("Window: {}\n", run.window));
        output.push_str(&format!("Status: {}\n", run.status));

        if options.include_timestamps {
            output.push_str(&format!(
                "Started: {}\n",
                run.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            if let Some(finished_at) = run.finished_at {
                output.push_str(&format!(
                    "Completed: {}\n",
                    finished_at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
        }
        if let Some(duration) = summary.duration {
            output.push_str(&format!("Duration: {:.2}s\n", duration.as_secs_f64()));
        }

        output.push_str("\nSummary:\n");
        output.push_str(&format!("  Total tasks: {}\n", summary.total_tasks));
        output.push_str(&format!("  Succeeded: {}\n", summary.succeeded));
        output.push_str(&format!("  Failed: {}\n", summary.failed));
        output.push_str(&format!("  Abandoned: {}\n", summary.abandoned));
        if summary.unfinished > 0 {
            output.push_str(&format!("  Unfinished: {}\n", summary.unfinished));
        }
        output.push_str(&format!("  Attempts: {}\n", summary.attempts));
        output.push_str(&format!("  Success rate: {:.1}%\n", summary.success_rate()));

        if options.include_task_results && !run.tasks.is_empty() {
            output.push_str("\nTasks:\n");
            for (task_id, record) in &run.tasks {
                if !include_task(record, options) {
                    continue;
                }
                output.push_str(&format!("  {}\n", format_task_line(task_id, record, options)));
            }
        }

        if options.include_events {
            output.push_str("\nEvents:\n");
            for event in &run.events {
                output.push_str(&format!(
                    "  #{:<4} {} {} -> {} (attempt {})",
                    event.seq, event.task_id, event.from, event.to, event.attempt
                ));
                if let Some(ref message) = event.message {
                    output.push_str(&format!(": {}", truncate(message, options.max_message_length)));
                }
                output.push('\n');
            }
        }

        Ok(output)
    }
}

fn format_task_line(task_id: &str, record: &TaskRecord, options: &OutputOptions) -> String {
    let status_icon = match record.state {
        TaskState::Succeeded => "✓",
        TaskState::FailedFatal | TaskState::FailedRetryable => "✗",
        TaskState::Abandoned => "⊘",
        TaskState::Pending | TaskState::Ready => "⧖",
        TaskState::Running => "⟳",
    };

    let mut line = format!("{} {} ({}) {}", status_icon, task_id, record.kind, record.state);
    if record.attempts > 1 {
        line.push_str(&format!(" after {} attempts", record.attempts));
    }

    if let Some(ref failure) = record.last_failure {
        line.push_str(&format!(
            "\n      Error: {}",
            truncate(&failure.message, options.max_message_length)
        ));
        if let (Some(expected), Some(actual)) = (&failure.expected, &failure.actual) {
            line.push_str(&format!("\n      Expected: {}", format_rows(expected)));
            line.push_str(&format!("\n      Actual:   {}", format_rows(actual)));
        }
    }
    line
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::TaskError;
    use crate::engine::graph::TaskGraph;
    use crate::engine::result::TaskFailure;
    use crate::engine::run::Window;
    use crate::engine::task::{Task, TaskKind};
    use crate::row;

    fn finished_run() -> Run {
        let graph = TaskGraph::build(vec![
            Task::new("create_tables", TaskKind::Init),
            Task::new("user_check", TaskKind::QualityCheck).depends_on(["create_tables"]),
        ])
        .unwrap();
        let mut run = Run::new("sparkify", Window::default(), &graph);

        run.transition("create_tables", TaskState::Ready, None).unwrap();
        run.transition("create_tables", TaskState::Running, None).unwrap();
        run.transition("create_tables", TaskState::Succeeded, None).unwrap();

        let error = TaskError::QualityAssertion {
            expected: vec![row![8, "Kaylee"]],
            actual: vec![],
            retry_on_mismatch: false,
        };
        run.transition("user_check", TaskState::Ready, None).unwrap();
        run.transition("user_check", TaskState::Running, None).unwrap();
        run.record_failure("user_check", TaskFailure::from(&error)).unwrap();
        run.transition("user_check", TaskState::FailedFatal, Some(error.to_string()))
            .unwrap();
        run.finalize().unwrap();
        run
    }

    #[tokio::test]
    async fn test_json_formatter() {
        let run = finished_run();
        let output = JsonFormatter::new()
            .format_run(&run, &OutputConfig::default())
            .await
            .unwrap();

        let parsed: JsonValue = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["pipeline"], "sparkify");
        assert_eq!(parsed["status"], "failed");
        assert_eq!(parsed["tasks"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["tasks"][1]["failure"]["kind"], "quality_assertion");
        assert!(parsed.get("events").is_none());
    }

    #[tokio::test]
    async fn test_yaml_formatter_with_events() {
        let run = finished_run();
        let mut config = OutputConfig::default();
        config.options.include_events = true;

        let output = YamlFormatter::new().format_run(&run, &config).await.unwrap();

        let parsed: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
        assert!(parsed.get("summary").is_some());
        assert_eq!(
            parsed["events"].as_sequence().unwrap().len(),
            run.events.len()
        );
    }

    #[tokio::test]
    async fn test_text_formatter_shows_mismatch() {
        let run = finished_run();
        let output = TextFormatter::new()
            .format_run(&run, &OutputConfig::default())
            .await
            .unwrap();

        assert!(output.contains("Pipeline: sparkify"));
        assert!(output.contains("Status: failed"));
        assert!(output.contains("✗ user_check (quality_check) failed_fatal"));
        assert!(output.contains("Expected: [(8, 'Kaylee')]"));
        assert!(output.contains("Actual:   []"));
    }

    #[tokio::test]
    async fn test_only_unsuccessful_filter() {
        let run = finished_run();
        let mut config = OutputConfig::default();
        config.options.only_unsuccessful = true;

        let output = JsonFormatter::new().format_run(&run, &config).await.unwrap();
        let parsed: JsonValue = serde_json::from_str(&output).unwrap();
        let tasks = parsed["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["task_id"], "user_check");
    }
}

// ABOUTME: Task entries of a pipeline definition
// ABOUTME: Converts a declared task into an engine task with its effective retry policy

use serde::{Deserialize, Serialize};

use crate::engine::task::{RetryPolicy, Task, TaskKind};

/// ```yaml
/// stage_events:
///   kind: stage
///   depends_on: [create_tables]
///   retry: { max_attempts: 3, delay: 5m }
///   config:
///     table: staging_events
///     bucket: udacity-dend
///     path: /log_data/2018/11/
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: TaskKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default = "empty_mapping")]
    pub config: serde_yaml::Value,
}

fn empty_mapping() -> serde_yaml::Value {
    serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
}

impl TaskConfig {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            description: None,
            kind,
            depends_on: Vec::new(),
            retry: None,
            config: empty_mapping(),
        }
    }

    /// The task's own retry policy, or `default` when it declares none
    pub fn effective_retry(&self, default: &RetryPolicy) -> RetryPolicy {
        self.retry.clone().unwrap_or_else(|| default.clone())
    }

    pub fn to_task(&self, id: &str, default_retry: &RetryPolicy) -> Task {
        Task::new(id, self.kind)
            .depends_on(self.depends_on.iter().cloned())
            .with_payload(self.config.clone())
            .with_retry(self.effective_retry(default_retry))
    }
}

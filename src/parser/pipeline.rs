// ABOUTME: Pipeline definition structures and YAML parsing
// ABOUTME: Builds the frozen task graph a pipeline definition describes

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

use super::error::{ParserError, Result, ValidationError};
use super::task::TaskConfig;
use crate::engine::graph::TaskGraph;
use crate::engine::task::{LoadPolicy, RetryPolicy, TaskKind};
use crate::schedule::TriggerSchedule;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub schedule: TriggerSchedule,
    #[serde(default)]
    pub defaults: PipelineDefaults,
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    /// Per-table load policies; they win over a dimension task's own `policy`
    #[serde(default)]
    pub load_policies: IndexMap<String, LoadPolicy>,
    pub tasks: IndexMap<String, TaskConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefaults {
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Pipeline {
    /// Parse pipeline from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ParserError::IoError)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let pipeline: Pipeline = serde_yaml::from_str(content).map_err(ParserError::YamlError)?;
        pipeline.validate_structure()?;
        Ok(pipeline)
    }

    /// Checks that need no task registry: name, tasks, schedule, retry budgets
    fn validate_structure(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ParserError::MissingField("name".to_string()));
        }

        if self.tasks.is_empty() {
            return Err(ValidationError::EmptyPipeline.into());
        }

        self.schedule.validate()?;

        if self.defaults.retry.max_attempts == 0 {
            return Err(ValidationError::InvalidRetry {
                task: "defaults".to_string(),
                reason: "max_attempts must be at least 1".to_string(),
            }
            .into());
        }
        for (task_id, task) in &self.tasks {
            if task.retry.as_ref().is_some_and(|r| r.max_attempts == 0) {
                return Err(ValidationError::InvalidRetry {
                    task: task_id.clone(),
                    reason: "max_attempts must be at least 1".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn get_task(&self, task_id: &str) -> Option<&TaskConfig> {
        self.tasks.get(task_id)
    }

    /// Tasks that list `task_id` as a direct dependency
    pub fn get_dependent_tasks(&self, task_id: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.depends_on.iter().any(|dep| dep == task_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Payload handed to the executor, with `load_policies` applied
    pub fn effective_payload(&self, task: &TaskConfig) -> serde_yaml::Value {
        let mut payload = task.config.clone();
        if task.kind != TaskKind::LoadDimension {
            return payload;
        }

        let policy = dimension_table(&payload).and_then(|table| self.load_policy_for(table));
        if let (Some(policy), Some(mapping)) = (policy, payload.as_mapping_mut()) {
            mapping.insert(
                serde_yaml::Value::from("policy"),
                serde_yaml::Value::from(policy.as_str()),
            );
        }
        payload
    }

    /// Tables loaded by dimension tasks, in definition order
    pub fn dimension_tables(&self) -> Vec<String> {
        self.tasks
            .values()
            .filter(|task| task.kind == TaskKind::LoadDimension)
            .filter_map(|task| dimension_table(&task.config))
            .map(str::to_string)
            .collect()
    }

    fn load_policy_for(&self, table: &str) -> Option<LoadPolicy> {
        self.load_policies
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, policy)| *policy)
    }

    /// Build and freeze the task graph
    pub fn to_graph(&self) -> Result<TaskGraph> {
        let tasks = self.tasks.iter().map(|(task_id, config)| {
            let mut task = config.to_task(task_id, &self.defaults.retry);
            task.payload = self.effective_payload(config);
            task
        });
        let graph = TaskGraph::build(tasks)?;
        debug!("Built task graph for {} with {} tasks", self.name, graph.len());
        Ok(graph)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ParserError::YamlError)
    }
}

fn dimension_table(payload: &serde_yaml::Value) -> Option<&str> {
    payload.get("table").and_then(serde_yaml::Value::as_str)
}

#[derive(Debug, Clone, Default)]
pub struct PipelineParser;

impl PipelineParser {
    pub fn new() -> Self {
        Self
    }

    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Pipeline> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .map_err(ParserError::IoError)?;
        self.parse_string(&content)
    }

    pub fn parse_string(&self, content: &str) -> Result<Pipeline> {
        Pipeline::from_yaml(content)
    }
}

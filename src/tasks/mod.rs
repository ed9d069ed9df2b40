// ABOUTME: Task implementations for the five pipeline task kinds
// ABOUTME: Defines the implementation trait and the registry the executor dispatches through

pub mod init;
pub mod load_dimension;
pub mod load_fact;
pub mod quality;
pub mod stage;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, TaskError};
use crate::engine::result::TaskOutput;
use crate::engine::task::TaskKind;

pub type Result<T> = std::result::Result<T, TaskError>;

/// Executor logic for one task kind.
///
/// `config` is the task payload with its templates already resolved.
#[async_trait]
pub trait TaskImplementation: Send + Sync {
    async fn execute(&self, config: serde_yaml::Value, context: ExecutionContext)
        -> Result<TaskOutput>;

    fn kind(&self) -> TaskKind;

    fn validate_config(&self, task_id: &str, config: &serde_yaml::Value) -> Result<()>;
}

pub struct TaskRegistry {
    implementations: HashMap<TaskKind, Box<dyn TaskImplementation>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(Box::new(init::InitTask));
        registry.register(Box::new(stage::StageTask));
        registry.register(Box::new(load_fact::LoadFactTask));
        registry.register(Box::new(load_dimension::LoadDimensionTask));
        registry.register(Box::new(quality::QualityCheckTask));

        registry
    }

    pub fn empty() -> Self {
        Self {
            implementations: HashMap::new(),
        }
    }

    /// Register an implementation, replacing any previous one for its kind
    pub fn register(&mut self, implementation: Box<dyn TaskImplementation>) {
        self.implementations
            .insert(implementation.kind(), implementation);
    }

    pub fn get_implementation(&self, kind: TaskKind) -> Option<&dyn TaskImplementation> {
        self.implementations.get(&kind).map(|imp| imp.as_ref())
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        self.implementations.contains_key(&kind)
    }

    pub fn ensure_supported(&self, kind: TaskKind) -> std::result::Result<(), ExecutionError> {
        if self.supports(kind) {
            Ok(())
        } else {
            Err(ExecutionError::TaskNotSupported {
                kind: kind.to_string(),
            })
        }
    }

    pub fn validate_task_config(
        &self,
        task_id: &str,
        kind: TaskKind,
        config: &serde_yaml::Value,
    ) -> Result<()> {
        match self.get_implementation(kind) {
            Some(implementation) => implementation.validate_config(task_id, config),
            None => Err(unsupported(task_id, kind)),
        }
    }

    /// Resolve payload templates, then run one attempt
    pub async fn execute_task(
        &self,
        kind: TaskKind,
        payload: &serde_yaml::Value,
        context: ExecutionContext,
    ) -> Result<TaskOutput> {
        let Some(implementation) = self.get_implementation(kind) else {
            return Err(unsupported(&context.task_id, kind));
        };

        let config = context
            .render_payload(payload)
            .map_err(|e| TaskError::InvalidConfiguration {
                task_id: context.task_id.clone(),
                reason: e.to_string(),
            })?;
        implementation.execute(config, context).await
    }

    pub fn list_supported_tasks(&self) -> Vec<TaskKind> {
        TaskKind::all()
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn unsupported(task_id: &str, kind: TaskKind) -> TaskError {
    TaskError::InvalidConfiguration {
        task_id: task_id.to_string(),
        reason: format!("no implementation registered for {}", kind),
    }
}

/// Deserialize a typed task configuration from its payload
pub(crate) fn parse_config<T: DeserializeOwned>(
    task_id: &str,
    config: serde_yaml::Value,
) -> Result<T> {
    serde_yaml::from_value(config).map_err(|e| TaskError::InvalidConfiguration {
        task_id: task_id.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn require_non_empty(task_id: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TaskError::InvalidConfiguration {
            task_id: task_id.to_string(),
            reason: format!("'{}' must not be empty", field),
        });
    }
    Ok(())
}

/// `INSERT INTO <table> (<select>)`, shared by fact and dimension loads
pub(crate) fn insert_select(table: &str, select: &str) -> String {
    format!("INSERT INTO {} ({})", table, select.trim().trim_end_matches(';'))
}

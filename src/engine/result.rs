// ABOUTME: Task attempt outcomes and run-level summaries
// ABOUTME: Captures failure diagnostics, including quality-check row sequences, in serializable form

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::TaskError;
use super::run::{Run, RunStatus, TaskState};
use crate::warehouse::Row;

/// What a successful attempt reports back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub message: Option<String>,
    /// Statements issued, with credentials masked
    #[serde(default)]
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SchemaInit,
    Load,
    QualityAssertion,
    Warehouse,
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Vec<Row>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub pipeline: String,
    pub status: RunStatus,
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub unfinished: usize,
    pub attempts: u32,
    pub duration: Option<Duration>,
}

impl TaskOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            statements: Vec::new(),
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statements.push(statement.into());
        self
    }
}

impl From<&TaskError> for TaskFailure {
    fn from(error: &TaskError) -> Self {
        let kind = match error {
            TaskError::SchemaInitFailure { .. } => FailureKind::SchemaInit,
            TaskError::LoadFailure { .. } => FailureKind::Load,
            TaskError::QualityAssertion { .. } => FailureKind::QualityAssertion,
            TaskError::WarehouseFailure(_) => FailureKind::Warehouse,
            TaskError::InvalidConfiguration { .. } => FailureKind::Configuration,
        };
        let (expected, actual) = match error {
            TaskError::QualityAssertion {
                expected, actual, ..
            } => (Some(expected.clone()), Some(actual.clone())),
            _ => (None, None),
        };

        Self {
            kind,
            message: error.to_string(),
            retryable: error.is_retryable(),
            expected,
            actual,
        }
    }
}

impl RunSummary {
    pub fn from_run(run: &Run) -> Self {
        let count = |state: TaskState| {
            run.tasks
                .values()
                .filter(|record| record.state == state)
                .count()
        };
        let succeeded = count(TaskState::Succeeded);
        let failed = count(TaskState::FailedFatal);
        let abandoned = count(TaskState::Abandoned);

        Self {
            run_id: run.id.clone(),
            pipeline: run.pipeline.clone(),
            status: run.status,
            total_tasks: run.tasks.len(),
            succeeded,
            failed,
            abandoned,
            unfinished: run.tasks.len() - succeeded - failed - abandoned,
            attempts: run.tasks.values().map(|record| record.attempts).sum(),
            duration: run
                .finished_at
                .and_then(|end| (end - run.created_at).to_std().ok()),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.total_tasks as f64) * 100.0
        }
    }
}

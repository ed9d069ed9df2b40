// ABOUTME: Error types for graph construction, run bookkeeping, and task execution
// ABOUTME: Classifies task failures as retryable or fatal for the scheduler

use thiserror::Error;

use super::run::TaskState;
use crate::warehouse::{format_rows, Row, WarehouseError};

/// Errors raised while building a task graph. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Cycle detected: {}", .path.join(" -> "))]
    CycleError { path: Vec<String> },

    #[error("Duplicate task: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("Task graph is frozen; cannot add task {task_id}")]
    GraphFrozen { task_id: String },

    #[error("Task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },
}

/// Engine-level errors. Task failures are not represented here: they are
/// recorded in the run as state transitions.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("Run {run_id} is archived and read-only")]
    RunArchived { run_id: String },

    #[error("Run {run_id} does not belong to pipeline {pipeline}")]
    RunMismatch { run_id: String, pipeline: String },

    #[error("Task {task_id} appends rows and has no upstream init task to reset its tables")]
    UnsafeRerun { task_id: String },

    #[error("Task type not supported: {kind}")]
    TaskNotSupported { kind: String },

    #[error("Run store error: {0}")]
    StoreError(#[from] crate::store::StoreError),

    #[error("Template error: {0}")]
    TemplateError(#[from] crate::template::TemplateError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An engine error stopped dispatch. The run was finalized after every
    /// in-flight attempt finished.
    #[error("Run {} halted: {source}", .run.id)]
    Halted {
        run: Box<super::run::Run>,
        source: Box<ExecutionError>,
    },

    #[error("System error: {0}")]
    SystemError(String),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Failure of a single task attempt.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("Schema initialisation failed: {message}")]
    SchemaInitFailure { message: String },

    #[error("Load into {table} failed: {message}")]
    LoadFailure { table: String, message: String },

    #[error("Quality assertion failed: expected {} but got {}", format_rows(.expected), format_rows(.actual))]
    QualityAssertion {
        expected: Vec<Row>,
        actual: Vec<Row>,
        retry_on_mismatch: bool,
    },

    #[error("Warehouse error: {0}")]
    WarehouseFailure(#[from] WarehouseError),

    #[error("Invalid task configuration: {task_id} - {reason}")]
    InvalidConfiguration { task_id: String, reason: String },
}

impl TaskError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::SchemaInitFailure { .. }
            | TaskError::LoadFailure { .. }
            | TaskError::WarehouseFailure(_) => true,
            TaskError::QualityAssertion {
                retry_on_mismatch, ..
            } => *retry_on_mismatch,
            TaskError::InvalidConfiguration { .. } => false,
        }
    }
}

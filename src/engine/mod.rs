// ABOUTME: Task-graph execution engine for starflow pipelines
// ABOUTME: Handles graph construction, run bookkeeping, retry scheduling, and execution

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod result;
pub mod run;
pub mod scheduler;
pub mod task;

pub use context::ExecutionContext;
pub use error::{ExecutionError, GraphError, Result, TaskError};
pub use executor::PipelineExecutor;
pub use graph::{ExecutionPlan, TaskGraph};
pub use result::{FailureKind, RunSummary, TaskFailure, TaskOutput};
pub use run::{Run, RunEvent, RunStatus, TaskRecord, TaskState, Window};
pub use scheduler::{AttemptEvent, TaskOutcome, TaskScheduler};
pub use task::{LoadPolicy, RetryPolicy, Task, TaskKind};

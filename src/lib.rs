// ABOUTME: Main library module for the starflow task-graph orchestrator
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod output;
pub mod parser;
pub mod schedule;
pub mod store;
pub mod tasks;
pub mod template;
pub mod warehouse;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{
    LoadPolicy, PipelineExecutor, RetryPolicy, Run, RunStatus, Task, TaskGraph, TaskKind,
    TaskState, Window,
};
pub use output::OutputHandler;
pub use parser::{Pipeline, PipelineParser, PipelineValidator};
pub use schedule::TriggerSchedule;
pub use store::{FileRunStore, MemoryRunStore, RunStore};
pub use warehouse::{MemoryWarehouse, Row, Value, WarehouseClient};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

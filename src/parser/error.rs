// ABOUTME: Error types for pipeline parsing and validation
// ABOUTME: Defines specific error types for parser module operations

use thiserror::Error;

use crate::engine::error::GraphError;
use crate::schedule::ScheduleError;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read pipeline file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid schedule: {0}")]
    ScheduleError(#[from] ScheduleError),

    #[error("Invalid task graph: {0}")]
    GraphError(#[from] GraphError),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Circular dependency detected in tasks: {}", .tasks.join(" -> "))]
    CircularDependency { tasks: Vec<String> },

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Invalid task configuration for '{task}': {reason}")]
    InvalidTaskConfig { task: String, reason: String },

    #[error("Invalid retry policy for '{task}': {reason}")]
    InvalidRetry { task: String, reason: String },

    #[error("Invalid template syntax in '{field}': {error}")]
    InvalidTemplate { field: String, error: String },

    #[error("Load policy given for table '{table}' but no dimension task loads it")]
    UnknownLoadPolicyTable { table: String },

    #[error("Empty pipeline: no tasks defined")]
    EmptyPipeline,
}

pub type Result<T> = std::result::Result<T, ParserError>;

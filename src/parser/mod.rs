// ABOUTME: Parser module for YAML pipeline definitions
// ABOUTME: Exports pipeline parsing, validation, and data structures

pub mod error;
pub mod pipeline;
pub mod task;
pub mod validation;

pub use error::{ParserError, ValidationError};
pub use pipeline::{Pipeline, PipelineDefaults, PipelineParser};
pub use task::TaskConfig;
pub use validation::{PipelineValidator, ValidationReport};

// ABOUTME: Template module rendering {{ }} placeholders in task payloads
// ABOUTME: Exposes the run-scoped context and the handlebars-backed engine

pub mod context;
pub mod engine;
pub mod error;
pub mod helpers;

pub use context::TemplateContext;
pub use engine::TemplateEngine;
pub use error::{Result, TemplateError};

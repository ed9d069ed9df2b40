// ABOUTME: Durable persistence of runs so they can be audited or resumed after a restart
// ABOUTME: Defines the run store contract with file-backed and in-memory implementations

pub mod file;
pub mod memory;

pub use file::FileRunStore;
pub use memory::MemoryRunStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::run::Run;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Run not found: {run_id}")]
    NotFound { run_id: String },

    #[error("Invalid run identifier: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage contract for runs.
///
/// `save` is called after every applied transition and must replace the
/// stored document as a whole.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, run: &Run) -> Result<()>;

    async fn load(&self, run_id: &str) -> Result<Run>;

    /// Most recently created run of a pipeline
    async fn latest(&self, pipeline: &str) -> Result<Option<Run>>;

    /// Every run of a pipeline, oldest first
    async fn list(&self, pipeline: &str) -> Result<Vec<Run>>;
}

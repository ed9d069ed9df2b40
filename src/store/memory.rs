// ABOUTME: In-memory run store for tests and rehearsal runs without a state directory
// ABOUTME: Keeps the latest snapshot of every run in insertion order

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::{Result, RunStore, StoreError};
use crate::engine::run::Run;

#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<IndexMap<String, Run>>,
    saves: RwLock<usize>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls received
    pub async fn save_count(&self) -> usize {
        *self.saves.read().await
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, run: &Run) -> Result<()> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        *self.saves.write().await += 1;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Run> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn latest(&self, pipeline: &str) -> Result<Option<Run>> {
        Ok(self.list(pipeline).await?.pop())
    }

    async fn list(&self, pipeline: &str) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.pipeline == pipeline)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }
}

// ABOUTME: File-backed run store writing one JSON document per run
// ABOUTME: Replaces documents atomically through a temporary file and rename

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{Result, RunStore, StoreError};
use crate::engine::run::Run;

/// Stores runs as `<root>/<pipeline>/<run_id>.json`
#[derive(Debug, Clone)]
pub struct FileRunStore {
    root: PathBuf,
}

impl FileRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_path(&self, pipeline: &str, run_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(safe_component(pipeline)?)
            .join(format!("{}.json", safe_component(run_id)?)))
    }

    async fn read_run(path: &Path) -> Result<Run> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn pipeline_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, run: &Run) -> Result<()> {
        let path = self.run_path(&run.pipeline, &run.id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(run)?;
        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;

        debug!("Run {} saved to {}", run.id, path.display());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Run> {
        let file_name = format!("{}.json", safe_component(run_id)?);
        for dir in self.pipeline_dirs().await? {
            let candidate = dir.join(&file_name);
            if fs::try_exists(&candidate).await? {
                return Self::read_run(&candidate).await;
            }
        }
        Err(StoreError::NotFound {
            run_id: run_id.to_string(),
        })
    }

    async fn latest(&self, pipeline: &str) -> Result<Option<Run>> {
        Ok(self.list(pipeline).await?.pop())
    }

    async fn list(&self, pipeline: &str) -> Result<Vec<Run>> {
        let dir = self.root.join(safe_component(pipeline)?);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                runs.push(Self::read_run(&path).await?);
            }
        }
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }
}

/// Reject names that would escape the store directory
fn safe_component(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidId(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::TaskGraph;
    use crate::engine::run::{RunStatus, TaskState, Window};
    use crate::engine::task::{Task, TaskKind};
    use tempfile::TempDir;

    fn graph() -> TaskGraph {
        TaskGraph::build(vec![
            Task::new("init", TaskKind::Init),
            Task::new("stage", TaskKind::Stage).depends_on(["init"]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_keeps_event_log() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileRunStore::new(temp_dir.path());
        let graph = graph();
        let mut run = Run::new("sparkify", Window::default(), &graph);
        run.transition("init", TaskState::Ready, None).unwrap();
        run.transition("init", TaskState::Running, None).unwrap();
        run.transition("init", TaskState::Succeeded, None).unwrap();
        run.finalize().unwrap();

        store.save(&run).await.unwrap();

        let path = store.run_path("sparkify", &run.id).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = store.load(&run.id).await.unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.events, run.events);
        assert_eq!(loaded.state("init"), Some(TaskState::Succeeded));
        assert_eq!(loaded.state("stage"), Some(TaskState::Abandoned));
    }

    #[tokio::test]
    async fn test_latest_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileRunStore::new(temp_dir.path());
        let graph = graph();

        let first = Run::new("sparkify", Window::default(), &graph);
        let mut second = Run::new("sparkify", Window::default(), &graph);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        store.save(&second).await.unwrap();
        store.save(&first).await.unwrap();

        let runs = store.list("sparkify").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(store.latest("sparkify").await.unwrap().unwrap().id, second.id);
        assert!(store.list("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_run() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileRunStore::new(temp_dir.path().join("absent"));
        assert!(matches!(
            store.load("nope").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let store = FileRunStore::new("/tmp/runs");
        assert!(store.run_path("../etc", "x").is_err());
        assert!(store.run_path("p", "a/b").is_err());
    }
}

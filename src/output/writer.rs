// ABOUTME: Output writers for report destinations (stdout, files)
// ABOUTME: Handles writing formatted run reports to their configured destination

use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::config::OutputDestination;
use super::error::{OutputError, Result};

#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn write(&self, content: &str, destination: &OutputDestination) -> Result<()>;
}

pub struct StdoutWriter;

pub struct FileWriter;

impl Default for StdoutWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutputWriter for StdoutWriter {
    async fn write(&self, content: &str, _destination: &OutputDestination) -> Result<()> {
        println!("{}", content);
        debug!("Output written to stdout ({} chars)", content.len());
        Ok(())
    }
}

impl Default for FileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutputWriter for FileWriter {
    async fn write(&self, content: &str, destination: &OutputDestination) -> Result<()> {
        let OutputDestination::File {
            path,
            create_dirs,
            append,
        } = destination
        else {
            return Err(OutputError::WriteError {
                message: "file writer needs a file destination".to_string(),
            });
        };

        if *create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| OutputError::WriteError {
                        message: format!("Failed to create directory {}: {}", parent.display(), e),
                    })?;
            }
        }

        if *append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| write_error(path, e))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| write_error(path, e))?;
        } else {
            fs::write(path, content)
                .await
                .map_err(|e| write_error(path, e))?;
        }

        info!("Output written to {}", path.display());
        Ok(())
    }
}

fn write_error(path: &Path, e: std::io::Error) -> OutputError {
    OutputError::WriteError {
        message: format!("Failed to write {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stdout_writer() {
        let writer = StdoutWriter::new();
        assert!(writer
            .write("test output", &OutputDestination::Stdout)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_file_writer_with_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reports").join("run.json");
        let destination = OutputDestination::new_file(&path);

        FileWriter::new().write("{}", &destination).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_file_writer_append() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("runs.log");
        let destination = OutputDestination::File {
            path: path.clone(),
            create_dirs: false,
            append: true,
        };

        let writer = FileWriter::new();
        writer.write("first\n", &destination).await.unwrap();
        writer.write("second\n", &destination).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_file_writer_rejects_stdout_destination() {
        assert!(FileWriter::new()
            .write("x", &OutputDestination::Stdout)
            .await
            .is_err());
    }
}

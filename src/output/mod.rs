// ABOUTME: Output handler module for run report formatting and delivery
// ABOUTME: Handles text/JSON/YAML formatting and output to stdout or files

pub mod config;
pub mod error;
pub mod formatter;
pub mod writer;

use std::collections::HashMap;

pub use self::config::{OutputConfig, OutputDestination, OutputOptions};
pub use self::error::{OutputError, Result};
use self::formatter::{JsonFormatter, OutputFormatter, TextFormatter, YamlFormatter};
use self::writer::{FileWriter, OutputWriter, StdoutWriter};
use crate::engine::run::Run;

pub struct OutputHandler {
    formatters: HashMap<String, Box<dyn OutputFormatter>>,
    stdout: StdoutWriter,
    file: FileWriter,
}

impl OutputHandler {
    pub fn new() -> Self {
        let mut handler = Self {
            formatters: HashMap::new(),
            stdout: StdoutWriter::new(),
            file: FileWriter::new(),
        };

        handler.register_formatter("json", Box::new(JsonFormatter::new_pretty()));
        handler.register_formatter("compact", Box::new(JsonFormatter::new()));
        handler.register_formatter("yaml", Box::new(YamlFormatter::new()));
        handler.register_formatter("text", Box::new(TextFormatter::new()));

        handler
    }

    pub fn register_formatter(&mut self, name: &str, formatter: Box<dyn OutputFormatter>) {
        self.formatters.insert(name.to_string(), formatter);
    }

    pub async fn render_run(&self, run: &Run, config: &OutputConfig) -> Result<String> {
        let formatter =
            self.formatters
                .get(&config.format)
                .ok_or_else(|| OutputError::FormatterNotFound {
                    format: config.format.clone(),
                })?;
        formatter.format_run(run, config).await
    }

    /// Format a run and write it to every configured destination
    pub async fn output_run(&self, run: &Run, config: &OutputConfig) -> Result<()> {
        let formatted = self.render_run(run, config).await?;

        for destination in &config.destinations {
            let writer: &dyn OutputWriter = match destination {
                OutputDestination::Stdout => &self.stdout,
                OutputDestination::File { .. } => &self.file,
            };
            writer.write(&formatted, destination).await?;
        }

        Ok(())
    }

    pub fn list_formatters(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.formatters.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new()
    }
}

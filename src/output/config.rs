// ABOUTME: Configuration types for output handling
// ABOUTME: Defines structures for configuring report formatting and destinations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_destinations")]
    pub destinations: Vec<OutputDestination>,
    #[serde(default)]
    pub options: OutputOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputDestination {
    Stdout,
    File {
        path: PathBuf,
        #[serde(default = "default_true")]
        create_dirs: bool,
        #[serde(default)]
        append: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOptions {
    #[serde(default)]
    pub include_timestamps: bool,
    #[serde(default = "default_true")]
    pub include_task_results: bool,
    /// Append the full transition log
    #[serde(default)]
    pub include_events: bool,
    /// Only list tasks that did not succeed
    #[serde(default)]
    pub only_unsuccessful: bool,
    #[serde(default)]
    pub max_message_length: Option<usize>,
}

fn default_format() -> String {
    "text".to_string()
}

fn default_destinations() -> Vec<OutputDestination> {
    vec![OutputDestination::Stdout]
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            destinations: default_destinations(),
            options: OutputOptions::default(),
        }
    }
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            include_timestamps: false,
            include_task_results: true,
            include_events: false,
            only_unsuccessful: false,
            max_message_length: None,
        }
    }
}

impl OutputConfig {
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_destination(mut self, destination: OutputDestination) -> Self {
        self.destinations = vec![destination];
        self
    }
}

impl OutputDestination {
    pub fn new_file(path: impl Into<PathBuf>) -> Self {
        OutputDestination::File {
            path: path.into(),
            create_dirs: true,
            append: false,
        }
    }
}

/// Shorten `text` to at most `max_len` bytes on a character boundary
pub(crate) fn truncate(text: &str, max_len: Option<usize>) -> String {
    match max_len {
        Some(max_len) if text.len() > max_len => {
            let mut end = max_len;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... [truncated]", &text[..end])
        }
        _ => text.to_string(),
    }
}

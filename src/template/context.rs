// ABOUTME: Template context built from a run and its pipeline variables
// ABOUTME: Exposes run id, pipeline name, window bounds, and date stamps to payload templates

use indexmap::IndexMap;
use serde::Serialize;

use super::error::{Result, TemplateError};
use crate::engine::run::Window;

/// Values visible to `{{ }}` placeholders.
///
/// Fields are top-level names (`{{ds}}`, `{{window_start}}`); pipeline
/// variables live under `variables` (`{{variables.bucket}}`).
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub run_id: String,
    pub pipeline: String,
    pub task_id: String,
    pub window_start: String,
    pub window_end: String,
    pub ds: String,
    pub ds_nodash: String,
    pub variables: IndexMap<String, String>,
}

impl TemplateContext {
    pub fn for_run(
        run_id: &str,
        pipeline: &str,
        window: &Window,
        variables: &IndexMap<String, String>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            pipeline: pipeline.to_string(),
            task_id: String::new(),
            window_start: window.start.to_rfc3339(),
            window_end: window.end.to_rfc3339(),
            ds: window.ds(),
            ds_nodash: window.start.format("%Y%m%d").to_string(),
            variables: variables.clone(),
        }
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Convert context to JSON for handlebars rendering
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(TemplateError::JsonError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_context_exposes_window_stamps() {
        let start = Utc.with_ymd_and_hms(2019, 1, 12, 5, 0, 0).unwrap();
        let window = Window::new(start, start + chrono::Duration::hours(1));
        let mut variables = IndexMap::new();
        variables.insert("bucket".to_string(), "udacity-dend".to_string());

        let context = TemplateContext::for_run("run-1", "sparkify", &window, &variables);
        let json = context.to_json().unwrap();

        assert_eq!(json["ds"], "2019-01-12");
        assert_eq!(json["ds_nodash"], "20190112");
        assert_eq!(json["window_start"], "2019-01-12T05:00:00+00:00");
        assert_eq!(json["variables"]["bucket"], "udacity-dend");
    }
}

// ABOUTME: Execution context handed to a task attempt
// ABOUTME: Carries run identity, the logical window, and injected warehouse and credential handles

use indexmap::IndexMap;
use std::sync::Arc;

use super::run::Window;
use crate::template::{Result as TemplateResult, TemplateContext, TemplateEngine};
use crate::warehouse::{CredentialProvider, WarehouseClient};

/// Everything an attempt may touch. Connections and credentials are passed
/// in explicitly; there is no process-wide state.
#[derive(Clone)]
pub struct ExecutionContext {
    pub pipeline: String,
    pub run_id: String,
    pub task_id: String,
    pub attempt: u32,
    pub window: Window,
    pub warehouse: Arc<dyn WarehouseClient>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub template_context: TemplateContext,
    template_engine: TemplateEngine,
}

impl ExecutionContext {
    pub fn new(
        pipeline: &str,
        run_id: &str,
        window: Window,
        warehouse: Arc<dyn WarehouseClient>,
        credentials: Arc<dyn CredentialProvider>,
        variables: &IndexMap<String, String>,
    ) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            run_id: run_id.to_string(),
            task_id: String::new(),
            attempt: 0,
            window,
            warehouse,
            credentials,
            template_context: TemplateContext::for_run(run_id, pipeline, &window, variables),
            template_engine: TemplateEngine::new(),
        }
    }

    /// Derive the context of one attempt of `task_id`
    pub fn for_attempt(&self, task_id: &str, attempt: u32) -> Self {
        let mut context = self.clone();
        context.task_id = task_id.to_string();
        context.attempt = attempt;
        context.template_context.task_id = task_id.to_string();
        context
    }

    /// Resolve `{{ }}` placeholders in a task payload
    pub fn render_payload(&self, payload: &serde_yaml::Value) -> TemplateResult<serde_yaml::Value> {
        self.template_engine
            .resolve_payload(payload, &self.template_context)
    }

    pub fn render(&self, template: &str) -> TemplateResult<String> {
        self.template_engine.render(template, &self.template_context)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("pipeline", &self.pipeline)
            .field("run_id", &self.run_id)
            .field("task_id", &self.task_id)
            .field("attempt", &self.attempt)
            .field("window", &self.window)
            .finish()
    }
}

// ABOUTME: Pipeline validation logic and dependency checking
// ABOUTME: Collects every structural and configuration problem into a single report

use std::collections::{HashSet, VecDeque};

use super::error::ValidationError;
use super::pipeline::Pipeline;
use crate::engine::error::GraphError;
use crate::engine::graph::TaskGraph;
use crate::engine::task::TaskKind;
use crate::tasks::TaskRegistry;
use crate::template::TemplateEngine;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

pub struct PipelineValidator {
    strict_mode: bool,
    task_registry: TaskRegistry,
    template_engine: TemplateEngine,
}

impl PipelineValidator {
    pub fn new() -> Self {
        Self {
            strict_mode: false,
            task_registry: TaskRegistry::new(),
            template_engine: TemplateEngine::new(),
        }
    }

    /// In strict mode warnings also make the report invalid
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_task_registry(mut self, task_registry: TaskRegistry) -> Self {
        self.task_registry = task_registry;
        self
    }

    /// Validate a complete pipeline
    pub fn validate(&self, pipeline: &Pipeline) -> ValidationReport {
        let mut report = ValidationReport::new();

        self.validate_dependencies(pipeline, &mut report);
        self.validate_task_configs(pipeline, &mut report);
        self.validate_templates(pipeline, &mut report);
        self.validate_load_policies(pipeline, &mut report);
        self.check_quality_retries(pipeline, &mut report);
        self.check_unreachable_tasks(pipeline, &mut report);

        report.is_valid =
            report.errors.is_empty() && !(self.strict_mode && report.has_warnings());
        report
    }

    fn validate_dependencies(&self, pipeline: &Pipeline, report: &mut ValidationReport) {
        for (task_id, task) in &pipeline.tasks {
            for dep in &task.depends_on {
                if !pipeline.tasks.contains_key(dep) {
                    report.errors.push(ValidationError::UnknownDependency {
                        task: task_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Forward references are allowed while building, so only cycles
        // surface here; unknown dependencies were reported above.
        let mut graph = TaskGraph::new();
        for (task_id, task) in &pipeline.tasks {
            let task = task.to_task(task_id, &pipeline.defaults.retry);
            if let Err(GraphError::CycleError { path }) = graph.add_task(task) {
                report
                    .errors
                    .push(ValidationError::CircularDependency { tasks: path });
            }
        }
    }

    fn validate_task_configs(&self, pipeline: &Pipeline, report: &mut ValidationReport) {
        for (task_id, task) in &pipeline.tasks {
            if !self.task_registry.supports(task.kind) {
                report.errors.push(ValidationError::InvalidTaskConfig {
                    task: task_id.clone(),
                    reason: format!("no implementation registered for {}", task.kind),
                });
                continue;
            }

            let payload = pipeline.effective_payload(task);
            if let Err(e) = self
                .task_registry
                .validate_task_config(task_id, task.kind, &payload)
            {
                report.errors.push(ValidationError::InvalidTaskConfig {
                    task: task_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn validate_templates(&self, pipeline: &Pipeline, report: &mut ValidationReport) {
        for (task_id, task) in &pipeline.tasks {
            if let Err(e) = self.template_engine.validate_payload(&task.config) {
                report.errors.push(ValidationError::InvalidTemplate {
                    field: format!("tasks.{}.config", task_id),
                    error: e.to_string(),
                });
            }
        }
    }

    fn validate_load_policies(&self, pipeline: &Pipeline, report: &mut ValidationReport) {
        let tables: HashSet<String> = pipeline
            .dimension_tables()
            .into_iter()
            .map(|table| table.to_lowercase())
            .collect();

        for table in pipeline.load_policies.keys() {
            if !tables.contains(&table.to_lowercase()) {
                report.errors.push(ValidationError::UnknownLoadPolicyTable {
                    table: table.clone(),
                });
            }
        }
    }

    /// A mismatch is fatal unless the check opts in, so a retry budget on a
    /// check without `retry_on_mismatch` only covers query failures
    fn check_quality_retries(&self, pipeline: &Pipeline, report: &mut ValidationReport) {
        for (task_id, task) in &pipeline.tasks {
            if task.kind != TaskKind::QualityCheck {
                continue;
            }
            let retry = task.effective_retry(&pipeline.defaults.retry);
            let retries_mismatch = task
                .config
                .get("retry_on_mismatch")
                .and_then(serde_yaml::Value::as_bool)
                .unwrap_or(false);
            if retry.max_attempts > 1 && !retries_mismatch {
                report.warnings.push(format!(
                    "Quality check '{}' has {} attempts but retry_on_mismatch is unset; \
                     mismatches fail on the first attempt",
                    task_id, retry.max_attempts
                ));
            }
        }
    }

    /// Check for tasks that can never be executed
    fn check_unreachable_tasks(&self, pipeline: &Pipeline, report: &mut ValidationReport) {
        let root_tasks: Vec<String> = pipeline
            .tasks
            .iter()
            .filter(|(_, task)| task.depends_on.is_empty())
            .map(|(task_id, _)| task_id.clone())
            .collect();

        if root_tasks.is_empty() {
            report
                .warnings
                .push("No root tasks found - all tasks have dependencies".to_string());
            return;
        }

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from(root_tasks);

        while let Some(current) = queue.pop_front() {
            if reachable.insert(current.clone()) {
                for dependent in pipeline.get_dependent_tasks(&current) {
                    if !reachable.contains(&dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        for task_id in pipeline.tasks.keys() {
            if !reachable.contains(task_id) {
                report
                    .warnings
                    .push(format!("Task '{}' is unreachable", task_id));
            }
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl Default for PipelineValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str) -> ValidationReport {
        let pipeline = Pipeline::from_yaml(yaml).unwrap();
        PipelineValidator::new().validate(&pipeline)
    }

    #[test]
    fn test_circular_dependency_detection() {
        let report = validate(
            r#"
name: circular
tasks:
  task_a:
    kind: init
    depends_on: [task_b]
    config: { create: ["CREATE TABLE a (id int)"] }
  task_b:
    kind: init
    depends_on: [task_a]
    config: { create: ["CREATE TABLE b (id int)"] }
"#,
        );

        assert!(report.has_errors());
        assert_eq!(
            report.errors[0],
            ValidationError::CircularDependency {
                tasks: vec![
                    "task_a".to_string(),
                    "task_b".to_string(),
                    "task_a".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let report = validate(
            r#"
name: unknown_dep
tasks:
  load:
    kind: load_fact
    depends_on: [nonexistent_task]
    config: { table: songplays, select: SELECT 1 }
"#,
        );

        assert!(!report.is_valid);
        assert!(matches!(
            report.errors[0],
            ValidationError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn test_invalid_task_config() {
        let report = validate(
            r#"
name: bad_stage
tasks:
  stage:
    kind: stage
    config: { table: staging_events, bucket: udacity-dend, path: log_data }
"#,
        );

        assert!(matches!(
            &report.errors[0],
            ValidationError::InvalidTaskConfig { task, .. } if task == "stage"
        ));
    }

    #[test]
    fn test_load_policy_for_unknown_table() {
        let report = validate(
            r#"
name: policies
load_policies: { artists: delete_then_load }
tasks:
  load_users:
    kind: load_dimension
    config: { table: users, select: SELECT 1 }
"#,
        );

        assert_eq!(
            report.errors,
            vec![ValidationError::UnknownLoadPolicyTable {
                table: "artists".to_string()
            }]
        );
    }

    #[test]
    fn test_quality_retry_warning() {
        let yaml = r#"
name: checks
defaults:
  retry: { max_attempts: 3, delay: 5m }
tasks:
  check:
    kind: quality_check
    config: { sql: SELECT 1, expected: [[1]] }
"#;
        let report = validate(yaml);
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);

        let pipeline = Pipeline::from_yaml(yaml).unwrap();
        let strict = PipelineValidator::new()
            .with_strict_mode(true)
            .validate(&pipeline);
        assert!(!strict.is_valid);
    }

    #[test]
    fn test_unknown_template_is_reported() {
        let report = validate(
            r#"
name: templates
tasks:
  load:
    kind: load_fact
    config: { table: songplays, select: "SELECT {{#if}} 1" }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_valid_pipeline() {
        let report = validate(
            r#"
name: valid
tasks:
  create:
    kind: init
    config: { create: ["CREATE TABLE users (userid int)"] }
  load_users:
    kind: load_dimension
    depends_on: [create]
    config: { table: users, select: SELECT 1 }
"#,
        );

        assert!(!report.has_errors());
        assert!(!report.has_warnings());
        assert!(report.is_valid);
    }
}

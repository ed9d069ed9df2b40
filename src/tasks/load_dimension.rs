// ABOUTME: LoadDimension task implementation populating a dimension relation
// ABOUTME: Applies the Append or DeleteThenLoad policy around a single insert-select

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{insert_select, parse_config, require_non_empty, Result, TaskImplementation};
use crate::engine::context::ExecutionContext;
use crate::engine::error::TaskError;
use crate::engine::result::TaskOutput;
use crate::engine::task::{LoadPolicy, TaskKind};

pub struct LoadDimensionTask;

/// ```yaml
/// kind: load_dimension
/// config:
///   table: users
///   select: SELECT distinct userid, firstname, ... FROM staging_events
///   policy: delete_then_load
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadDimensionConfig {
    pub table: String,
    pub select: String,
    #[serde(default)]
    pub policy: LoadPolicy,
}

/// Statements one attempt issues, in order
pub fn plan_statements(config: &LoadDimensionConfig) -> Vec<String> {
    let mut statements = Vec::with_capacity(2);
    if config.policy == LoadPolicy::DeleteThenLoad {
        statements.push(format!("TRUNCATE TABLE {}", config.table));
    }
    statements.push(insert_select(&config.table, &config.select));
    statements
}

#[async_trait]
impl TaskImplementation for LoadDimensionTask {
    async fn execute(
        &self,
        config: serde_yaml::Value,
        context: ExecutionContext,
    ) -> Result<TaskOutput> {
        let config: LoadDimensionConfig = parse_config(&context.task_id, config)?;
        let mut output = TaskOutput::new(format!(
            "loaded dimension table {} ({})",
            config.table, config.policy
        ));

        for sql in plan_statements(&config) {
            info!("{}", sql);
            context
                .warehouse
                .execute(&sql)
                .await
                .map_err(|e| TaskError::LoadFailure {
                    table: config.table.clone(),
                    message: e.to_string(),
                })?;
            output.statements.push(sql);
        }

        Ok(output)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::LoadDimension
    }

    fn validate_config(&self, task_id: &str, config: &serde_yaml::Value) -> Result<()> {
        let config: LoadDimensionConfig = parse_config(task_id, config.clone())?;
        require_non_empty(task_id, "table", &config.table)?;
        require_non_empty(task_id, "select", &config.select)
    }
}

// ABOUTME: Init task implementation recreating the warehouse schema
// ABOUTME: Runs ordered drop statements followed by ordered create statements

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_config, Result, TaskImplementation};
use crate::engine::context::ExecutionContext;
use crate::engine::error::TaskError;
use crate::engine::result::TaskOutput;
use crate::engine::task::TaskKind;

pub struct InitTask;

/// ```yaml
/// kind: init
/// config:
///   drop:
///     - DROP TABLE IF EXISTS songplays
///   create:
///     - CREATE TABLE IF NOT EXISTS songplays (...)
/// ```
///
/// Drops should use `IF EXISTS` so the task can be repeated when a run is
/// retried from the start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitConfig {
    #[serde(default)]
    pub drop: Vec<String>,
    #[serde(default)]
    pub create: Vec<String>,
}

impl InitConfig {
    fn statements(&self) -> impl Iterator<Item = &String> {
        self.drop.iter().chain(self.create.iter())
    }
}

#[async_trait]
impl TaskImplementation for InitTask {
    async fn execute(
        &self,
        config: serde_yaml::Value,
        context: ExecutionContext,
    ) -> Result<TaskOutput> {
        let config: InitConfig = parse_config(&context.task_id, config)?;
        let mut output = TaskOutput::default();

        for sql in config.statements() {
            info!("{}", sql);
            context
                .warehouse
                .execute(sql)
                .await
                .map_err(|e| TaskError::SchemaInitFailure {
                    message: format!("{} ({})", e, sql),
                })?;
            output.statements.push(sql.clone());
        }

        output.message = Some(format!(
            "dropped {} and created {} relations",
            config.drop.len(),
            config.create.len()
        ));
        Ok(output)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Init
    }

    fn validate_config(&self, task_id: &str, config: &serde_yaml::Value) -> Result<()> {
        let config: InitConfig = parse_config(task_id, config.clone())?;
        if config.statements().next().is_none() {
            return Err(TaskError::InvalidConfiguration {
                task_id: task_id.to_string(),
                reason: "init needs at least one drop or create statement".to_string(),
            });
        }
        Ok(())
    }
}

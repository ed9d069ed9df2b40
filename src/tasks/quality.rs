// ABOUTME: QualityCheck task implementation comparing query results to expected rows
// ABOUTME: Reports mismatches as typed failures carrying both row sequences

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{parse_config, require_non_empty, Result, TaskImplementation};
use crate::engine::context::ExecutionContext;
use crate::engine::error::TaskError;
use crate::engine::result::TaskOutput;
use crate::engine::task::TaskKind;
use crate::warehouse::{format_rows, Row};

pub struct QualityCheckTask;

/// ```yaml
/// kind: quality_check
/// config:
///   sql: SELECT * FROM users WHERE userid=8
///   expected:
///     - [8, Kaylee, Summers, F, free]
/// ```
///
/// `retry_on_mismatch` opts a check into its retry budget for mismatches,
/// for reads that may race a load. Query failures are always retryable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityCheckConfig {
    pub sql: String,
    #[serde(default)]
    pub expected: Vec<Row>,
    #[serde(default)]
    pub retry_on_mismatch: bool,
}

/// Exact, order-sensitive comparison
pub fn check_rows(config: &QualityCheckConfig, actual: Vec<Row>) -> Result<()> {
    if actual == config.expected {
        Ok(())
    } else {
        Err(TaskError::QualityAssertion {
            expected: config.expected.clone(),
            actual,
            retry_on_mismatch: config.retry_on_mismatch,
        })
    }
}

#[async_trait]
impl TaskImplementation for QualityCheckTask {
    async fn execute(
        &self,
        config: serde_yaml::Value,
        context: ExecutionContext,
    ) -> Result<TaskOutput> {
        let config: QualityCheckConfig = parse_config(&context.task_id, config)?;

        info!("Validate data using query: {}", config.sql);
        let actual = context.warehouse.query(&config.sql).await?;

        if let Err(e) = check_rows(&config, actual) {
            error!("{}: {}", context.task_id, e);
            return Err(e);
        }

        Ok(TaskOutput::new(format!(
            "validated {}",
            format_rows(&config.expected)
        ))
        .with_statement(config.sql))
    }

    fn kind(&self) -> TaskKind {
        TaskKind::QualityCheck
    }

    fn validate_config(&self, task_id: &str, config: &serde_yaml::Value) -> Result<()> {
        let config: QualityCheckConfig = parse_config(task_id, config.clone())?;
        require_non_empty(task_id, "sql", &config.sql)
    }
}

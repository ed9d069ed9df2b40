// ABOUTME: LoadFact task implementation populating the append-only fact relation
// ABOUTME: Issues a single INSERT INTO ... (SELECT ...) over the staged data

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{insert_select, parse_config, require_non_empty, Result, TaskImplementation};
use crate::engine::context::ExecutionContext;
use crate::engine::error::TaskError;
use crate::engine::result::TaskOutput;
use crate::engine::task::TaskKind;

/// Not idempotent: re-running against a partially populated table duplicates
/// rows. A retry of the whole run goes through Init first, which recreates
/// the fact relation.
pub struct LoadFactTask;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadFactConfig {
    pub table: String,
    pub select: String,
}

#[async_trait]
impl TaskImplementation for LoadFactTask {
    async fn execute(
        &self,
        config: serde_yaml::Value,
        context: ExecutionContext,
    ) -> Result<TaskOutput> {
        let config: LoadFactConfig = parse_config(&context.task_id, config)?;
        let sql = insert_select(&config.table, &config.select);

        info!("{}", sql);
        context
            .warehouse
            .execute(&sql)
            .await
            .map_err(|e| TaskError::LoadFailure {
                table: config.table.clone(),
                message: e.to_string(),
            })?;

        Ok(TaskOutput::new(format!("loaded fact table {}", config.table)).with_statement(sql))
    }

    fn kind(&self) -> TaskKind {
        TaskKind::LoadFact
    }

    fn validate_config(&self, task_id: &str, config: &serde_yaml::Value) -> Result<()> {
        let config: LoadFactConfig = parse_config(task_id, config.clone())?;
        require_non_empty(task_id, "table", &config.table)?;
        require_non_empty(task_id, "select", &config.select)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::tasks::testing::context_for;
    use crate::warehouse::MemoryWarehouse;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_insert_select_into_fact_table() {
        let select = "SELECT md5(sessionid || start_time) songplay_id, userid FROM staging_events";
        let warehouse = Arc::new(
            MemoryWarehouse::new()
                .with_table("songplays", Vec::new())
                .with_query_result(select, vec![row!["a1", 8], row!["b2", 15]]),
        );
        let config = serde_yaml::to_value(LoadFactConfig {
            table: "songplays".to_string(),
            select: select.to_string(),
        })
        .unwrap();

        let output = LoadFactTask
            .execute(config, context_for(warehouse.clone(), "load_songplays"))
            .await
            .unwrap();

        assert_eq!(
            output.statements,
            vec![format!("INSERT INTO songplays ({})", select)]
        );
        assert_eq!(warehouse.table("songplays").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_relation_is_load_failure() {
        let warehouse = Arc::new(MemoryWarehouse::new().with_query_result("SELECT 1", vec![]));
        let config: serde_yaml::Value =
            serde_yaml::from_str("table: songplays\nselect: SELECT 1").unwrap();

        let err = LoadFactTask
            .execute(config, context_for(warehouse, "load_songplays"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::LoadFailure { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_fields() {
        let config: serde_yaml::Value =
            serde_yaml::from_str("table: songplays\nselect: SELECT 1\npolicy: append").unwrap();
        assert!(LoadFactTask.validate_config("f", &config).is_err());
    }
}

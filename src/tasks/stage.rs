// ABOUTME: Stage task implementation bulk-loading object storage into a staging relation
// ABOUTME: Renders a single COPY directive with credentials that are masked in logs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{parse_config, require_non_empty, Result, TaskImplementation};
use crate::engine::context::ExecutionContext;
use crate::engine::error::TaskError;
use crate::engine::result::TaskOutput;
use crate::engine::task::TaskKind;
use crate::warehouse::credentials::MASK;
use crate::warehouse::Credentials;

pub struct StageTask;

/// ```yaml
/// kind: stage
/// config:
///   table: staging_events
///   bucket: udacity-dend
///   path: /log_data/2018/11/
///   json_path: s3://udacity-dend/log_json_path.json   # optional, defaults to auto
///   region: us-west-2                                  # optional
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub table: String,
    pub bucket: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// One all-or-nothing bulk load from object storage
#[derive(Debug, Clone, PartialEq)]
pub struct BulkLoadDirective {
    pub table: String,
    pub source: String,
    pub json_path: String,
    pub region: Option<String>,
}

impl BulkLoadDirective {
    pub fn from_config(config: &StageConfig) -> Self {
        Self {
            table: config.table.clone(),
            source: format!("s3://{}{}", config.bucket, config.path),
            json_path: config
                .json_path
                .clone()
                .unwrap_or_else(|| "auto".to_string()),
            region: config.region.clone(),
        }
    }

    pub fn to_sql(&self, credentials: &Credentials) -> String {
        self.render(
            &credentials.access_key,
            &credentials.secret_key,
            credentials.session_token.as_deref(),
        )
    }

    /// The directive with every credential replaced by `***`
    pub fn to_masked_sql(&self, credentials: &Credentials) -> String {
        self.render(MASK, MASK, credentials.session_token.as_ref().map(|_| MASK))
    }

    fn render(&self, access_key: &str, secret_key: &str, session_token: Option<&str>) -> String {
        let mut sql = format!(
            "COPY {} FROM '{}' ACCESS_KEY_ID '{}' SECRET_ACCESS_KEY '{}'",
            self.table, self.source, access_key, secret_key
        );
        if let Some(token) = session_token {
            sql.push_str(&format!(" SESSION_TOKEN '{}'", token));
        }
        if let Some(region) = &self.region {
            sql.push_str(&format!(" REGION '{}'", region));
        }
        sql.push_str(&format!(" JSON '{}'", self.json_path));
        sql
    }
}

#[async_trait]
impl TaskImplementation for StageTask {
    async fn execute(
        &self,
        config: serde_yaml::Value,
        context: ExecutionContext,
    ) -> Result<TaskOutput> {
        let config: StageConfig = parse_config(&context.task_id, config)?;
        let directive = BulkLoadDirective::from_config(&config);

        let credentials = context
            .credentials
            .get_credentials()
            .await
            .map_err(|e| TaskError::LoadFailure {
                table: config.table.clone(),
                message: e.to_string(),
            })?;

        let masked = directive.to_masked_sql(&credentials);
        info!("Staging {} from {}", directive.table, directive.source);
        debug!("{}", masked);

        context
            .warehouse
            .execute(&directive.to_sql(&credentials))
            .await
            .map_err(|e| TaskError::LoadFailure {
                table: config.table.clone(),
                // The driver may echo the statement back; never surface it.
                message: credentials.mask(&e.to_string()),
            })?;

        Ok(TaskOutput::new(format!("staged {} from {}", directive.table, directive.source))
            .with_statement(masked))
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Stage
    }

    fn validate_config(&self, task_id: &str, config: &serde_yaml::Value) -> Result<()> {
        let config: StageConfig = parse_config(task_id, config.clone())?;
        require_non_empty(task_id, "table", &config.table)?;
        require_non_empty(task_id, "bucket", &config.bucket)?;
        if !config.path.is_empty() && !config.path.starts_with('/') {
            return Err(TaskError::InvalidConfiguration {
                task_id: task_id.to_string(),
                reason: format!("path '{}' must start with '/'", config.path),
            });
        }
        Ok(())
    }
}

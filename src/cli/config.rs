// ABOUTME: Configuration management for the starflow command line
// ABOUTME: Loads settings from a YAML file and overlays environment variables

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::executor::DEFAULT_MAX_CONCURRENT;
use crate::warehouse::{
    CredentialProvider, Credentials, EnvCredentialProvider, StaticCredentialProvider,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Directory run documents are written to
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub aws: AwsConfig,

    /// Variables merged under each pipeline's own `variables`
    #[serde(default)]
    pub variables: IndexMap<String, String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            state_dir: None,
            aws: AwsConfig::default(),
            variables: IndexMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AwsConfig {
    /// Keys configured explicitly, if both halves are present
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(Credentials {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                session_token: self.session_token.clone(),
            }),
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid configuration in {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = [
            PathBuf::from("starflow.yaml"),
            PathBuf::from("starflow.yml"),
            PathBuf::from(".starflow.yaml"),
            PathBuf::from(".starflow.yml"),
        ];

        for path in &possible_paths {
            if path.exists() {
                return path.clone();
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".starflow").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from("starflow.yaml")
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(region) = std::env::var("AWS_REGION") {
            self.aws.region = Some(region);
        }
        if let Ok(access_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            self.aws.access_key_id = Some(access_key);
        }
        if let Ok(secret_key) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            self.aws.secret_access_key = Some(secret_key);
        }
        if let Ok(session_token) = std::env::var("AWS_SESSION_TOKEN") {
            self.aws.session_token = Some(session_token);
        }

        if let Ok(level) = std::env::var("STARFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STARFLOW_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(state_dir) = std::env::var("STARFLOW_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(state_dir));
        }
        if let Ok(max_tasks) = std::env::var("STARFLOW_MAX_CONCURRENT") {
            self.max_concurrent = max_tasks
                .parse()
                .with_context(|| format!("STARFLOW_MAX_CONCURRENT is not a number: {}", max_tasks))?;
        }

        Ok(())
    }

    pub fn merge_variables(&mut self, vars: IndexMap<String, String>) {
        self.variables.extend(vars);
    }

    /// Where runs are persisted when no `--state-dir` is given
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".starflow").join("runs"))
    }

    /// Static keys when configured, otherwise read from the environment per attempt
    pub fn credential_provider(&self) -> Arc<dyn CredentialProvider> {
        match self.aws.credentials() {
            Some(credentials) => Arc::new(StaticCredentialProvider::new(credentials)),
            None => Arc::new(EnvCredentialProvider::new()),
        }
    }
}

// ABOUTME: Credential providers for object-storage bulk loads
// ABOUTME: Supplies access keys from static configuration or the process environment

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{CredentialProvider, Result, WarehouseError};

/// Stand-in for every secret in rendered SQL and error messages
pub const MASK: &str = "***";

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    /// Replace every non-empty key and token occurring in `text` with [`MASK`]
    pub fn mask(&self, text: &str) -> String {
        let secrets = [
            Some(self.access_key.as_str()),
            Some(self.secret_key.as_str()),
            self.session_token.as_deref(),
        ];
        secrets
            .into_iter()
            .flatten()
            .filter(|secret| !secret.is_empty())
            .fold(text.to_string(), |masked, secret| masked.replace(secret, MASK))
    }
}

// Keys must never end up in logs or run documents.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &MASK)
            .field("secret_key", &MASK)
            .field("session_token", &self.session_token.as_ref().map(|_| MASK))
            .finish()
    }
}

pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
/// `AWS_SESSION_TOKEN` at call time, so rotated keys are picked up between
/// attempts.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get_credentials(&self) -> Result<Credentials> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            WarehouseError::Credentials("AWS_ACCESS_KEY_ID is not set".to_string())
        })?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            WarehouseError::Credentials("AWS_SECRET_ACCESS_KEY is not set".to_string())
        })?;

        Ok(Credentials {
            access_key,
            secret_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_keys() {
        let credentials = Credentials::new("AKIAEXAMPLE", "very-secret");
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn test_mask_replaces_every_secret() {
        let mut credentials = Credentials::new("AKIAEXAMPLE", "s3cr3t");
        credentials.session_token = Some("tok3n".to_string());
        let masked = credentials.mask(
            "COPY staging_events FROM 's3://udacity-dend/log_data' ACCESS_KEY_ID 'AKIAEXAMPLE' SECRET_ACCESS_KEY 's3cr3t' SESSION_TOKEN 'tok3n' JSON 'auto'",
        );
        assert!(!masked.contains("AKIAEXAMPLE"));
        assert!(!masked.contains("s3cr3t"));
        assert!(!masked.contains("tok3n"));
        assert!(masked.contains("ACCESS_KEY_ID '***' SECRET_ACCESS_KEY '***'"));
    }

    #[test]
    fn test_mask_skips_empty_secrets() {
        let mut credentials = Credentials::new("", "SK");
        credentials.session_token = Some(String::new());
        assert_eq!(credentials.mask("bad key SK"), "bad key ***");
        assert_eq!(Credentials::new("", "").mask("COPY t"), "COPY t");
    }

    #[tokio::test]
    async fn test_static_provider_returns_configured_keys() {
        let provider = StaticCredentialProvider::new(Credentials::new("a", "b"));
        let credentials = provider.get_credentials().await.unwrap();
        assert_eq!(credentials.access_key, "a");
        assert_eq!(credentials.secret_key, "b");
    }
}

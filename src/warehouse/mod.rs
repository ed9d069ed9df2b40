// ABOUTME: Warehouse and credential interfaces consumed by every task kind
// ABOUTME: Exports the typed row model, sandbox warehouse, and credential providers

pub mod credentials;
pub mod memory;
pub mod value;

pub use credentials::{Credentials, EnvCredentialProvider, StaticCredentialProvider};
pub use memory::{MemoryWarehouse, SandboxSeed};
pub use value::{format_rows, Row, Value};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone)]
pub enum WarehouseError {
    #[error("Statement failed: {message}")]
    Execution { sql: String, message: String },

    #[error("Query failed: {message}")]
    Query { sql: String, message: String },

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, WarehouseError>;

/// SQL execution primitive shared by all tasks of a run.
///
/// No transactional semantics are assumed across statements. Implementations
/// are shared between concurrently running tasks; wrap clients that cannot
/// handle concurrent calls in [`Serialized`].
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<()>;

    async fn query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Source of object-storage access keys for bulk loads.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self) -> Result<Credentials>;
}

/// Funnels every call through one async mutex so a client that is only safe
/// for serial use can still be shared by concurrent tasks.
pub struct Serialized<W> {
    inner: Mutex<W>,
}

impl<W: WarehouseClient> Serialized<W> {
    pub fn new(client: W) -> Self {
        Self {
            inner: Mutex::new(client),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

#[async_trait]
impl<W: WarehouseClient> WarehouseClient for Serialized<W> {
    async fn execute(&self, sql: &str) -> Result<()> {
        let client = self.inner.lock().await;
        client.execute(sql).await
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let client = self.inner.lock().await;
        client.query(sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowClient {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl WarehouseClient for SlowClient {
        async fn execute(&self, _sql: &str) -> Result<()> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_serialized_client_never_overlaps_calls() {
        let client = Arc::new(Serialized::new(SlowClient {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }));

        let calls = (0..4).map(|i| {
            let client = Arc::clone(&client);
            async move { client.execute(&format!("SELECT {}", i)).await }
        });
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let client = Arc::try_unwrap(client).ok().unwrap().into_inner();
        assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
    }
}

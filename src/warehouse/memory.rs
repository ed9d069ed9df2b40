// ABOUTME: In-memory sandbox warehouse used for rehearsal runs and tests
// ABOUTME: Interprets the DDL, COPY, TRUNCATE and INSERT ... (SELECT) statements tasks issue

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Result, Row, Value, WarehouseClient, WarehouseError};

/// A warehouse that keeps relations in memory.
///
/// Select queries are not evaluated: their results are registered up front
/// with [`MemoryWarehouse::with_query_result`], and `COPY` sources are
/// registered per storage location with [`MemoryWarehouse::with_object`].
/// Every statement received is recorded, in order, for inspection.
#[derive(Default)]
pub struct MemoryWarehouse {
    state: Mutex<SandboxState>,
}

#[derive(Default)]
struct SandboxState {
    tables: IndexMap<String, Vec<Row>>,
    query_results: HashMap<String, Vec<Row>>,
    objects: IndexMap<String, Vec<Row>>,
    failures: Vec<FailureRule>,
    statements: Vec<String>,
}

/// Fixture data for a rehearsal run.
///
/// ```yaml
/// tables:
///   users: [[8, Kaylee, Cummings, F, free]]
/// objects:
///   "s3://udacity-dend/log_data/2018/11/": [[Kaylee, 8]]
/// queries:
///   "SELECT distinct userid FROM staging_events": [[8]]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSeed {
    #[serde(default)]
    pub tables: IndexMap<String, Vec<Row>>,
    #[serde(default)]
    pub objects: IndexMap<String, Vec<Row>>,
    #[serde(default)]
    pub queries: IndexMap<String, Vec<Row>>,
}

impl SandboxSeed {
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

struct FailureRule {
    pattern: String,
    remaining: u32,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SandboxSeed) -> Self {
        let mut warehouse = Self::new();
        for (name, rows) in seed.tables {
            warehouse = warehouse.with_table(&name, rows);
        }
        for (location, rows) in seed.objects {
            warehouse = warehouse.with_object(&location, rows);
        }
        for (sql, rows) in seed.queries {
            warehouse = warehouse.with_query_result(&sql, rows);
        }
        warehouse
    }

    /// Seed a relation with existing rows
    pub fn with_table(mut self, name: &str, rows: Vec<Row>) -> Self {
        self.state
            .get_mut()
            .tables
            .insert(name.to_lowercase(), rows);
        self
    }

    /// Register the rows a select statement produces
    pub fn with_query_result(mut self, sql: &str, rows: Vec<Row>) -> Self {
        self.state
            .get_mut()
            .query_results
            .insert(normalize(sql), rows);
        self
    }

    /// Register the rows stored under an object-storage location
    pub fn with_object(mut self, location: &str, rows: Vec<Row>) -> Self {
        self.state
            .get_mut()
            .objects
            .insert(location.to_string(), rows);
        self
    }

    /// Make the next `times` statements containing `pattern` fail
    pub fn with_failures(mut self, pattern: &str, times: u32) -> Self {
        self.state.get_mut().failures.push(FailureRule {
            pattern: pattern.to_lowercase(),
            remaining: times,
        });
        self
    }

    /// All statements received so far, in arrival order
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    pub async fn table(&self, name: &str) -> Option<Vec<Row>> {
        self.state
            .lock()
            .await
            .tables
            .get(&name.to_lowercase())
            .cloned()
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.state.lock().await.tables.keys().cloned().collect()
    }
}

impl SandboxState {
    fn take_injected_failure(&mut self, normalized: &str) -> bool {
        let lowered = normalized.to_lowercase();
        for rule in &mut self.failures {
            if rule.remaining > 0 && lowered.contains(&rule.pattern) {
                rule.remaining -= 1;
                return true;
            }
        }
        false
    }

    fn apply(&mut self, sql: &str) -> Result<()> {
        if let Some(rest) = strip_keywords(sql, &["DROP", "TABLE", "IF", "EXISTS"]) {
            self.tables.shift_remove(&leading_identifier(rest));
        } else if let Some(rest) = strip_keywords(sql, &["DROP", "TABLE"]) {
            let name = leading_identifier(rest);
            if self.tables.shift_remove(&name).is_none() {
                return Err(WarehouseError::UnknownRelation(name));
            }
        } else if let Some(rest) = strip_keywords(sql, &["CREATE", "TABLE", "IF", "NOT", "EXISTS"])
        {
            self.tables.entry(leading_identifier(rest)).or_default();
        } else if let Some(rest) = strip_keywords(sql, &["CREATE", "TABLE"]) {
            let name = leading_identifier(rest);
            if self.tables.contains_key(&name) {
                return Err(WarehouseError::Execution {
                    sql: sql.to_string(),
                    message: format!("relation \"{}\" already exists", name),
                });
            }
            self.tables.insert(name, Vec::new());
        } else if let Some(rest) = strip_keywords(sql, &["TRUNCATE", "TABLE"])
            .or_else(|| strip_keywords(sql, &["TRUNCATE"]))
        {
            let name = leading_identifier(rest);
            match self.tables.get_mut(&name) {
                Some(rows) => rows.clear(),
                None => return Err(WarehouseError::UnknownRelation(name)),
            }
        } else if let Some(rest) = strip_keywords(sql, &["INSERT", "INTO"]) {
            let (name, tail) = split_identifier(rest);
            let select = strip_parens(tail.trim());
            let rows = self
                .query_results
                .get(&normalize(select))
                .cloned()
                .ok_or_else(|| WarehouseError::Execution {
                    sql: sql.to_string(),
                    message: "no result registered for select".to_string(),
                })?;
            self.append(&name, rows)?;
        } else if let Some(rest) = strip_keywords(sql, &["COPY"]) {
            let name = leading_identifier(rest);
            let location = quoted_after(rest, "FROM").ok_or_else(|| WarehouseError::Execution {
                sql: sql.to_string(),
                message: "COPY without a source location".to_string(),
            })?;
            let rows: Vec<Row> = self
                .objects
                .iter()
                .filter(|(key, _)| key.starts_with(&location))
                .flat_map(|(_, rows)| rows.iter().cloned())
                .collect();
            self.append(&name, rows)?;
        }
        // Anything else is accepted and only recorded.
        Ok(())
    }

    fn append(&mut self, name: &str, rows: Vec<Row>) -> Result<()> {
        match self.tables.get_mut(name) {
            Some(existing) => {
                existing.extend(rows);
                Ok(())
            }
            None => Err(WarehouseError::UnknownRelation(name.to_string())),
        }
    }

    fn select(&self, sql: &str) -> Result<Vec<Row>> {
        if let Some(rest) = strip_keywords(sql, &["SELECT", "*", "FROM"]) {
            let name = leading_identifier(rest);
            if is_bare_relation(rest, &name) {
                return self
                    .tables
                    .get(&name)
                    .cloned()
                    .ok_or(WarehouseError::UnknownRelation(name));
            }
        }
        if let Some(rest) = strip_keywords(sql, &["SELECT", "COUNT(*)", "FROM"]) {
            let name = leading_identifier(rest);
            if is_bare_relation(rest, &name) {
                let count = self
                    .tables
                    .get(&name)
                    .map(|rows| rows.len())
                    .ok_or(WarehouseError::UnknownRelation(name))?;
                return Ok(vec![vec![Value::Int(count as i64)]]);
            }
        }

        self.query_results
            .get(&normalize(sql))
            .cloned()
            .ok_or_else(|| WarehouseError::Query {
                sql: sql.to_string(),
                message: "no result registered for query".to_string(),
            })
    }
}

#[async_trait]
impl WarehouseClient for MemoryWarehouse {
    async fn execute(&self, sql: &str) -> Result<()> {
        let normalized = normalize(sql);
        let mut state = self.state.lock().await;
        state.statements.push(normalized.clone());
        debug!("sandbox execute: {}", normalized);

        if state.take_injected_failure(&normalized) {
            return Err(WarehouseError::Execution {
                sql: normalized,
                message: "injected failure".to_string(),
            });
        }
        state.apply(&normalized)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let normalized = normalize(sql);
        let mut state = self.state.lock().await;
        state.statements.push(normalized.clone());
        debug!("sandbox query: {}", normalized);

        if state.take_injected_failure(&normalized) {
            return Err(WarehouseError::Query {
                sql: normalized,
                message: "injected failure".to_string(),
            });
        }
        state.select(&normalized)
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .trim()
        .to_string()
}

/// Match leading keywords case-insensitively and return what follows them.
fn strip_keywords<'a>(sql: &'a str, keywords: &[&str]) -> Option<&'a str> {
    let mut rest = sql;
    for keyword in keywords {
        let trimmed = rest.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (word, tail) = trimmed.split_at(end);
        if !word.eq_ignore_ascii_case(keyword) {
            return None;
        }
        rest = tail;
    }
    Some(rest.trim_start())
}

fn split_identifier(rest: &str) -> (String, &str) {
    let trimmed = rest.trim_start();
    let end = trimmed
        .find(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .unwrap_or(trimmed.len());
    let (raw, tail) = trimmed.split_at(end);
    (raw.trim_matches('"').to_lowercase(), tail)
}

fn leading_identifier(rest: &str) -> String {
    split_identifier(rest).0
}

fn is_bare_relation(rest: &str, name: &str) -> bool {
    rest.trim().trim_matches('"').eq_ignore_ascii_case(name)
}

fn strip_parens(select: &str) -> &str {
    match select.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => inner.trim(),
        None => select,
    }
}

/// The first single-quoted literal following `keyword`.
fn quoted_after(rest: &str, keyword: &str) -> Option<String> {
    let upper = rest.to_ascii_uppercase();
    let start = upper.find(&format!("{} '", keyword))? + keyword.len() + 2;
    let tail = &rest[start..];
    let end = tail.find('\'')?;
    Some(tail[..end].to_string())
}

// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Builds the star-schema pipeline, a seeded sandbox warehouse, and event-log assertions

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use starflow::engine::{PipelineExecutor, Run, TaskGraph, TaskState, Window};
use starflow::parser::Pipeline;
use starflow::row;
use starflow::store::{MemoryRunStore, RunStore, StoreError};
use starflow::warehouse::{
    Credentials, MemoryWarehouse, Row, SandboxSeed, StaticCredentialProvider, Value,
    WarehouseClient, WarehouseError,
};
use tempfile::TempDir;

pub const FACT_SELECT: &str = "SELECT md5(sessionid || ts) songplay_id, userid FROM staging_events";
pub const USERS_SELECT: &str =
    "SELECT distinct userid, firstname, lastname, gender, level FROM staging_events";
pub const SONGS_SELECT: &str = "SELECT distinct song_id, title, artist_id, year, duration FROM staging_songs";
pub const ARTISTS_SELECT: &str =
    "SELECT distinct artist_id, artist_name, artist_location FROM staging_songs";
pub const TIME_SELECT: &str = "SELECT start_time, extract(hour from start_time) FROM songplays";

pub const EVENTS_OBJECT: &str = "s3://udacity-dend/log_data/2018/11/2018-11-01-events.json";
pub const SONGS_OBJECT: &str = "s3://udacity-dend/song_data/A/A/TRAAAAK128F9318786.json";

/// Builder for the Init -> {Stage x2} -> LoadFact -> {Dim x4} -> {QC x4} pipeline
pub struct SparkifyPipelineBuilder {
    name: String,
    max_attempts: u32,
    delay: String,
    users_policy: String,
    drop_tables: bool,
}

impl SparkifyPipelineBuilder {
    pub fn new() -> Self {
        Self {
            name: "sparkify".to_string(),
            max_attempts: 3,
            delay: "0s".to_string(),
            users_policy: "delete_then_load".to_string(),
            drop_tables: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay: &str) -> Self {
        self.max_attempts = max_attempts;
        self.delay = delay.to_string();
        self
    }

    pub fn with_users_policy(mut self, policy: &str) -> Self {
        self.users_policy = policy.to_string();
        self
    }

    /// Make the init task drop every table before creating it
    pub fn with_drop_tables(mut self) -> Self {
        self.drop_tables = true;
        self
    }

    pub fn to_yaml(&self) -> String {
        let drops = if self.drop_tables {
            let statements: Vec<String> = [
                "staging_events",
                "staging_songs",
                "songplays",
                "users",
                "songs",
                "artists",
                "time",
            ]
            .iter()
            .map(|table| format!("DROP TABLE IF EXISTS {}", table))
            .collect();
            format!("      drop: [{}]", statements.join(", "))
        } else {
            String::new()
        };
        format!(
            r#"
name: {name}
schedule:
  cron: "0 * * * *"
  start_date: 2019-01-12T00:00:00Z
defaults:
  retry: {{ max_attempts: {max_attempts}, delay: {delay} }}
variables:
  bucket: udacity-dend
load_policies:
  users: {users_policy}
tasks:
  create_tables:
    kind: init
    config:
{drops}
      create:
        - CREATE TABLE IF NOT EXISTS staging_events (userid int4, sessionid int4, ts int8)
        - CREATE TABLE IF NOT EXISTS staging_songs (song_id varchar(256), artist_id varchar(256))
        - CREATE TABLE IF NOT EXISTS songplays (playid varchar(32), userid int4)
        - CREATE TABLE IF NOT EXISTS users (userid int4, first_name varchar(256))
        - CREATE TABLE IF NOT EXISTS songs (songid varchar(256), title varchar(256))
        - CREATE TABLE IF NOT EXISTS artists (artistid varchar(256), name varchar(256))
        - CREATE TABLE IF NOT EXISTS time (start_time timestamp, hour int4)
  stage_events:
    kind: stage
    depends_on: [create_tables]
    config:
      table: staging_events
      bucket: "{{{{variables.bucket}}}}"
      path: /log_data/
      json_path: s3://udacity-dend/log_json_path.json
  stage_songs:
    kind: stage
    depends_on: [create_tables]
    config:
      table: staging_songs
      bucket: "{{{{variables.bucket}}}}"
      path: /song_data/
  load_songplays:
    kind: load_fact
    depends_on: [stage_events, stage_songs]
    config:
      table: songplays
      select: "{fact}"
  load_users:
    kind: load_dimension
    depends_on: [load_songplays]
    config: {{ table: users, select: "{users}" }}
  load_songs:
    kind: load_dimension
    depends_on: [load_songplays]
    config: {{ table: songs, select: "{songs}" }}
  load_artists:
    kind: load_dimension
    depends_on: [load_songplays]
    config: {{ table: artists, select: "{artists}" }}
  load_time:
    kind: load_dimension
    depends_on: [load_songplays]
    config: {{ table: time, select: "{time}" }}
  check_users:
    kind: quality_check
    depends_on: [load_users, load_songs, load_artists, load_time]
    retry: {{ max_attempts: 1 }}
    config:
      sql: SELECT * FROM users
      expected: [[8, Kaylee, Summers, F, free]]
  check_songs:
    kind: quality_check
    depends_on: [load_users, load_songs, load_artists, load_time]
    retry: {{ max_attempts: 1 }}
    config:
      sql: SELECT * FROM songs
      expected: [[SOBLFFE12AF72AA5BA, Scream, ARJNIUY12298900C91, 2009, {{ decimal: "213" }}]]
  check_artists:
    kind: quality_check
    depends_on: [load_users, load_songs, load_artists, load_time]
    retry: {{ max_attempts: 1 }}
    config:
      sql: SELECT * FROM artists
      expected: [[ARJNIUY12298900C91, Adelitas Way, "", ~, ~]]
  check_time:
    kind: quality_check
    depends_on: [load_users, load_songs, load_artists, load_time]
    retry: {{ max_attempts: 1 }}
    config:
      sql: SELECT * FROM time
      expected: [[{{ timestamp: "2018-11-01T21:01:46" }}, 21, 1, 44, 11, 2018, 4]]
"#,
            name = self.name,
            max_attempts = self.max_attempts,
            delay = self.delay,
            users_policy = self.users_policy,
            drops = drops,
            fact = FACT_SELECT,
            users = USERS_SELECT,
            songs = SONGS_SELECT,
            artists = ARTISTS_SELECT,
            time = TIME_SELECT,
        )
    }

    pub fn build(&self) -> Pipeline {
        Pipeline::from_yaml(&self.to_yaml()).unwrap()
    }

    pub async fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.to_yaml()).await
    }
}

impl Default for SparkifyPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp(value: &str) -> Value {
    Value::Timestamp(chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").unwrap())
}

pub fn kaylee() -> Vec<Value> {
    row![8, "Kaylee", "Summers", "F", "free"]
}

/// Objects and select results that satisfy every check of the pipeline
pub fn sandbox_seed() -> SandboxSeed {
    let mut seed = SandboxSeed::default();
    seed.objects
        .insert(EVENTS_OBJECT.to_string(), vec![row![8, 139, 1541106106796i64]]);
    seed.objects.insert(
        SONGS_OBJECT.to_string(),
        vec![row!["SOBLFFE12AF72AA5BA", "ARJNIUY12298900C91"]],
    );
    seed.queries
        .insert(FACT_SELECT.to_string(), vec![row!["a1b2", 8]]);
    seed.queries.insert(USERS_SELECT.to_string(), vec![kaylee()]);
    seed.queries.insert(
        SONGS_SELECT.to_string(),
        vec![vec![
            Value::from("SOBLFFE12AF72AA5BA"),
            Value::from("Scream"),
            Value::from("ARJNIUY12298900C91"),
            Value::Int(2009),
            Value::Decimal("213".to_string()),
        ]],
    );
    seed.queries.insert(
        ARTISTS_SELECT.to_string(),
        vec![vec![
            Value::from("ARJNIUY12298900C91"),
            Value::from("Adelitas Way"),
            Value::from(""),
            Value::Null,
            Value::Null,
        ]],
    );
    seed.queries.insert(
        TIME_SELECT.to_string(),
        vec![vec![
            timestamp("2018-11-01T21:01:46"),
            Value::Int(21),
            Value::Int(1),
            Value::Int(44),
            Value::Int(11),
            Value::Int(2018),
            Value::Int(4),
        ]],
    );
    seed
}

pub fn sandbox() -> MemoryWarehouse {
    MemoryWarehouse::from_seed(sandbox_seed())
}

pub fn test_credentials() -> Arc<StaticCredentialProvider> {
    Arc::new(StaticCredentialProvider::new(Credentials::new(
        "AKIATEST", "secret",
    )))
}

pub fn executor(pipeline: &Pipeline, warehouse: Arc<dyn WarehouseClient>) -> PipelineExecutor {
    PipelineExecutor::new(warehouse, test_credentials())
        .with_max_concurrent(4)
        .with_variables(pipeline.variables.clone())
}

pub fn test_window() -> Window {
    Window::new(
        Utc.with_ymd_and_hms(2019, 1, 12, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2019, 1, 12, 1, 0, 0).unwrap(),
    )
}

/// Sequence number of the event moving `task_id` into `to`, if any
pub fn event_seq(run: &Run, task_id: &str, to: TaskState) -> Option<u64> {
    run.events_for(task_id)
        .find(|event| event.to == to)
        .map(|event| event.seq)
}

/// Every Running transition happens after all predecessors reached Succeeded
pub fn assert_predecessors_succeeded_first(run: &Run, graph: &TaskGraph) {
    for event in run.events.iter().filter(|e| e.to == TaskState::Running) {
        for predecessor in graph.predecessors(&event.task_id) {
            let succeeded = event_seq(run, &predecessor, TaskState::Succeeded).unwrap_or_else(
                || panic!("{} ran but {} never succeeded", event.task_id, predecessor),
            );
            assert!(
                succeeded < event.seq,
                "{} ran (#{}) before {} succeeded (#{})",
                event.task_id,
                event.seq,
                predecessor,
                succeeded
            );
        }
    }
}

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp_dir.path().join("runs")
    }

    pub async fn write_seed(&self) -> PathBuf {
        let path = self.temp_dir.path().join("seed.yaml");
        let yaml = serde_yaml::to_string(&sandbox_seed()).unwrap();
        tokio::fs::write(&path, yaml).await.unwrap();
        path
    }

    pub async fn write_pipeline(&self, builder: &SparkifyPipelineBuilder) -> PathBuf {
        let path = self.temp_dir.path().join("sparkify.yaml");
        builder.write_to_file(&path).await.unwrap();
        path
    }
}

/// Warehouse wrapper that delays calls and records how many calls of each
/// statement kind (its leading keyword) were in flight at once
pub struct SlowWarehouse {
    inner: MemoryWarehouse,
    delay: Duration,
    pattern: String,
    active: Mutex<Vec<String>>,
    peaks: Mutex<HashMap<String, usize>>,
    completed: AtomicUsize,
}

impl SlowWarehouse {
    pub fn new(inner: MemoryWarehouse, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            pattern: String::new(),
            active: Mutex::new(Vec::new()),
            peaks: Mutex::new(HashMap::new()),
            completed: AtomicUsize::new(0),
        }
    }

    /// Delay only statements containing `pattern` (case-insensitive)
    pub fn only_for(mut self, pattern: &str) -> Self {
        self.pattern = pattern.to_lowercase();
        self
    }

    pub fn inner(&self) -> &MemoryWarehouse {
        &self.inner
    }

    /// Largest number of overlapping calls starting with `keyword`
    pub fn peak(&self, keyword: &str) -> usize {
        self.peaks
            .lock()
            .unwrap()
            .get(&keyword.to_uppercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    async fn around<T>(&self, sql: &str, call: impl Future<Output = T>) -> T {
        let keyword = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_uppercase();
        {
            let mut active = self.active.lock().unwrap();
            active.push(keyword.clone());
            let overlap = active.iter().filter(|k| **k == keyword).count();
            let mut peaks = self.peaks.lock().unwrap();
            let peak = peaks.entry(keyword.clone()).or_default();
            *peak = (*peak).max(overlap);
        }

        if sql.to_lowercase().contains(&self.pattern) {
            tokio::time::sleep(self.delay).await;
        }
        let result = call.await;

        {
            let mut active = self.active.lock().unwrap();
            if let Some(position) = active.iter().position(|k| *k == keyword) {
                active.remove(position);
            }
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl WarehouseClient for SlowWarehouse {
    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        self.around(sql, self.inner.execute(sql)).await
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        self.around(sql, self.inner.query(sql)).await
    }
}

/// Run store whose save fails once, the first time `task_id` is seen in `state`
pub struct FailingStore {
    pub inner: MemoryRunStore,
    task_id: String,
    state: TaskState,
    tripped: AtomicBool,
}

impl FailingStore {
    pub fn new(task_id: &str, state: TaskState) -> Self {
        Self {
            inner: MemoryRunStore::new(),
            task_id: task_id.to_string(),
            state,
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RunStore for FailingStore {
    async fn save(&self, run: &Run) -> Result<(), StoreError> {
        if run.state(&self.task_id) == Some(self.state) && !self.tripped.swap(true, Ordering::SeqCst)
        {
            return Err(StoreError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(run).await
    }

    async fn load(&self, run_id: &str) -> Result<Run, StoreError> {
        self.inner.load(run_id).await
    }

    async fn latest(&self, pipeline: &str) -> Result<Option<Run>, StoreError> {
        self.inner.latest(pipeline).await
    }

    async fn list(&self, pipeline: &str) -> Result<Vec<Run>, StoreError> {
        self.inner.list(pipeline).await
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

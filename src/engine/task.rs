// ABOUTME: Task definitions consumed by the graph and the executor
// ABOUTME: Declares task kinds, load policies, and retry policies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A node of the task graph. The payload is interpreted by the
/// implementation registered for `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub payload: serde_yaml::Value,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Init,
    Stage,
    LoadFact,
    LoadDimension,
    QualityCheck,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    #[default]
    Append,
    #[serde(alias = "delete-load")]
    DeleteThenLoad,
}

/// Fixed-delay retry budget. `max_attempts` counts every try, the first
/// one included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde", default)]
    pub delay: Duration,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn has_budget_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Task {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            payload: serde_yaml::Value::Null,
            retry: RetryPolicy::default(),
        }
    }

    pub fn depends_on<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = predecessors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: serde_yaml::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Policy named in the payload, `Append` when absent
    pub fn load_policy(&self) -> LoadPolicy {
        self.payload
            .get("policy")
            .cloned()
            .and_then(|policy| serde_yaml::from_value(policy).ok())
            .unwrap_or_default()
    }

    /// Whether running this task again adds rows next to those an earlier
    /// execution already loaded
    pub fn appends_rows(&self) -> bool {
        match self.kind {
            TaskKind::Stage | TaskKind::LoadFact => true,
            TaskKind::LoadDimension => self.load_policy() == LoadPolicy::Append,
            _ => false,
        }
    }
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Init => "init",
            TaskKind::Stage => "stage",
            TaskKind::LoadFact => "load_fact",
            TaskKind::LoadDimension => "load_dimension",
            TaskKind::QualityCheck => "quality_check",
        }
    }

    pub fn all() -> [TaskKind; 5] {
        [
            TaskKind::Init,
            TaskKind::Stage,
            TaskKind::LoadFact,
            TaskKind::LoadDimension,
            TaskKind::QualityCheck,
        ]
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl LoadPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPolicy::Append => "append",
            LoadPolicy::DeleteThenLoad => "delete_then_load",
        }
    }
}

impl fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_from_yaml() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 3\ndelay: 5m\n").unwrap();
        assert_eq!(policy, RetryPolicy::fixed(3, Duration::from_secs(300)));

        let default: RetryPolicy = serde_yaml::from_str("{}").unwrap();
        assert_eq!(default, RetryPolicy::default());
    }

    #[test]
    fn test_budget() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        assert!(policy.has_budget_after(1));
        assert!(policy.has_budget_after(2));
        assert!(!policy.has_budget_after(3));
    }

    #[test]
    fn test_load_policy_accepts_legacy_name() {
        let policy: LoadPolicy = serde_yaml::from_str("delete-load").unwrap();
        assert_eq!(policy, LoadPolicy::DeleteThenLoad);
        let policy: LoadPolicy = serde_yaml::from_str("append").unwrap();
        assert_eq!(policy, LoadPolicy::Append);
    }

    #[test]
    fn test_appends_rows() {
        let dimension = |policy: &str| {
            Task::new("load_users", TaskKind::LoadDimension).with_payload(
                serde_yaml::from_str(&format!("table: users\nselect: SELECT 1\n{}", policy))
                    .unwrap(),
            )
        };

        assert!(Task::new("fact", TaskKind::LoadFact).appends_rows());
        assert!(Task::new("stage", TaskKind::Stage).appends_rows());
        assert!(dimension("").appends_rows());
        assert!(dimension("policy: append").appends_rows());
        assert!(!dimension("policy: delete_then_load").appends_rows());
        assert!(!Task::new("init", TaskKind::Init).appends_rows());
        assert!(!Task::new("check", TaskKind::QualityCheck).appends_rows());
    }
}

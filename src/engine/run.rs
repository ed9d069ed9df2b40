// ABOUTME: Run bookkeeping for one execution of a task graph over a time window
// ABOUTME: Tracks per-task state, attempt counters, and an ordered transition log

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::error::{ExecutionError, GraphError, Result};
use super::graph::TaskGraph;
use super::result::{RunSummary, TaskFailure};
use super::task::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    FailedRetryable,
    FailedFatal,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Half-open logical interval `[start, end)` a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub kind: TaskKind,
    pub state: TaskState,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_failure: Option<TaskFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64,
    pub task_id: String,
    pub from: TaskState,
    pub to: TaskState,
    pub attempt: u32,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub pipeline: String,
    pub window: Window,
    pub status: RunStatus,
    pub tasks: IndexMap<String, TaskRecord>,
    pub events: Vec<RunEvent>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::FailedFatal | TaskState::Abandoned
        )
    }

    /// Whether the executor may move a task from `self` to `next`
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Abandoned)
                | (Ready, Running)
                | (Ready, Abandoned)
                | (Running, Succeeded)
                | (Running, FailedRetryable)
                | (Running, FailedFatal)
                | (FailedRetryable, Running)
        )
    }
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window of `length` ending at `end`
    pub fn ending_at(end: DateTime<Utc>, length: ChronoDuration) -> Self {
        Self {
            start: end - length,
            end,
        }
    }

    /// Start date as `YYYY-MM-DD`
    pub fn ds(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::ending_at(Utc::now(), ChronoDuration::hours(1))
    }
}

impl Run {
    /// Create a run with every task of `graph` pending
    pub fn new(pipeline: impl Into<String>, window: Window, graph: &TaskGraph) -> Self {
        let tasks = graph
            .tasks()
            .map(|task| {
                (
                    task.id.clone(),
                    TaskRecord {
                        kind: task.kind,
                        state: TaskState::Pending,
                        attempts: 0,
                        started_at: None,
                        finished_at: None,
                        last_failure: None,
                    },
                )
            })
            .collect();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline: pipeline.into(),
            window,
            status: RunStatus::Running,
            tasks,
            events: Vec::new(),
            archived: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.get(task_id).map(|record| record.state)
    }

    pub fn record(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn attempts(&self, task_id: &str) -> u32 {
        self.tasks.get(task_id).map_or(0, |record| record.attempts)
    }

    /// Apply a validated state transition and append it to the event log.
    ///
    /// Entering `Running` counts a new attempt.
    pub fn transition(
        &mut self,
        task_id: &str,
        to: TaskState,
        message: Option<String>,
    ) -> Result<&RunEvent> {
        self.ensure_writable()?;
        let record = self.record_mut(task_id)?;
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(ExecutionError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to,
            });
        }

        let now = Utc::now();
        record.state = to;
        if to == TaskState::Running {
            record.attempts += 1;
            record.started_at.get_or_insert(now);
        }
        if to.is_terminal() {
            record.finished_at = Some(now);
        }
        let attempt = record.attempts;

        Ok(self.push_event(task_id, from, to, attempt, now, message))
    }

    /// Attach the diagnostics of the latest failed attempt
    pub fn record_failure(&mut self, task_id: &str, failure: TaskFailure) -> Result<()> {
        self.ensure_writable()?;
        self.record_mut(task_id)?.last_failure = Some(failure);
        Ok(())
    }

    /// Abandon every pending descendant of `task_id`; returns the abandoned ids
    pub fn abandon_descendants(&mut self, graph: &TaskGraph, task_id: &str) -> Result<Vec<String>> {
        let mut abandoned = Vec::new();
        for descendant in graph.descendants(task_id) {
            if self.state(&descendant) == Some(TaskState::Pending) {
                self.transition(
                    &descendant,
                    TaskState::Abandoned,
                    Some(format!("upstream task {} failed", task_id)),
                )?;
                abandoned.push(descendant);
            }
        }
        Ok(abandoned)
    }

    /// Settle the run status and archive it.
    ///
    /// Tasks that never left `Pending` or `Ready` are abandoned.
    pub fn finalize(&mut self) -> Result<RunStatus> {
        self.ensure_writable()?;
        let unsettled: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, record)| matches!(record.state, TaskState::Pending | TaskState::Ready))
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in unsettled {
            self.transition(
                &task_id,
                TaskState::Abandoned,
                Some("never became runnable".to_string()),
            )?;
        }

        self.status = if self
            .tasks
            .values()
            .all(|record| record.state == TaskState::Succeeded)
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.finished_at = Some(Utc::now());
        self.archived = true;
        Ok(self.status)
    }

    /// Make an archived run writable again and reset every task that did not
    /// succeed, so execution can continue where it stopped.
    ///
    /// Tasks that append rows bring their upstream Init tasks along, see
    /// [`rerun_scope`].
    pub fn reopen(&mut self, graph: &TaskGraph) -> Result<Vec<String>> {
        let unfinished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, record)| record.state != TaskState::Succeeded)
            .map(|(id, _)| id.clone())
            .collect();
        let to_reset = rerun_scope(graph, unfinished)?;

        self.archived = false;
        self.status = RunStatus::Running;
        self.finished_at = None;
        for task_id in &to_reset {
            self.reset_task(task_id, "reset for resume");
        }
        Ok(to_reset)
    }

    /// Reset one task, and optionally everything downstream of it, to
    /// `Pending` for re-execution
    pub fn clear_task(
        &mut self,
        graph: &TaskGraph,
        task_id: &str,
        downstream: bool,
    ) -> Result<Vec<String>> {
        if !self.tasks.contains_key(task_id) {
            return Err(GraphError::TaskNotFound {
                task_id: task_id.to_string(),
            }
            .into());
        }

        let mut requested = vec![task_id.to_string()];
        if downstream {
            requested.extend(graph.descendants(task_id));
        }
        let cleared = rerun_scope(graph, requested)?;

        self.archived = false;
        self.status = RunStatus::Running;
        self.finished_at = None;
        for id in &cleared {
            self.reset_task(id, &format!("cleared from {}", task_id));
        }
        Ok(cleared)
    }

    pub fn is_complete(&self) -> bool {
        self.tasks.values().all(|record| record.state.is_terminal())
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, record)| record.state == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn events_for<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a RunEvent> {
        self.events.iter().filter(move |event| event.task_id == task_id)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_run(self)
    }

    fn reset_task(&mut self, task_id: &str, message: &str) {
        let Some(record) = self.tasks.get_mut(task_id) else {
            return;
        };
        if record.state == TaskState::Pending && record.attempts == 0 {
            return;
        }
        let from = record.state;
        record.state = TaskState::Pending;
        record.attempts = 0;
        record.started_at = None;
        record.finished_at = None;
        record.last_failure = None;
        self.push_event(task_id, from, TaskState::Pending, 0, Utc::now(), Some(message.to_string()));
    }

    fn push_event(
        &mut self,
        task_id: &str,
        from: TaskState,
        to: TaskState,
        attempt: u32,
        at: DateTime<Utc>,
        message: Option<String>,
    ) -> &RunEvent {
        let seq = self.events.last().map_or(1, |event| event.seq + 1);
        self.events.push(RunEvent {
            seq,
            task_id: task_id.to_string(),
            from,
            to,
            attempt,
            at,
            message,
        });
        &self.events[self.events.len() - 1]
    }

    fn record_mut(&mut self, task_id: &str) -> Result<&mut TaskRecord> {
        self.tasks.get_mut(task_id).ok_or_else(|| {
            GraphError::TaskNotFound {
                task_id: task_id.to_string(),
            }
            .into()
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.archived {
            return Err(ExecutionError::RunArchived {
                run_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Ready => write!(f, "ready"),
            TaskState::Running => write!(f, "running"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::FailedRetryable => write!(f, "failed_retryable"),
            TaskState::FailedFatal => write!(f, "failed_fatal"),
            TaskState::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Widen a set of tasks about to run again. A task that appends rows must
/// not run on its own against tables an earlier execution populated, so the
/// Init tasks upstream of it join the set with everything downstream of them.
/// Returns the widened set in definition order.
fn rerun_scope(graph: &TaskGraph, task_ids: Vec<String>) -> Result<Vec<String>> {
    let mut scope: HashSet<String> = task_ids.iter().cloned().collect();
    for task_id in &task_ids {
        let Some(task) = graph.get(task_id) else {
            continue;
        };
        if !task.appends_rows() {
            continue;
        }

        let inits: Vec<String> = graph
            .ancestors(task_id)
            .into_iter()
            .filter(|id| graph.get(id).is_some_and(|t| t.kind == TaskKind::Init))
            .collect();
        if inits.is_empty() {
            return Err(ExecutionError::UnsafeRerun {
                task_id: task_id.clone(),
            });
        }
        for init in inits {
            scope.extend(graph.descendants(&init));
            scope.insert(init);
        }
    }

    Ok(graph
        .task_ids()
        .filter(|id| scope.contains(*id))
        .map(str::to_string)
        .collect())
}

// ABOUTME: Task scheduling with bounded concurrency and fixed-delay retries
// ABOUTME: Streams attempt lifecycle events back to the executor over a channel

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::error::{ExecutionError, Result, TaskError};
use super::result::TaskOutput;
use super::task::RetryPolicy;

pub struct TaskScheduler {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

/// Lifecycle of a single attempt, in the order the executor must apply it
#[derive(Debug, Clone)]
pub enum AttemptEvent {
    Started {
        task_id: String,
        attempt: u32,
    },
    Succeeded {
        task_id: String,
        attempt: u32,
        output: TaskOutput,
    },
    Failed {
        task_id: String,
        attempt: u32,
        error: TaskError,
        will_retry: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: String,
    pub attempts: u32,
    pub succeeded: bool,
}

impl TaskScheduler {
    /// Create a new task scheduler with specified concurrency limit
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run attempts of one task until it succeeds, fails with a
    /// non-retryable error, or exhausts `retry.max_attempts`.
    ///
    /// A concurrency permit is held only while an attempt runs, never during
    /// the delay between attempts.
    pub async fn execute_with_retry<F, Fut>(
        &self,
        task_id: &str,
        retry: &RetryPolicy,
        events: &UnboundedSender<AttemptEvent>,
        attempt_fn: F,
    ) -> Result<TaskOutcome>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = std::result::Result<TaskOutput, TaskError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| ExecutionError::SystemError("Semaphore closed".to_string()))?;

                info!(
                    "Executing task {} (attempt {}/{})",
                    task_id, attempt, retry.max_attempts
                );
                let _ = events.send(AttemptEvent::Started {
                    task_id: task_id.to_string(),
                    attempt,
                });

                attempt_fn(attempt).await
            };

            match result {
                Ok(output) => {
                    debug!("Task {} succeeded on attempt {}", task_id, attempt);
                    let _ = events.send(AttemptEvent::Succeeded {
                        task_id: task_id.to_string(),
                        attempt,
                        output,
                    });
                    return Ok(TaskOutcome {
                        task_id: task_id.to_string(),
                        attempts: attempt,
                        succeeded: true,
                    });
                }
                Err(e) => {
                    let will_retry = e.is_retryable() && retry.has_budget_after(attempt);
                    if will_retry {
                        warn!("Task {} failed on attempt {}: {}", task_id, attempt, e);
                    } else {
                        error!("Task {} failed after {} attempts: {}", task_id, attempt, e);
                    }
                    let _ = events.send(AttemptEvent::Failed {
                        task_id: task_id.to_string(),
                        attempt,
                        error: e,
                        will_retry,
                    });

                    if !will_retry {
                        return Ok(TaskOutcome {
                            task_id: task_id.to_string(),
                            attempts: attempt,
                            succeeded: false,
                        });
                    }

                    debug!("Waiting {:?} before retry", retry.delay);
                    sleep(retry.delay).await;
                }
            }
        }
    }
}

impl AttemptEvent {
    pub fn task_id(&self) -> &str {
        match self {
            AttemptEvent::Started { task_id, .. }
            | AttemptEvent::Succeeded { task_id, .. }
            | AttemptEvent::Failed { task_id, .. } => task_id,
        }
    }
}

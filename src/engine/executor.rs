// ABOUTME: Pipeline executor driving a run of a frozen task graph to completion
// ABOUTME: Dispatches ready tasks in waves, applies streamed transitions, and persists the run

use futures::future;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::context::ExecutionContext;
use super::error::{ExecutionError, Result};
use super::graph::TaskGraph;
use super::result::TaskFailure;
use super::run::{Run, RunStatus, TaskState, Window};
use super::scheduler::{AttemptEvent, TaskScheduler};
use crate::store::RunStore;
use crate::tasks::TaskRegistry;
use crate::warehouse::{CredentialProvider, WarehouseClient};

pub const DEFAULT_MAX_CONCURRENT: usize = 4;

pub struct PipelineExecutor {
    scheduler: TaskScheduler,
    registry: TaskRegistry,
    warehouse: Arc<dyn WarehouseClient>,
    credentials: Arc<dyn CredentialProvider>,
    variables: IndexMap<String, String>,
    store: Option<Arc<dyn RunStore>>,
}

impl PipelineExecutor {
    pub fn new(
        warehouse: Arc<dyn WarehouseClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            scheduler: TaskScheduler::new(DEFAULT_MAX_CONCURRENT),
            registry: TaskRegistry::new(),
            warehouse,
            credentials,
            variables: IndexMap::new(),
            store: None,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.scheduler = TaskScheduler::new(max_concurrent);
        self
    }

    /// Persist the run after every applied transition
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Pipeline variables exposed to payload templates
    pub fn with_variables(mut self, variables: IndexMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.scheduler.max_concurrent()
    }

    /// Create a run for `window` and execute every task of `graph`.
    ///
    /// Task failures are recorded in the returned run. `Err` is reserved for
    /// engine failures such as an unfrozen graph or an unwritable store.
    #[instrument(skip(self, graph), fields(pipeline = %pipeline, window = %window))]
    pub async fn execute(&self, pipeline: &str, graph: &TaskGraph, window: Window) -> Result<Run> {
        self.check_graph(graph)?;
        let run = Run::new(pipeline, window, graph);
        info!(
            "Starting run {} of {} ({} tasks)",
            run.id,
            pipeline,
            graph.len()
        );
        self.persist(&run).await?;
        self.drive(graph, run).await
    }

    /// Reopen a finished run and re-execute every task that did not succeed
    #[instrument(skip(self, graph, run), fields(run_id = %run.id))]
    pub async fn resume(&self, graph: &TaskGraph, mut run: Run) -> Result<Run> {
        self.check_graph(graph)?;
        check_run_matches(graph, &run)?;

        let reset = run.reopen(graph)?;
        info!("Resuming run {}: {} tasks reset", run.id, reset.len());
        self.persist(&run).await?;
        self.drive(graph, run).await
    }

    /// Re-execute `task_id` and everything downstream of it
    #[instrument(skip(self, graph, run), fields(run_id = %run.id))]
    pub async fn resume_from(&self, graph: &TaskGraph, mut run: Run, task_id: &str) -> Result<Run> {
        self.check_graph(graph)?;
        check_run_matches(graph, &run)?;

        let cleared = run.clear_task(graph, task_id, true)?;
        info!(
            "Resuming run {} from {}: {} tasks cleared",
            run.id,
            task_id,
            cleared.len()
        );
        self.persist(&run).await?;
        self.drive(graph, run).await
    }

    fn check_graph(&self, graph: &TaskGraph) -> Result<()> {
        if !graph.is_frozen() {
            return Err(ExecutionError::ConfigurationError(
                "task graph must be frozen before execution".to_string(),
            ));
        }
        for task in graph.tasks() {
            self.registry.ensure_supported(task.kind)?;
        }
        Ok(())
    }

    async fn drive(&self, graph: &TaskGraph, mut run: Run) -> Result<Run> {
        let start_time = Instant::now();
        let base_context = ExecutionContext::new(
            &run.pipeline,
            &run.id,
            run.window,
            self.warehouse.clone(),
            self.credentials.clone(),
            &self.variables,
        );

        // First engine error seen. In-flight attempts always run to the end;
        // no further wave is dispatched once this is set.
        let mut halted: Option<ExecutionError> = None;
        let mut wave = 0;
        while halted.is_none() {
            let ready = graph.ready_set(&run);
            if ready.is_empty() {
                break;
            }
            wave += 1;

            for task_id in &ready {
                run.transition(task_id, TaskState::Ready, None)?;
            }
            if let Err(err) = self.persist(&run).await {
                halt(&mut halted, err);
                break;
            }
            info!("Dispatching wave {} with {} tasks: {:?}", wave, ready.len(), ready);

            let (tx, mut rx) = mpsc::unbounded_channel();
            let attempts: Vec<_> = ready
                .iter()
                .filter_map(|task_id| graph.get(task_id))
                .map(|task| {
                    let tx = tx.clone();
                    let scheduler = &self.scheduler;
                    let registry = &self.registry;
                    let context = &base_context;
                    async move {
                        scheduler
                            .execute_with_retry(&task.id, &task.retry, &tx, move |attempt| {
                                registry.execute_task(
                                    task.kind,
                                    &task.payload,
                                    context.for_attempt(&task.id, attempt),
                                )
                            })
                            .await
                    }
                })
                .collect();
            drop(tx);

            let batch = future::join_all(attempts);
            tokio::pin!(batch);
            let outcomes = loop {
                tokio::select! {
                    biased;
                    Some(event) = rx.recv() => {
                        if let Err(err) = self.apply_event(&mut run, event).await {
                            halt(&mut halted, err);
                        }
                    }
                    outcomes = &mut batch => break outcomes,
                }
            };
            while let Ok(event) = rx.try_recv() {
                if let Err(err) = self.apply_event(&mut run, event).await {
                    halt(&mut halted, err);
                }
            }

            for outcome in outcomes {
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        halt(&mut halted, err);
                        continue;
                    }
                };
                if outcome.succeeded {
                    continue;
                }
                let abandoned = run.abandon_descendants(graph, &outcome.task_id)?;
                if !abandoned.is_empty() {
                    warn!(
                        "Abandoned {} tasks downstream of {}: {:?}",
                        abandoned.len(),
                        outcome.task_id,
                        abandoned
                    );
                }
            }
            if halted.is_none() {
                if let Err(err) = self.persist(&run).await {
                    halt(&mut halted, err);
                }
            }
        }

        let status = run.finalize()?;
        if let Some(source) = halted {
            if let Err(err) = self.persist(&run).await {
                warn!("Could not persist halted run {}: {}", run.id, err);
            }
            error!(
                "Run {} halted in {:?} with status {}: {}",
                run.id,
                start_time.elapsed(),
                status,
                source
            );
            return Err(ExecutionError::Halted {
                run: Box::new(run),
                source: Box::new(source),
            });
        }
        self.persist(&run).await?;

        let summary = run.summary();
        match status {
            RunStatus::Succeeded => info!(
                "Run {} succeeded in {:?}: {}/{} tasks",
                run.id,
                start_time.elapsed(),
                summary.succeeded,
                summary.total_tasks
            ),
            _ => error!(
                "Run {} failed in {:?}: {} failed, {} abandoned",
                run.id,
                start_time.elapsed(),
                summary.failed,
                summary.abandoned
            ),
        }

        Ok(run)
    }

    async fn apply_event(&self, run: &mut Run, event: AttemptEvent) -> Result<()> {
        match event {
            AttemptEvent::Started { task_id, attempt } => {
                debug!("Task {} attempt {} running", task_id, attempt);
                run.transition(&task_id, TaskState::Running, None)?;
            }
            AttemptEvent::Succeeded {
                task_id, output, ..
            } => {
                run.transition(&task_id, TaskState::Succeeded, output.message)?;
            }
            AttemptEvent::Failed {
                task_id,
                error,
                will_retry,
                ..
            } => {
                run.record_failure(&task_id, TaskFailure::from(&error))?;
                let to = if will_retry {
                    TaskState::FailedRetryable
                } else {
                    TaskState::FailedFatal
                };
                run.transition(&task_id, to, Some(error.to_string()))?;
            }
        }
        self.persist(run).await
    }

    async fn persist(&self, run: &Run) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(run).await?;
        }
        Ok(())
    }
}

fn check_run_matches(graph: &TaskGraph, run: &Run) -> Result<()> {
    let same_tasks = run.tasks.len() == graph.len()
        && graph.task_ids().all(|task_id| run.tasks.contains_key(task_id));
    if same_tasks {
        Ok(())
    } else {
        Err(ExecutionError::RunMismatch {
            run_id: run.id.clone(),
            pipeline: run.pipeline.clone(),
        })
    }
}

/// Keep the first engine error of a run
fn halt(halted: &mut Option<ExecutionError>, err: ExecutionError) {
    error!("Engine error, letting in-flight tasks finish: {}", err);
    if halted.is_none() {
        *halted = Some(err);
    }
}

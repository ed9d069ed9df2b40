// ABOUTME: Command implementations for the starflow CLI
// ABOUTME: Handles validate, plan, windows, run, resume, status, and init

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::args::ReportFormat;
use super::config::Config;
use crate::engine::error::ExecutionError;
use crate::engine::executor::PipelineExecutor;
use crate::engine::run::{Run, RunStatus, Window};
use crate::output::{OutputConfig, OutputDestination, OutputHandler};
use crate::parser::{Pipeline, PipelineParser, PipelineValidator};
use crate::store::{FileRunStore, RunStore};
use crate::warehouse::{
    CredentialProvider, Credentials, MemoryWarehouse, SandboxSeed, StaticCredentialProvider,
};

const PIPELINE_TEMPLATE: &str = include_str!("../../pipelines/sparkify.yaml");

/// Keys handed to stage tasks during a rehearsal when none are configured
const SANDBOX_ACCESS_KEY: &str = "SANDBOXACCESSKEY";
const SANDBOX_SECRET_KEY: &str = "SANDBOXSECRETKEY";

/// Settings shared by `run` and `resume`
pub struct RehearsalOptions {
    pub state_dir: Option<PathBuf>,
    pub max_concurrent: Option<usize>,
    pub format: ReportFormat,
    pub seed: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Validate a pipeline file
pub async fn validate_pipeline(pipeline_path: PathBuf, strict: bool, config: &Config) -> Result<()> {
    info!("Validating pipeline: {}", pipeline_path.display());

    let pipeline = load_pipeline(&pipeline_path).await?;
    let report = PipelineValidator::new()
        .with_strict_mode(strict)
        .validate(&pipeline);

    for warning in &report.warnings {
        println!("⚠ {}", warning);
    }
    for error in &report.errors {
        println!("✗ {}", error);
    }

    if !report.is_valid {
        bail!(
            "Pipeline '{}' is invalid: {} errors, {} warnings",
            pipeline.name,
            report.errors.len(),
            report.warnings.len()
        );
    }

    let graph = pipeline.to_graph()?;
    println!("✓ Pipeline '{}' is valid", pipeline.name);
    println!("  Tasks: {}", graph.len());
    println!("  Variables: {}", effective_variables(&pipeline, config).len());
    println!("  Schedule: {}", pipeline.schedule.cron);

    info!("Pipeline validation completed successfully");
    Ok(())
}

/// Print the dispatch waves of a pipeline's graph
pub async fn plan_pipeline(pipeline_path: PathBuf) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path).await?;
    let graph = pipeline.to_graph()?;
    let plan = graph.execution_plan();

    println!("Pipeline: {}", pipeline.name);
    for (index, batch) in plan.batches.iter().enumerate() {
        println!("  Wave {}:", index + 1);
        for task_id in batch {
            if let Some(task) = graph.get(task_id) {
                println!(
                    "    {} ({}, {} attempts)",
                    task_id, task.kind, task.retry.max_attempts
                );
            }
        }
    }
    println!(
        "  {} tasks in {} waves, up to {} in parallel",
        plan.total_tasks,
        plan.execution_depth(),
        plan.max_parallelism()
    );
    Ok(())
}

/// Print the windows due at `now`
pub async fn list_windows(
    pipeline_path: PathBuf,
    since: Option<DateTime<Utc>>,
    now: Option<DateTime<Utc>>,
) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path).await?;
    let now = now.unwrap_or_else(Utc::now);
    let windows = pipeline.schedule.due_windows(now, since)?;

    if windows.is_empty() {
        println!("No windows due for '{}'", pipeline.name);
        if let Some(next) = pipeline.schedule.next_window(since.unwrap_or(now))? {
            println!("Next window: {}", next);
        }
        return Ok(());
    }

    for window in windows {
        println!("{}", window);
    }
    Ok(())
}

/// Rehearse a run of the pipeline against the sandbox warehouse
pub async fn run_pipeline(
    pipeline_path: PathBuf,
    window: Option<Window>,
    options: RehearsalOptions,
    config: &Config,
) -> Result<()> {
    info!("Starting pipeline rehearsal: {}", pipeline_path.display());

    let pipeline = load_pipeline(&pipeline_path).await?;
    let graph = pipeline.to_graph()?;
    let window = match window {
        Some(window) => window,
        None => latest_due_window(&pipeline)?,
    };

    let warehouse = sandbox_warehouse(options.seed.as_deref())?;
    let credentials = rehearsal_credentials(config);
    let executor = build_executor(&pipeline, &warehouse, &credentials, &options, config)?;

    let outcome = executor.execute(&pipeline.name, &graph, window).await;
    report_outcome(outcome, &warehouse, &credentials, &options).await
}

/// Resume a stored run
pub async fn resume_run(
    pipeline_path: PathBuf,
    run_id: String,
    from: Option<String>,
    options: RehearsalOptions,
    config: &Config,
) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path).await?;
    let graph = pipeline.to_graph()?;

    let store = FileRunStore::new(state_dir(&options, config));
    let run = store
        .load(&run_id)
        .await
        .with_context(|| format!("Failed to load run {}", run_id))?;
    if run.pipeline != pipeline.name {
        bail!(
            "Run {} belongs to pipeline '{}', not '{}'",
            run_id,
            run.pipeline,
            pipeline.name
        );
    }

    let warehouse = sandbox_warehouse(options.seed.as_deref())?;
    let credentials = rehearsal_credentials(config);
    let executor = build_executor(&pipeline, &warehouse, &credentials, &options, config)?;

    let outcome = match from {
        Some(task_id) => executor.resume_from(&graph, run, &task_id).await,
        None => executor.resume(&graph, run).await,
    };
    report_outcome(outcome, &warehouse, &credentials, &options).await
}

/// Show a stored run of `pipeline`
pub async fn show_status(
    pipeline: String,
    run_id: Option<String>,
    state_dir: Option<PathBuf>,
    format: ReportFormat,
    events: bool,
    config: &Config,
) -> Result<()> {
    let store = FileRunStore::new(state_dir.unwrap_or_else(|| config.state_dir()));

    let run = match run_id {
        Some(run_id) => store.load(&run_id).await?,
        None => store
            .latest(&pipeline)
            .await?
            .ok_or_else(|| anyhow!("No runs recorded for pipeline '{}'", pipeline))?,
    };

    let mut output = OutputConfig::default().with_format(format.as_str());
    output.options.include_timestamps = true;
    output.options.include_events = events;
    OutputHandler::new().output_run(&run, &output).await?;
    Ok(())
}

/// Write the star-schema pipeline template as `<name>.yaml`
pub async fn init_pipeline(name: String, output_dir: PathBuf) -> Result<()> {
    info!(
        "Initializing pipeline '{}' in {}",
        name,
        output_dir.display()
    );

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir)?;
    }

    let pipeline_file = output_dir.join(format!("{}.yaml", name));
    if pipeline_file.exists() {
        bail!("Pipeline file already exists: {}", pipeline_file.display());
    }

    std::fs::write(&pipeline_file, pipeline_template(&name))?;
    println!("Created pipeline file: {}", pipeline_file.display());
    Ok(())
}

/// The star-schema template with its name replaced
pub fn pipeline_template(name: &str) -> String {
    PIPELINE_TEMPLATE.replacen("name: sparkify", &format!("name: {}", name), 1)
}

async fn load_pipeline(path: &Path) -> Result<Pipeline> {
    PipelineParser::new()
        .parse_file(path)
        .await
        .with_context(|| format!("Failed to parse pipeline {}", path.display()))
}

/// Config and `--var` values override the pipeline's own variables
fn effective_variables(pipeline: &Pipeline, config: &Config) -> IndexMap<String, String> {
    let mut variables = pipeline.variables.clone();
    variables.extend(config.variables.clone());
    variables
}

fn latest_due_window(pipeline: &Pipeline) -> Result<Window> {
    pipeline
        .schedule
        .due_windows(Utc::now(), None)?
        .pop()
        .ok_or_else(|| {
            anyhow!(
                "No window is due for '{}'; pass --window-start and --window-end",
                pipeline.name
            )
        })
}

fn sandbox_warehouse(seed: Option<&Path>) -> Result<Arc<MemoryWarehouse>> {
    let warehouse = match seed {
        Some(path) => {
            let seed = SandboxSeed::from_file(path)
                .with_context(|| format!("Failed to read sandbox seed {}", path.display()))?;
            MemoryWarehouse::from_seed(seed)
        }
        None => MemoryWarehouse::new(),
    };
    Ok(Arc::new(warehouse))
}

fn rehearsal_credentials(config: &Config) -> Credentials {
    config
        .aws
        .credentials()
        .unwrap_or_else(|| Credentials::new(SANDBOX_ACCESS_KEY, SANDBOX_SECRET_KEY))
}

fn state_dir(options: &RehearsalOptions, config: &Config) -> PathBuf {
    options
        .state_dir
        .clone()
        .unwrap_or_else(|| config.state_dir())
}

fn build_executor(
    pipeline: &Pipeline,
    warehouse: &Arc<MemoryWarehouse>,
    credentials: &Credentials,
    options: &RehearsalOptions,
    config: &Config,
) -> Result<PipelineExecutor> {
    let max_concurrent = options.max_concurrent.unwrap_or(config.max_concurrent);
    if max_concurrent == 0 {
        bail!("max_concurrent must be at least 1");
    }

    let provider: Arc<dyn CredentialProvider> =
        Arc::new(StaticCredentialProvider::new(credentials.clone()));
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::new(state_dir(options, config)));

    Ok(PipelineExecutor::new(warehouse.clone(), provider)
        .with_max_concurrent(max_concurrent)
        .with_variables(effective_variables(pipeline, config))
        .with_store(store))
}

/// Report the run, including one an engine error halted
async fn report_outcome(
    outcome: std::result::Result<Run, ExecutionError>,
    warehouse: &MemoryWarehouse,
    credentials: &Credentials,
    options: &RehearsalOptions,
) -> Result<()> {
    match outcome {
        Ok(run) => report(&run, warehouse, credentials, options).await,
        Err(ExecutionError::Halted { run, source }) => {
            if let Err(err) = report(&run, warehouse, credentials, options).await {
                warn!("{}", err);
            }
            Err(anyhow!("Run {} halted: {}", run.id, source))
        }
        Err(err) => Err(err.into()),
    }
}

async fn report(
    run: &Run,
    warehouse: &MemoryWarehouse,
    credentials: &Credentials,
    options: &RehearsalOptions,
) -> Result<()> {
    let mut output = OutputConfig::default().with_format(options.format.as_str());
    if let Some(ref path) = options.output {
        output = output.with_destination(OutputDestination::new_file(path));
    }
    OutputHandler::new().output_run(run, &output).await?;

    if options.format == ReportFormat::Text {
        println!("\nIssued SQL:");
        for statement in warehouse.statements().await {
            println!("  {}", credentials.mask(&statement));
        }
    }

    match run.status {
        RunStatus::Succeeded => Ok(()),
        status => {
            warn!("Run {} finished with status {}", run.id, status);
            Err(anyhow!("Run {} finished with status: {}", run.id, status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::RetryPolicy;
    use tempfile::tempdir;

    #[test]
    fn test_template_is_a_valid_pipeline() {
        let pipeline = Pipeline::from_yaml(&pipeline_template("nightly")).unwrap();
        assert_eq!(pipeline.name, "nightly");

        let report = PipelineValidator::new().with_strict_mode(true).validate(&pipeline);
        assert!(report.is_valid, "{:?}", report);

        let graph = pipeline.to_graph().unwrap();
        let five_minutes = std::time::Duration::from_secs(300);
        for task_id in ["create_tables", "stage_events", "load_songplays", "load_time"] {
            assert_eq!(
                graph.get(task_id).unwrap().retry,
                RetryPolicy::fixed(4, five_minutes),
                "{}",
                task_id
            );
        }
        assert_eq!(graph.get("check_songs").unwrap().retry.max_attempts, 1);

        let plan = graph.execution_plan();
        assert_eq!(plan.total_tasks, 12);
        assert_eq!(plan.execution_depth(), 5);
        assert_eq!(plan.max_parallelism(), 4);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        init_pipeline("sparkify".to_string(), dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(dir.path().join("sparkify.yaml").exists());

        assert!(init_pipeline("sparkify".to_string(), dir.path().to_path_buf())
            .await
            .is_err());
    }

    #[test]
    fn test_config_variables_override_pipeline() {
        let pipeline = Pipeline::from_yaml(PIPELINE_TEMPLATE).unwrap();
        let mut config = Config::default();
        config
            .variables
            .insert("bucket".to_string(), "staging-bucket".to_string());

        let variables = effective_variables(&pipeline, &config);
        assert_eq!(variables["bucket"], "staging-bucket");
    }

    #[tokio::test]
    async fn test_seeded_rehearsal_succeeds_and_persists() {
        let dir = tempdir().unwrap();
        let pipeline_path = dir.path().join("mini.yaml");
        std::fs::write(
            &pipeline_path,
            r#"
name: mini
tasks:
  create:
    kind: init
    config: { create: ["CREATE TABLE IF NOT EXISTS users (userid int4)"] }
  load_users:
    kind: load_dimension
    depends_on: [create]
    config: { table: users, select: SELECT distinct userid FROM staging_events }
  check_users:
    kind: quality_check
    depends_on: [load_users]
    config: { sql: SELECT * FROM users, expected: [[8]] }
"#,
        )
        .unwrap();
        let seed_path = dir.path().join("seed.yaml");
        std::fs::write(
            &seed_path,
            "queries:\n  \"SELECT distinct userid FROM staging_events\": [[8]]\n",
        )
        .unwrap();

        let state = dir.path().join("runs");
        let options = RehearsalOptions {
            state_dir: Some(state.clone()),
            max_concurrent: Some(2),
            format: ReportFormat::Json,
            seed: Some(seed_path),
            output: Some(dir.path().join("report.json")),
        };
        let window = Window::default();
        run_pipeline(pipeline_path, Some(window), options, &Config::default())
            .await
            .unwrap();

        let run = FileRunStore::new(&state).latest("mini").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);

        let report: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_failed_rehearsal_is_an_error() {
        let dir = tempdir().unwrap();
        let pipeline_path = dir.path().join("broken.yaml");
        std::fs::write(
            &pipeline_path,
            "name: broken\ntasks:\n  check:\n    kind: quality_check\n    config: { sql: SELECT * FROM users, expected: [[8]] }\n",
        )
        .unwrap();

        let options = RehearsalOptions {
            state_dir: Some(dir.path().join("runs")),
            max_concurrent: None,
            format: ReportFormat::Json,
            seed: None,
            output: Some(dir.path().join("report.json")),
        };
        let result =
            run_pipeline(pipeline_path, Some(Window::default()), options, &Config::default()).await;
        assert!(result.is_err());
    }
}

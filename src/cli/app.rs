// ABOUTME: Main application orchestration for the starflow CLI
// ABOUTME: Coordinates between CLI arguments, configuration, and command execution

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands::{self, RehearsalOptions};
use super::{Args, Commands, Config};
use crate::engine::run::Window;

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        // Logs go to stderr so reports on stdout stay machine readable.
        match self.config.logging.format.as_str() {
            "compact" => {
                tracing_subscriber::fmt()
                    .compact()
                    .with_env_filter(env_filter)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .init();
            }
            _ => {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(!no_color)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Run the application with parsed arguments
    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting starflow v{}", env!("CARGO_PKG_VERSION"));
        debug!("Configuration loaded from: {:?}", args.config);

        if let Commands::Run { vars, .. } | Commands::Validate { vars, .. } = &args.command {
            let variables = Args::parse_variables(vars)?;
            self.config.merge_variables(variables);
        }

        match args.command {
            Commands::Validate {
                pipeline, strict, ..
            } => commands::validate_pipeline(pipeline, strict, &self.config).await,

            Commands::Plan { pipeline } => commands::plan_pipeline(pipeline).await,

            Commands::Windows {
                pipeline,
                since,
                now,
            } => commands::list_windows(pipeline, since, now).await,

            Commands::Run {
                pipeline,
                window_start,
                window_end,
                max_concurrent,
                state_dir,
                format,
                seed,
                output,
                ..
            } => {
                let window = match (window_start, window_end) {
                    (Some(start), Some(end)) if start < end => Some(Window::new(start, end)),
                    (Some(start), Some(end)) => {
                        anyhow::bail!("Window start {} is not before its end {}", start, end)
                    }
                    _ => None,
                };
                let options = RehearsalOptions {
                    state_dir,
                    max_concurrent,
                    format,
                    seed,
                    output,
                };
                commands::run_pipeline(pipeline, window, options, &self.config).await
            }

            Commands::Resume {
                pipeline,
                run_id,
                from,
                state_dir,
                format,
                seed,
            } => {
                let options = RehearsalOptions {
                    state_dir,
                    max_concurrent: None,
                    format,
                    seed,
                    output: None,
                };
                commands::resume_run(pipeline, run_id, from, options, &self.config).await
            }

            Commands::Status {
                pipeline,
                run_id,
                state_dir,
                format,
                events,
            } => {
                commands::show_status(pipeline, run_id, state_dir, format, events, &self.config)
                    .await
            }

            Commands::Init { name, output_dir } => commands::init_pipeline(name, output_dir).await,
        }
    }

    /// Create application from an optional configuration file path
    pub fn from_config_path(path: Option<PathBuf>) -> Result<Self> {
        let config = Config::load(path)?;
        Ok(Self::new(config))
    }
}

// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and the starflow subcommands

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use indexmap::IndexMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "starflow")]
#[command(about = "Orchestrates staged loads, star-schema transforms, and quality checks")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
    Yaml,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Text => "text",
            ReportFormat::Json => "json",
            ReportFormat::Yaml => "yaml",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a pipeline file without executing it
    Validate {
        #[arg(help = "Path to pipeline YAML file")]
        pipeline: PathBuf,

        #[arg(long = "var", help = "Template variables for validation (key=value)")]
        vars: Vec<String>,

        #[arg(long, help = "Treat warnings as errors")]
        strict: bool,
    },

    /// Show the order tasks would be dispatched in
    Plan {
        #[arg(help = "Path to pipeline YAML file")]
        pipeline: PathBuf,
    },

    /// List the windows the pipeline's schedule has due
    Windows {
        #[arg(help = "Path to pipeline YAML file")]
        pipeline: PathBuf,

        #[arg(long, help = "End of the last completed window (RFC 3339)")]
        since: Option<DateTime<Utc>>,

        #[arg(long, help = "Evaluate the schedule at this instant instead of now")]
        now: Option<DateTime<Utc>>,
    },

    /// Rehearse a run against the in-memory sandbox warehouse
    Run {
        #[arg(help = "Path to pipeline YAML file")]
        pipeline: PathBuf,

        #[arg(long, requires = "window_end", help = "Window start (RFC 3339)")]
        window_start: Option<DateTime<Utc>>,

        #[arg(long, requires = "window_start", help = "Window end (RFC 3339)")]
        window_end: Option<DateTime<Utc>>,

        #[arg(long, help = "Maximum number of concurrent tasks")]
        max_concurrent: Option<usize>,

        #[arg(long, help = "Directory run documents are written to")]
        state_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text", help = "Report format")]
        format: ReportFormat,

        #[arg(short = 'V', long = "var", help = "Override template variables (key=value)")]
        vars: Vec<String>,

        #[arg(long, help = "YAML file with tables, objects, and query results for the sandbox")]
        seed: Option<PathBuf>,

        #[arg(short, long, help = "Write the report to this file instead of stdout")]
        output: Option<PathBuf>,
    },

    /// Re-execute the unfinished tasks of a stored run
    Resume {
        #[arg(help = "Path to pipeline YAML file")]
        pipeline: PathBuf,

        #[arg(help = "Identifier of the run to resume")]
        run_id: String,

        #[arg(long, help = "Re-execute this task and everything downstream of it")]
        from: Option<String>,

        #[arg(long, help = "Directory run documents are read from and written to")]
        state_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text", help = "Report format")]
        format: ReportFormat,

        #[arg(long, help = "YAML file with tables, objects, and query results for the sandbox")]
        seed: Option<PathBuf>,
    },

    /// Show a stored run, the latest one by default
    Status {
        #[arg(help = "Pipeline name")]
        pipeline: String,

        #[arg(long, help = "Run identifier")]
        run_id: Option<String>,

        #[arg(long, help = "Directory run documents are read from")]
        state_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text", help = "Report format")]
        format: ReportFormat,

        #[arg(long, help = "Include the transition log")]
        events: bool,
    },

    /// Write a star-schema pipeline template
    Init {
        #[arg(help = "Name of the pipeline to create")]
        name: String,

        #[arg(short, long, help = "Output directory", default_value = ".")]
        output_dir: PathBuf,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse variables from key=value format
    pub fn parse_variables(vars: &[String]) -> anyhow::Result<IndexMap<String, String>> {
        let mut variables = IndexMap::new();

        for var in vars {
            if let Some((key, value)) = var.split_once('=') {
                variables.insert(key.to_string(), value.to_string());
            } else {
                return Err(anyhow::anyhow!(
                    "Invalid variable format '{}'. Expected 'key=value'",
                    var
                ));
            }
        }

        Ok(variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variables() {
        let vars = vec![
            "bucket=udacity-dend".to_string(),
            "region=us-west-2".to_string(),
            "filter=a=b".to_string(),
        ];

        let parsed = Args::parse_variables(&vars).unwrap();

        assert_eq!(parsed.get("bucket"), Some(&"udacity-dend".to_string()));
        assert_eq!(parsed.get("region"), Some(&"us-west-2".to_string()));
        assert_eq!(parsed.get("filter"), Some(&"a=b".to_string()));
    }

    #[test]
    fn test_parse_variables_invalid() {
        let vars = vec!["invalid_format".to_string()];
        assert!(Args::parse_variables(&vars).is_err());
    }

    #[test]
    fn test_run_arguments() {
        let args = Args::try_parse_from([
            "starflow",
            "run",
            "sparkify.yaml",
            "--window-start",
            "2019-01-12T00:00:00Z",
            "--window-end",
            "2019-01-12T01:00:00Z",
            "--format",
            "json",
            "--var",
            "bucket=test",
        ])
        .unwrap();

        match args.command {
            Commands::Run {
                pipeline,
                window_start,
                format,
                vars,
                ..
            } => {
                assert_eq!(pipeline, PathBuf::from("sparkify.yaml"));
                assert!(window_start.is_some());
                assert_eq!(format, ReportFormat::Json);
                assert_eq!(vars, vec!["bucket=test".to_string()]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_window_bounds_come_in_pairs() {
        let result = Args::try_parse_from([
            "starflow",
            "run",
            "sparkify.yaml",
            "--window-start",
            "2019-01-12T00:00:00Z",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_resume_from_task() {
        let args = Args::try_parse_from([
            "starflow",
            "-v",
            "resume",
            "sparkify.yaml",
            "run-1",
            "--from",
            "load_songplays",
        ])
        .unwrap();
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Commands::Resume { from: Some(ref task), .. } if task == "load_songplays"
        ));
    }
}

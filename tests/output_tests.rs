// ABOUTME: Integration tests for run reports
// ABOUTME: Renders finished runs as text, JSON, and YAML and writes them to files

use std::sync::Arc;

use starflow::output::{OutputConfig, OutputDestination, OutputHandler};

mod common;
use common::{executor, sandbox, test_window, SparkifyPipelineBuilder, TestEnvironment};

#[tokio::test]
async fn test_failed_check_report_shows_rows() {
    let pipeline = SparkifyPipelineBuilder::new()
        .with_users_policy("append")
        .build();
    let graph = pipeline.to_graph().unwrap();
    let warehouse = Arc::new(sandbox().with_table("users", vec![common::kaylee()]));

    let run = executor(&pipeline, warehouse)
        .execute(&pipeline.name, &graph, test_window())
        .await
        .unwrap();

    let mut config = OutputConfig::default();
    config.options.only_unsuccessful = true;
    let text = OutputHandler::new().render_run(&run, &config).await.unwrap();

    assert!(text.contains("Status: failed"));
    assert!(text.contains("✗ check_users (quality_check) failed_fatal"));
    assert!(text.contains("Expected: [(8, 'Kaylee', 'Summers', 'F', 'free')]"));
    assert!(text.contains(
        "Actual:   [(8, 'Kaylee', 'Summers', 'F', 'free'), (8, 'Kaylee', 'Summers', 'F', 'free')]"
    ));
    assert!(!text.contains("check_songs"));
}

#[tokio::test]
async fn test_reports_written_to_file() {
    let env = TestEnvironment::new();
    let pipeline = SparkifyPipelineBuilder::new().build();
    let graph = pipeline.to_graph().unwrap();
    let run = executor(&pipeline, Arc::new(sandbox()))
        .execute(&pipeline.name, &graph, test_window())
        .await
        .unwrap();

    let handler = OutputHandler::new();
    for format in ["json", "yaml"] {
        let path = env.path().join("reports").join(format!("run.{}", format));
        let mut config = OutputConfig::default()
            .with_format(format)
            .with_destination(OutputDestination::new_file(&path));
        config.options.include_events = true;
        handler.output_run(&run, &config).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&content).unwrap();
        assert_eq!(parsed["status"].as_str(), Some("succeeded"));
        assert_eq!(parsed["tasks"].as_sequence().unwrap().len(), 12);
        assert_eq!(
            parsed["events"].as_sequence().unwrap().len(),
            run.events.len()
        );
    }
}

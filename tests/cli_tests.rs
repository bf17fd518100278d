//! Integration tests for the CLI interface

mod common;

use assert_cmd::Command;
use common::Dataset;
use predicates::prelude::*;
use serde_json::Value;

fn eventmill(dataset: &Dataset) -> Command {
    let mut cmd = Command::cargo_bin("eventmill").unwrap();
    let config = dataset.dir.path().join("eventmill.toml");
    std::fs::write(
        &config,
        format!("artifact_dir = {:?}\n", dataset.artifact_dir().display().to_string()),
    )
    .unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = Command::cargo_bin("eventmill").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("worker").not());
}

#[test]
fn test_process_prints_json() {
    let dataset = Dataset::new(1_000);
    let output = eventmill(&dataset)
        .args(["process", "-w", "4"])
        .arg(&dataset.path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let result: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(result["total"], 1_000);
    assert_eq!(result["chunks_processed"], 4);
    assert_eq!(result["method"], "in_process");
    assert_eq!(result["status_counts"]["valid"], 900);
}

#[test]
fn test_process_out_of_process_writes_output_file() {
    let dataset = Dataset::new(3_000);
    let output = dataset.dir.path().join("result.json");

    eventmill(&dataset)
        .args(["process", "-w", "3", "-m", "out_of_process", "-o"])
        .arg(&output)
        .arg(&dataset.path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let result: Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(result["total"], 3_000);
    assert_eq!(result["method"], "out_of_process");
    assert_eq!(result["num_workers"], 3);
}

#[test]
fn test_unknown_method_is_argument_error() {
    let dataset = Dataset::new(10);
    eventmill(&dataset)
        .args(["process", "-m", "mpi"])
        .arg(&dataset.path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown method: mpi"));
}

#[test]
fn test_zero_workers_is_argument_error() {
    let dataset = Dataset::new(10);
    eventmill(&dataset)
        .args(["process", "-w", "0"])
        .arg(&dataset.path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid worker count 0"));
}

#[test]
fn test_missing_input_is_argument_error() {
    let dataset = Dataset::new(10);
    eventmill(&dataset)
        .args(["process", "/nonexistent/events.csv"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "Input file not found: /nonexistent/events.csv",
        ));
}

#[test]
fn test_config_file_sets_default_workers() {
    let dataset = Dataset::new(100);
    let config = dataset.dir.path().join("workers.toml");
    std::fs::write(&config, "default_workers = 5\n").unwrap();

    let output = Command::cargo_bin("eventmill")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("process")
        .arg(&dataset.path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let result: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(result["num_workers"], 5);
    assert_eq!(result["chunks_processed"], 5);
}

#[test]
fn test_invalid_config_file_is_reported() {
    let dataset = Dataset::new(10);
    let config = dataset.dir.path().join("bad.toml");
    std::fs::write(&config, "default_workers = \"lots\"\n").unwrap();

    Command::cargo_bin("eventmill")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("process")
        .arg(&dataset.path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_worker_subcommand_writes_artifact() {
    let dataset = Dataset::new(100);
    let artifact = dataset.dir.path().join("chunk_1.json");

    Command::cargo_bin("eventmill")
        .unwrap()
        .args(["worker", "--input"])
        .arg(&dataset.path)
        .args(["--start-row", "50", "--row-count", "50", "--worker-id", "1", "--output"])
        .arg(&artifact)
        .assert()
        .success();

    let value: Value = serde_json::from_str(&std::fs::read_to_string(&artifact).unwrap()).unwrap();
    assert_eq!(value["chunk_id"], 1);
    assert_eq!(value["worker_id"], 1);
    assert_eq!(value["total"], 50);
    assert!(value["processing_time"].as_f64().unwrap() >= 0.0);
}

#[test]
fn test_worker_reports_malformed_row() {
    let dataset = Dataset::with_bad_row(20, 7);
    let artifact = dataset.dir.path().join("chunk_0.json");

    Command::cargo_bin("eventmill")
        .unwrap()
        .args(["worker", "--input"])
        .arg(&dataset.path)
        .args(["--start-row", "0", "--row-count", "20", "--worker-id", "0", "--output"])
        .arg(&artifact)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed record at data row 7"));

    assert!(!artifact.exists());
}

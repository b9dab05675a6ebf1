//! Integration tests for the CLI interface
//!
//! Tests argument parsing, configuration errors and exit codes

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn parallelit(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("parallelit").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("PARALLELIT_OUTPUT_DIR")
        .env_remove("PARALLELIT_STAGGER")
        .env_remove("PARALLELIT_LOG_INTERVAL")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help_flag() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_run_help_lists_flags() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--count"))
        .stdout(predicate::str::contains("--worker"))
        .stdout(predicate::str::contains("--gatherer"))
        .stdout(predicate::str::contains("--log-interval"))
        .stdout(predicate::str::contains("--stagger"));
}

#[test]
fn test_invalid_command() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_missing_count_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-w", "./worker"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("worker count is required"));
}

#[test]
fn test_missing_worker_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-c", "2"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("worker executable is required"));
}

#[test]
fn test_zero_workers_rejected() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-c", "0", "-w", "./worker"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at least 1"));
}

#[test]
fn test_invalid_stagger_rejected_by_parser() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-c", "2", "-w", "./worker", "--stagger", "later"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--stagger"));
}

#[test]
fn test_missing_input_without_gatherer_fails() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-c", "2", "-w", "./worker", "-o", "out"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("STEP1.csv"));
}

#[test]
fn test_unknown_config_key_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("parallelit.toml"), "workers = 3\n").unwrap();
    parallelit(&dir)
        .args(["run", "-c", "2", "-w", "./worker"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TOML"));
}

//! End-to-end runs against the demo gatherer and worker binaries

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const GATHERER: &str = env!("CARGO_BIN_EXE_example-gatherer");
const WORKER: &str = env!("CARGO_BIN_EXE_example-worker");

fn parallelit(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("parallelit").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("PARALLELIT_OUTPUT_DIR")
        .env_remove("PARALLELIT_LOG_INTERVAL")
        .env("PARALLELIT_STAGGER", "0s");
    cmd
}

fn read_rows(path: &Path) -> Vec<(u32, u32)> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            (r[0].parse().unwrap(), r[1].parse().unwrap())
        })
        .collect()
}

#[test]
fn test_gather_split_work_and_merge() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-c", "4", "-g", GATHERER, "-w", WORKER, "-i", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[Gatherer] Done."))
        .stdout(predicate::str::contains("[Worker 4] Done."))
        .stdout(predicate::str::contains("At item 10/"))
        .stdout(predicate::str::contains("All 4 children have finished"))
        .stdout(predicate::str::ends_with("Done.\n"));

    let output = dir.path().join("output");
    let merged = read_rows(&output.join("OUT.csv"));
    let expected: Vec<(u32, u32)> = (1..=163).map(|i| (i, (i + 20) * 2)).collect();
    assert_eq!(merged, expected);

    for worker in 1..=4 {
        assert!(output
            .join(format!("STEP2-WORKER-{worker}-OUT.csv"))
            .exists());
    }

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("run-report.json")).unwrap())
            .unwrap();
    assert_eq!(report["item_count"], 163);
    assert_eq!(report["aggregate"]["total_rows"], 163);
}

#[test]
fn test_legacy_tail_gives_same_output() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-c", "3", "-g", GATHERER, "-w", WORKER, "--legacy-tail"])
        .assert()
        .success();

    let output = dir.path().join("output");
    assert_eq!(read_rows(&output.join("OUT.csv")).len(), 163);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("run-report.json")).unwrap())
            .unwrap();
    assert_eq!(report["slices"][2]["end"], 164);
}

#[test]
fn test_existing_input_without_gatherer() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("data");
    fs::create_dir_all(&output).unwrap();
    fs::write(output.join("STEP1.csv"), "id,value\n1,5\n2,6\n3,7\n").unwrap();

    parallelit(&dir)
        .args(["run", "-c", "2", "-w", WORKER, "-o", "data"])
        .assert()
        .success();

    assert_eq!(
        read_rows(&output.join("OUT.csv")),
        vec![(1, 10), (2, 12), (3, 14)]
    );
}

#[test]
fn test_failing_workers_still_produce_merged_file() {
    let dir = TempDir::new().unwrap();
    parallelit(&dir)
        .args(["run", "-c", "2", "-g", GATHERER, "-w", "false"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All 2 children have finished"));

    let output = dir.path().join("output");
    assert_eq!(
        fs::read_to_string(output.join("OUT.csv")).unwrap(),
        "id,value\n"
    );
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("run-report.json")).unwrap())
            .unwrap();
    assert_eq!(report["workers"][0]["outcome"]["state"], "failed");
    assert_eq!(report["aggregate"]["slices"][1]["status"], "missing");
}

#[test]
fn test_config_file_supplies_settings() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("parallelit.toml"),
        format!(
            "worker_count = 2\nworker = \"{WORKER}\"\ngatherer = \"{GATHERER}\"\noutput_dir = \"from-config\"\n"
        ),
    )
    .unwrap();

    parallelit(&dir).arg("run").assert().success();

    assert_eq!(
        read_rows(&dir.path().join("from-config").join("OUT.csv")).len(),
        163
    );
}

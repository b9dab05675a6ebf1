//! Pipeline driver: gather, plan, launch, join, aggregate.
//!
//! The driver owns the [`RunState`]. The interrupt listener closes over that
//! state and only ever calls [`RunState::cancel_all`]; everything else sees
//! the shutdown through the cancellation tokens.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregate::{aggregate, AggregateReport};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, RunState, WorkerReport};
use crate::records::count_rows;
use crate::slice::{plan, Slice, TailPolicy};
use crate::subprocess::{ProcessRunner, SubprocessManager};

/// Everything known about a finished run, written to `run-report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub runtime: Duration,
    pub input: PathBuf,
    /// Exit status of the gatherer, `None` when gathering was skipped
    pub gatherer: Option<String>,
    pub item_count: usize,
    pub tail_policy: TailPolicy,
    pub slices: Vec<Slice>,
    pub workers: Vec<WorkerReport>,
    pub aggregate: AggregateReport,
}

impl RunReport {
    pub fn failed_workers(&self) -> Vec<usize> {
        self.workers
            .iter()
            .filter(|w| !w.outcome.is_success())
            .map(|w| w.worker_number)
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for Ctrl-C or SIGTERM. Never resolves if no handler can be installed.
pub async fn shutdown_signal() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                            sigterm.recv().await;
                            return ShutdownSignal::Terminate;
                        }
                        ShutdownSignal::Interrupt
                    }
                    _ = sigterm.recv() => ShutdownSignal::Terminate,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                wait_for_ctrl_c().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await
    }
}

async fn wait_for_ctrl_c() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}

pub struct Pipeline {
    state: Arc<RunState>,
    runner: Arc<dyn ProcessRunner>,
}

impl Pipeline {
    pub fn new(config: RunConfig, subprocess: SubprocessManager) -> Self {
        Self {
            state: Arc::new(RunState::new(config)),
            runner: subprocess.runner(),
        }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Run to completion, cancelling every worker on Ctrl-C or SIGTERM.
    pub async fn run(&self) -> Result<RunReport> {
        let state = Arc::clone(&self.state);
        let listener = tokio::spawn(async move {
            let signal = shutdown_signal().await;
            let workers = state.cancel_all();
            tracing::warn!("Received {}, cancelling {} workers", signal, workers);
        });

        let result = self.execute().await;

        listener.abort();
        // Finished workers ignore this; anything still outstanding is stopped
        self.state.cancel_all();
        result
    }

    /// The pipeline itself, without installing signal handlers.
    pub async fn execute(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let config = self.state.config();
        let layout = config.layout();
        layout.ensure_dir()?;

        let orchestrator = Orchestrator::new(Arc::clone(&self.runner), Arc::clone(&self.state));

        let gatherer = match orchestrator.gather().await {
            Ok(status) => status.map(|s| s.to_string()),
            Err(Error::Spawn { command, source }) => {
                tracing::error!(
                    "Gatherer '{}' could not be started: {}; using existing input",
                    command,
                    source
                );
                Some(format!("not started: {source}"))
            }
            Err(e) => return Err(e),
        };

        let input = layout.input_path();
        let item_count = count_rows(&input)?;
        tracing::info!("{} items in {}", item_count, input.display());

        let slices = plan(item_count, config.worker_count, config.tail_policy)?;
        tracing::info!(
            "Slices for workers: {}",
            slices
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        );

        // A worker that never writes must not leave an older run's output behind
        for slice in &slices {
            if layout.remove_worker_output(slice.worker_number())? {
                tracing::debug!("Removed stale output of worker {}", slice.worker_number());
            }
        }

        let workers = orchestrator.launch_workers(&slices).await;

        if self.state.is_shutting_down() {
            return Err(Error::Interrupted);
        }

        let aggregate = {
            let slices = slices.clone();
            let layout = layout.clone();
            let header = config.default_header.clone();
            tokio::task::spawn_blocking(move || aggregate(&slices, &layout, &header)).await??
        };
        println!("All {} children have finished", workers.len());

        let runtime = clock.elapsed();
        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            runtime,
            input,
            gatherer,
            item_count,
            tail_policy: config.tail_policy,
            slices,
            workers,
            aggregate,
        };
        report.write(&layout.report_path())?;

        let failed = report.failed_workers();
        if !failed.is_empty() {
            tracing::warn!(
                "Output is incomplete; workers {:?} did not succeed",
                failed
            );
        }
        tracing::info!(
            "runtime: {}",
            humantime_serde::re::humantime::format_duration(runtime)
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartialRunConfig;
    use crate::orchestrator::{WorkerFailure, WorkerOutcome};
    use crate::records::{extract, RowRecord, RowWriter};
    use crate::subprocess::{MockProcessRunner, ProcessCommand};
    use std::fs;
    use tempfile::TempDir;

    fn config(dir: &Path, workers: usize, gatherer: Option<&str>) -> RunConfig {
        PartialRunConfig {
            worker_count: Some(workers),
            worker: Some("worker".to_string()),
            gatherer: gatherer.map(str::to_string),
            stagger: Some(Duration::ZERO),
            output_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
        .resolve()
        .unwrap()
    }

    fn flag(command: &ProcessCommand, name: &str) -> String {
        let args = &command.args;
        let position = args.iter().position(|a| a == name).unwrap();
        args[position + 1].clone()
    }

    /// Does what a real worker would: doubles the value column of its slice.
    fn fake_worker(command: &ProcessCommand) {
        let input = PathBuf::from(command.args.last().unwrap());
        let slice = Slice {
            index: 0,
            start: flag(command, "-s").parse().unwrap(),
            end: flag(command, "-e").parse().unwrap(),
        };
        let output = PathBuf::from(flag(command, "-o"));

        let mut writer = RowWriter::create(&output, &RowRecord::new(["id", "value"])).unwrap();
        for row in extract(&input, &slice).unwrap() {
            let doubled = row.get(1).unwrap().parse::<i64>().unwrap() * 2;
            writer
                .write_row(&RowRecord::new([row.get(0).unwrap().to_string(), doubled.to_string()]))
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn fake_gatherer(command: &ProcessCommand) {
        let output = PathBuf::from(command.args.last().unwrap());
        let mut contents = String::from("id,value\n");
        for i in 1..=10 {
            contents.push_str(&format!("{},{}\n", i, i + 20));
        }
        fs::write(output, contents).unwrap();
    }

    fn pipeline(config: RunConfig, mock: &MockProcessRunner) -> Pipeline {
        Pipeline::new(config, SubprocessManager::new(Arc::new(mock.clone())))
    }

    #[tokio::test]
    async fn test_full_run_with_gatherer() {
        let temp_dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_command("gather").on_spawn(fake_gatherer).finish();
        mock.expect_command("worker").on_spawn(fake_worker).finish();

        let config = config(temp_dir.path(), 3, Some("gather"));
        let layout = config.layout();
        let report = pipeline(config, &mock).execute().await.unwrap();

        assert_eq!(report.item_count, 10);
        assert_eq!(report.gatherer.as_deref(), Some("exit code 0"));
        assert!(report.failed_workers().is_empty());
        assert_eq!(report.aggregate.total_rows, 10);

        let merged = extract(
            &layout.aggregate_path(),
            &Slice {
                index: 0,
                start: 0,
                end: 100,
            },
        )
        .unwrap();
        let values: Vec<&str> = merged.iter().map(|r| r.get(1).unwrap()).collect();
        assert_eq!(
            values,
            vec!["42", "44", "46", "48", "50", "52", "54", "56", "58", "60"]
        );

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(layout.report_path()).unwrap()).unwrap();
        assert_eq!(json["item_count"], 10);
        assert_eq!(json["workers"].as_array().unwrap().len(), 3);
        assert_eq!(json["workers"][0]["outcome"]["state"], "succeeded");
    }

    #[tokio::test]
    async fn test_run_without_gatherer_uses_existing_input() {
        let temp_dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_command("worker").on_spawn(fake_worker).finish();

        let config = config(temp_dir.path(), 2, None);
        fs::write(config.layout().input_path(), "id,value\n1,1\n2,2\n3,3\n").unwrap();

        let report = pipeline(config, &mock).execute().await.unwrap();

        assert_eq!(report.gatherer, None);
        assert_eq!(report.item_count, 3);
        assert_eq!(report.aggregate.total_rows, 3);
        assert!(!mock
            .get_call_history()
            .iter()
            .any(|s| s.command.program == "gather"));
    }

    #[tokio::test]
    async fn test_gatherer_spawn_failure_continues_with_existing_input() {
        let temp_dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_command("gather").fails_to_spawn().finish();
        mock.expect_command("worker").on_spawn(fake_worker).finish();

        let config = config(temp_dir.path(), 1, Some("gather"));
        fs::write(config.layout().input_path(), "id,value\n1,5\n").unwrap();

        let report = pipeline(config, &mock).execute().await.unwrap();

        assert!(report.gatherer.unwrap().starts_with("not started"));
        assert_eq!(report.aggregate.total_rows, 1);
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();

        let err = pipeline(config(temp_dir.path(), 2, None), &mock)
            .execute()
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(mock.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_failed_worker_yields_partial_output() {
        let temp_dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_command("gather").on_spawn(fake_gatherer).finish();
        mock.expect_command("worker")
            .with_args(|args| args.iter().any(|a| a.ends_with("STEP2-WORKER-2-OUT.csv")))
            .returns_exit_code(2)
            .finish();
        mock.expect_command("worker").on_spawn(fake_worker).finish();

        let config = config(temp_dir.path(), 2, Some("gather"));
        let report = pipeline(config, &mock).execute().await.unwrap();

        assert_eq!(report.failed_workers(), vec![2]);
        assert_eq!(
            report.workers[1].outcome,
            WorkerOutcome::Failed(WorkerFailure::Exit { code: 2 })
        );
        assert_eq!(report.aggregate.missing_slices(), vec![2]);
        assert_eq!(report.aggregate.total_rows, 5);
    }

    #[tokio::test]
    async fn test_outputs_from_earlier_run_are_not_merged() {
        let temp_dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_command("worker").fails_to_spawn().finish();

        let config = config(temp_dir.path(), 2, None);
        let layout = config.layout();
        fs::write(layout.input_path(), "id,value\n1,1\n2,2\n").unwrap();
        fs::write(layout.worker_output_path(1), "id,value\n999,999\n").unwrap();
        fs::write(layout.worker_output_path(2), "id,value\n888,888\n").unwrap();

        let report = pipeline(config, &mock).execute().await.unwrap();

        assert_eq!(report.failed_workers(), vec![1, 2]);
        assert_eq!(report.aggregate.missing_slices(), vec![1, 2]);
        assert!(!report.aggregate.is_complete());
        assert_eq!(report.aggregate.total_rows, 0);
        assert_eq!(
            fs::read_to_string(layout.aggregate_path()).unwrap(),
            "id,value\n"
        );
    }

    #[tokio::test]
    async fn test_interrupt_cancels_workers_and_skips_aggregation() {
        let temp_dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_command("worker").runs_until_terminated().finish();

        let config = config(temp_dir.path(), 2, None);
        let layout = config.layout();
        fs::write(layout.input_path(), "id,value\n1,1\n2,2\n").unwrap();
        let pipeline = pipeline(config, &mock);
        let state = Arc::clone(pipeline.state());

        let interrupter = {
            let mock = mock.clone();
            async move {
                while mock.spawned_tags().len() < 2 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                state.cancel_all();
            }
        };
        let (result, _) = tokio::join!(pipeline.execute(), interrupter);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(mock.terminated_tags().len(), 2);
        assert!(!layout.aggregate_path().exists());
    }

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}

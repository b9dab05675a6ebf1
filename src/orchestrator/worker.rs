//! Lifecycle of a single worker process: stagger delay, spawn, wait, and
//! cancellation.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use crate::config::{OutputLayout, RunConfig};
use crate::slice::Slice;
use crate::subprocess::{
    ExitStatus, ProcessCommand, ProcessCommandBuilder, ProcessRunner, ProcessTag, RunningProcess,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Pending,
    Succeeded(i32),
    Failed(WorkerFailure),
}

impl WorkerOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, WorkerOutcome::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Succeeded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum WorkerFailure {
    Exit { code: i32 },
    Signal { signal: i32 },
    Spawn { message: String },
    Wait { message: String },
    Cancelled { started: bool },
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerFailure::Exit { code } => write!(f, "exited with code {code}"),
            WorkerFailure::Signal { signal } => write!(f, "terminated by signal {signal}"),
            WorkerFailure::Spawn { message } => write!(f, "could not be started: {message}"),
            WorkerFailure::Wait { message } => write!(f, "could not be awaited: {message}"),
            WorkerFailure::Cancelled { started: true } => write!(f, "cancelled while running"),
            WorkerFailure::Cancelled { started: false } => write!(f, "cancelled before start"),
        }
    }
}

impl From<ExitStatus> for WorkerOutcome {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => WorkerOutcome::Succeeded(0),
            ExitStatus::Error(code) => WorkerOutcome::Failed(WorkerFailure::Exit { code }),
            ExitStatus::Signal(signal) => WorkerOutcome::Failed(WorkerFailure::Signal { signal }),
        }
    }
}

/// Everything the orchestrator tracks for one worker while it runs.
pub struct WorkerHandle {
    slice: Slice,
    cancel_token: CancelToken,
    process: Option<Box<dyn RunningProcess>>,
    outcome: WorkerOutcome,
    spawned_at: Option<Instant>,
}

impl WorkerHandle {
    pub fn new(slice: Slice, cancel_token: CancelToken) -> Self {
        Self {
            slice,
            cancel_token,
            process: None,
            outcome: WorkerOutcome::Pending,
            spawned_at: None,
        }
    }

    pub fn worker_number(&self) -> usize {
        self.slice.worker_number()
    }

    pub fn tag(&self) -> ProcessTag {
        ProcessTag::Worker(self.worker_number())
    }

    pub fn outcome(&self) -> &WorkerOutcome {
        &self.outcome
    }

    /// Leave `Pending`. Only the first call has an effect.
    pub fn record(&mut self, outcome: WorkerOutcome) -> bool {
        if !self.outcome.is_pending() {
            tracing::warn!(
                worker = self.worker_number(),
                "Ignoring second outcome {:?}, already {:?}",
                outcome,
                self.outcome
            );
            return false;
        }
        self.outcome = outcome;
        // Outcome observed; the process reference is no longer needed
        self.process = None;
        true
    }

    fn into_report(self) -> WorkerReport {
        WorkerReport {
            worker_number: self.worker_number(),
            slice: self.slice,
            started: self.spawned_at.is_some(),
            runtime: self.spawned_at.map(|at| at.elapsed()),
            outcome: self.outcome,
        }
    }
}

/// Final record of one worker, in slice order.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker_number: usize,
    pub slice: Slice,
    pub started: bool,
    #[serde(with = "humantime_serde")]
    pub runtime: Option<Duration>,
    pub outcome: WorkerOutcome,
}

/// Command line of the worker for `slice`:
/// `<worker...> [subcommand] -n N -s START -e END -o OUTPUT -i INTERVAL INPUT`.
pub fn worker_command(config: &RunConfig, layout: &OutputLayout, slice: &Slice) -> ProcessCommand {
    let number = slice.worker_number();
    let mut builder = ProcessCommandBuilder::from_parts(&config.worker);
    if let Some(subcommand) = &config.worker_subcommand {
        builder = builder.arg(subcommand);
    }
    let output = layout.worker_output_path(number);
    let input = layout.input_path();
    builder
        .args([
            "-n".to_string(),
            number.to_string(),
            "-s".to_string(),
            slice.start.to_string(),
            "-e".to_string(),
            slice.end.to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "-i".to_string(),
            config.log_interval.to_string(),
        ])
        .arg(&input.to_string_lossy())
        .build()
}

/// Run one worker to completion. Never fails: every problem ends up in the
/// report's outcome.
pub async fn run_worker(
    runner: &dyn ProcessRunner,
    command: ProcessCommand,
    slice: Slice,
    delay: Duration,
    cancel_token: CancelToken,
) -> WorkerReport {
    let mut handle = WorkerHandle::new(slice, cancel_token);
    let cancel_token = handle.cancel_token.clone();
    let tag = handle.tag();

    if !delay.is_zero() {
        tracing::debug!(worker = handle.worker_number(), "Starting in {:?}", delay);
    }
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => {
            tracing::info!("{} cancelled before start", tag);
            handle.record(WorkerOutcome::Failed(WorkerFailure::Cancelled { started: false }));
            return handle.into_report();
        }
        _ = tokio::time::sleep(delay) => {}
    }

    tracing::info!(
        worker = handle.worker_number(),
        start = slice.start,
        end = slice.end,
        "{} starting on slice {}",
        tag,
        slice
    );

    let process = match runner.spawn(command, tag).await {
        Ok(process) => process,
        Err(e) => {
            tracing::error!("{} failed to start: {}", tag, e);
            handle.record(WorkerOutcome::Failed(WorkerFailure::Spawn {
                message: e.to_string(),
            }));
            return handle.into_report();
        }
    };
    handle.spawned_at = Some(Instant::now());
    let process = handle.process.insert(process);

    let waited = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => None,
        status = process.wait() => Some(status),
    };

    let outcome = match waited {
        None => {
            tracing::warn!("{} cancelled, requesting termination", tag);
            if let Err(e) = process.terminate() {
                tracing::warn!("{} termination request failed: {}", tag, e);
            }
            WorkerOutcome::Failed(WorkerFailure::Cancelled { started: true })
        }
        Some(Ok(status)) => {
            if status.success() {
                tracing::info!("{} child process exited with {}", tag, status);
            } else {
                tracing::error!("{} child process exited with {}", tag, status);
            }
            WorkerOutcome::from(status)
        }
        Some(Err(e)) => {
            tracing::error!("{} could not be awaited: {}", tag, e);
            WorkerOutcome::Failed(WorkerFailure::Wait {
                message: e.to_string(),
            })
        }
    };

    handle.record(outcome);
    handle.into_report()
}

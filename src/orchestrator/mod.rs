//! Process orchestration: one optional gatherer, then one worker process per
//! slice.
//!
//! Workers are launched with a staggered start (`index * stagger`) and then run
//! fully in parallel. The coordinator itself never spawns tasks for them; it
//! drives all worker futures from one place and joins them with a single
//! barrier, so a crashing worker never takes its siblings down.

pub mod cancel;
pub mod gather;
pub mod worker;

pub use cancel::{CancelToken, RunState};
pub use worker::{worker_command, WorkerFailure, WorkerHandle, WorkerOutcome, WorkerReport};

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::slice::Slice;
use crate::subprocess::{ExitStatus, ProcessRunner};

pub struct Orchestrator {
    runner: Arc<dyn ProcessRunner>,
    state: Arc<RunState>,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn ProcessRunner>, state: Arc<RunState>) -> Self {
        Self { runner, state }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Run the configured gatherer, if any. `Ok(None)` when gathering is skipped.
    pub async fn gather(&self) -> Result<Option<ExitStatus>> {
        let config = self.state.config();
        let Some(gatherer) = &config.gatherer else {
            tracing::info!("No gatherer configured, using existing input");
            return Ok(None);
        };

        let status = gather::gather(
            self.runner.as_ref(),
            gatherer,
            &config.layout().input_path(),
            self.state.shutdown_token(),
        )
        .await?;
        Ok(Some(status))
    }

    /// Launch one worker per slice and wait for all of them.
    ///
    /// Tokens are registered up front, before any delay starts, so a shutdown
    /// reaches workers that are still waiting for their turn. Reports come
    /// back in slice order whatever order the processes finished in.
    pub async fn launch_workers(&self, slices: &[Slice]) -> Vec<WorkerReport> {
        let config = self.state.config();
        let layout = config.layout();

        let workers = slices.iter().map(|slice| {
            let token = self.state.register_worker();
            let command = worker_command(config, &layout, slice);
            let delay = launch_delay(config.stagger, slice.index);
            worker::run_worker(self.runner.as_ref(), command, *slice, delay, token)
        });

        let reports = join_all(workers).await;

        let failed = reports.iter().filter(|r| !r.outcome.is_success()).count();
        if failed > 0 {
            tracing::warn!(
                "{} of {} workers did not succeed; aggregating what is available",
                failed,
                reports.len()
            );
        }
        reports
    }
}

/// Start delay of the worker at `index`: `index * stagger`, saturating.
pub fn launch_delay(stagger: Duration, index: usize) -> Duration {
    u32::try_from(index)
        .ok()
        .and_then(|index| stagger.checked_mul(index))
        .unwrap_or(Duration::MAX)
}

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use crate::config::RunConfig;

/// Cooperative cancellation flag shared between the coordinator and one worker.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one run, owned by the pipeline driver and shared with the
/// orchestrator and the interrupt handler.
pub struct RunState {
    config: RunConfig,
    shutdown: CancelToken,
    worker_tokens: Mutex<Vec<CancelToken>>,
}

impl RunState {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            shutdown: CancelToken::new(),
            worker_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run-wide token; cancelled by [`RunState::cancel_all`].
    pub fn shutdown_token(&self) -> &CancelToken {
        &self.shutdown
    }

    /// Create and track the token of one worker. Tokens registered after
    /// shutdown started come back already cancelled.
    pub fn register_worker(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut tokens = self
            .worker_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tokens.push(token.clone());
        // cancel_all flags shutdown before taking the lock
        if self.shutdown.is_cancelled() {
            token.cancel();
        }
        token
    }

    /// Cancel the run and every outstanding worker. Returns how many worker
    /// tokens were tracked.
    pub fn cancel_all(&self) -> usize {
        self.shutdown.cancel();
        let tokens = self
            .worker_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for token in tokens.iter() {
            token.cancel();
        }
        tokens.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartialRunConfig;
    use std::time::Duration;

    fn state() -> RunState {
        let config = PartialRunConfig {
            worker_count: Some(2),
            worker: Some("./worker".to_string()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        RunState::new(config)
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake up")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_is_immediate_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already-cancelled token resolves immediately");
    }

    #[test]
    fn test_cancel_all_fans_out() {
        let state = state();
        let first = state.register_worker();
        let second = state.register_worker();

        assert_eq!(state.cancel_all(), 2);
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(state.is_shutting_down());
    }

    #[test]
    fn test_register_after_shutdown_is_cancelled() {
        let state = state();
        state.cancel_all();
        assert!(state.register_worker().is_cancelled());
    }
}

//! Child process abstraction used for the gatherer and the workers
//!
//! Production code goes through [`TokioProcessRunner`]; tests swap in
//! [`MockProcessRunner`] behind the same [`ProcessRunner`] trait.

pub mod builder;
pub mod error;
pub mod forward;
pub mod mock;
pub mod runner;


pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use forward::{StreamProcessor, StreamSource, TaggedConsoleProcessor};
pub use mock::{MockCommandConfig, MockProcessRunner, MockSpawn};
pub use runner::{ExitStatus, ProcessCommand, ProcessRunner, ProcessTag, RunningProcess};

use std::sync::Arc;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(runner::TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }
}

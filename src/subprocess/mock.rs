use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessRunner, ProcessTag, RunningProcess};

type ArgsMatcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;
type SpawnHook = Box<dyn Fn(&ProcessCommand) + Send + Sync>;

/// Scripted [`ProcessRunner`] that never starts a real process.
#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    history: Arc<Mutex<Vec<MockSpawn>>>,
    terminated: Arc<Mutex<Vec<u32>>>,
    next_pid: Arc<AtomicU32>,
}

/// One recorded spawn.
#[derive(Debug, Clone)]
pub struct MockSpawn {
    pub pid: u32,
    pub tag: ProcessTag,
    pub command: ProcessCommand,
}

struct MockExpectation {
    program: String,
    args_matcher: Option<ArgsMatcher>,
    on_spawn: Option<SpawnHook>,
    behavior: MockBehavior,
}

#[derive(Debug, Clone)]
struct MockBehavior {
    spawn_fails: bool,
    /// None runs until terminated
    runtime: Option<Duration>,
    status: ExitStatus,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            history: Arc::new(Mutex::new(Vec::new())),
            terminated: Arc::new(Mutex::new(Vec::new())),
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    pub fn expect_command(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                on_spawn: None,
                behavior: MockBehavior {
                    spawn_fails: false,
                    runtime: Some(Duration::ZERO),
                    status: ExitStatus::Success,
                },
            },
        }
    }

    pub fn get_call_history(&self) -> Vec<MockSpawn> {
        self.history.lock().unwrap().clone()
    }

    /// Tags of every process that was actually started, in spawn order.
    pub fn spawned_tags(&self) -> Vec<ProcessTag> {
        self.get_call_history().iter().map(|s| s.tag).collect()
    }

    /// Tags of every process that received a termination request.
    pub fn terminated_tags(&self) -> Vec<ProcessTag> {
        let terminated = self.terminated.lock().unwrap().clone();
        let history = self.get_call_history();
        terminated
            .iter()
            .filter_map(|pid| history.iter().find(|s| s.pid == *pid).map(|s| s.tag))
            .collect()
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = self.history.lock().unwrap();
        history
            .iter()
            .filter(|s| s.command.program == program)
            .count()
            == times
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    /// Run `hook` synchronously at spawn time, e.g. to write an output file.
    pub fn on_spawn<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ProcessCommand) + Send + Sync + 'static,
    {
        self.expectation.on_spawn = Some(Box::new(hook));
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.behavior.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn returns_signal(mut self, signal: i32) -> Self {
        self.expectation.behavior.status = ExitStatus::Signal(signal);
        self
    }

    pub fn runs_for(mut self, runtime: Duration) -> Self {
        self.expectation.behavior.runtime = Some(runtime);
        self
    }

    pub fn runs_until_terminated(mut self) -> Self {
        self.expectation.behavior.runtime = None;
        self
    }

    pub fn fails_to_spawn(mut self) -> Self {
        self.expectation.behavior.spawn_fails = true;
        self
    }

    pub fn finish(self) {
        self.runner
            .expectations
            .lock()
            .unwrap()
            .push(self.expectation);
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn spawn(
        &self,
        command: ProcessCommand,
        tag: ProcessTag,
    ) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let expectations = self.expectations.lock().unwrap();
        let expectation = expectations
            .iter()
            .find(|e| {
                e.program == command.program
                    && e
                        .args_matcher
                        .as_ref()
                        .map_or(true, |matcher| matcher(&command.args))
            })
            .ok_or_else(|| {
                ProcessError::MockExpectationNotMet(format!(
                    "No expectation found for command: {}",
                    command.display()
                ))
            })?;

        if expectation.behavior.spawn_fails {
            return Err(ProcessError::CommandNotFound(command.program.clone()));
        }

        if let Some(hook) = &expectation.on_spawn {
            hook(&command);
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.history.lock().unwrap().push(MockSpawn {
            pid,
            tag,
            command,
        });

        let (terminated, _) = watch::channel(false);
        Ok(Box::new(MockProcess {
            pid,
            behavior: expectation.behavior.clone(),
            terminated,
            registry: Arc::clone(&self.terminated),
        }))
    }
}

struct MockProcess {
    pid: u32,
    behavior: MockBehavior,
    terminated: watch::Sender<bool>,
    registry: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl RunningProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let mut terminated = self.terminated.subscribe();
        let stop = async move {
            let _ = terminated.wait_for(|t| *t).await;
        };

        match self.behavior.runtime {
            Some(runtime) => {
                tokio::select! {
                    _ = tokio::time::sleep(runtime) => Ok(self.behavior.status.clone()),
                    _ = stop => Ok(ExitStatus::Signal(15)),
                }
            }
            None => {
                stop.await;
                Ok(ExitStatus::Signal(15))
            }
        }
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        self.registry.lock().unwrap().push(self.pid);
        self.terminated.send_replace(true);
        Ok(())
    }
}

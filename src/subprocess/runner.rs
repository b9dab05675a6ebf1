use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::error::ProcessError;
use super::forward::{forward_lines, StreamProcessor, StreamSource, TaggedConsoleProcessor};

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }

    /// Convert a std exit status, keeping the signal number on Unix.
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::from_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn from_signal_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(signal) => ExitStatus::Signal(signal),
            None => ExitStatus::Error(1),
        }
    }

    #[cfg(not(unix))]
    fn from_signal_status(_status: std::process::ExitStatus) -> Self {
        ExitStatus::Error(1)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit code 0"),
            ExitStatus::Error(code) => write!(f, "exit code {code}"),
            ExitStatus::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Console role of a child process. Prefixes every forwarded output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessTag {
    Gatherer,
    Worker(usize),
}

impl fmt::Display for ProcessTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessTag::Gatherer => write!(f, "[Gatherer]"),
            ProcessTag::Worker(number) => write!(f, "[Worker {number}]"),
        }
    }
}

/// A launched child process.
///
/// `wait` is cancel-safe: dropping the future leaves the process running and
/// the handle usable, so callers can race it against a cancellation signal
/// and then call `terminate`.
#[async_trait]
pub trait RunningProcess: Send {
    fn id(&self) -> Option<u32>;

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    /// Ask the process to stop. Does not wait for it to exit.
    fn terminate(&mut self) -> Result<(), ProcessError>;
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(
        &self,
        command: ProcessCommand,
        tag: ProcessTag,
    ) -> Result<Box<dyn RunningProcess>, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);

        // Own process group, so terminate() reaches grandchildren too
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        tracing::error!(
            "Failed to spawn '{}': {:?} (kind: {:?})",
            command.program,
            error,
            error.kind()
        );
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.display(),
                source: error,
            }
        }
    }

    /// Extract a stream from a child process, converting None to error
    fn extract_stream<T>(stream: Option<T>, stream_name: &str) -> Result<T, ProcessError> {
        stream.ok_or_else(|| ProcessError::InternalError {
            message: format!("Failed to capture {}", stream_name),
        })
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(
        &self,
        command: ProcessCommand,
        tag: ProcessTag,
    ) -> Result<Box<dyn RunningProcess>, ProcessError> {
        tracing::debug!("Executing subprocess: {}", command.display());
        if let Some(ref dir) = command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }

        let mut child = Self::configure_command(&command)
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        let stdout = Self::extract_stream(child.stdout.take(), "stdout")?;
        let stderr = Self::extract_stream(child.stderr.take(), "stderr")?;

        let processor: Arc<dyn StreamProcessor> = Arc::new(TaggedConsoleProcessor::new(tag));
        let forwarders = vec![
            tokio::spawn(forward_lines(
                stdout,
                StreamSource::Stdout,
                Arc::clone(&processor),
            )),
            tokio::spawn(forward_lines(stderr, StreamSource::Stderr, processor)),
        ];

        Ok(Box::new(TokioProcess {
            pid: child.id(),
            child,
            forwarders,
            program: command.program,
        }))
    }
}

/// Handle to a child spawned by [`TokioProcessRunner`].
pub struct TokioProcess {
    child: tokio::process::Child,
    pid: Option<u32>,
    forwarders: Vec<JoinHandle<()>>,
    program: String,
}

impl TokioProcess {
    #[cfg(unix)]
    fn signal_group(&mut self) -> Result<(), ProcessError> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            // Already reaped
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(source) => {
                tracing::debug!("killpg({}) failed, falling back to kill: {}", pid, source);
                self.child
                    .start_kill()
                    .map_err(|_| ProcessError::Signal { pid, source })
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self) -> Result<(), ProcessError> {
        self.child.start_kill().map_err(ProcessError::Io)
    }
}

#[async_trait]
impl RunningProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::Io)?;
        self.pid = None;

        // Drain the forwarders so the exit line follows the child's last output
        for handle in self.forwarders.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Output forwarder for '{}' panicked: {}", self.program, e);
            }
        }

        Ok(ExitStatus::from_std(status))
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        tracing::debug!("Terminating '{}' (pid {:?})", self.program, self.pid);
        self.signal_group()
    }
}

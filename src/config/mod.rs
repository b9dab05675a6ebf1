//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `PARALLELIT_*` environment variables, then command-line flags. The merged
//! [`PartialRunConfig`] is validated once into an immutable [`RunConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::slice::TailPolicy;

pub mod loader;

pub use loader::ConfigLoader;

pub const DEFAULT_LOG_INTERVAL: u64 = 1000;
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(2);
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_WORKER_SUBCOMMAND: &str = "work";

/// Fully resolved settings for one run. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub worker_count: usize,
    /// Worker command line, program first
    pub worker: Vec<String>,
    /// Gatherer command line; `None` skips gathering
    pub gatherer: Option<Vec<String>>,
    pub log_interval: u64,
    pub stagger: Duration,
    pub output_dir: PathBuf,
    /// Passed to the worker before any flag, e.g. `work`
    pub worker_subcommand: Option<String>,
    pub tail_policy: TailPolicy,
    /// Header for the aggregated file when no worker output and no input header exist
    pub default_header: Vec<String>,
}

impl RunConfig {
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.output_dir)
    }
}

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    pub worker_count: Option<usize>,
    pub worker: Option<String>,
    pub gatherer: Option<String>,
    pub log_interval: Option<u64>,
    #[serde(default, with = "humantime_serde")]
    pub stagger: Option<Duration>,
    pub output_dir: Option<PathBuf>,
    pub worker_subcommand: Option<String>,
    pub tail_policy: Option<TailPolicy>,
    pub default_header: Option<Vec<String>>,
}

impl PartialRunConfig {
    /// Overlay `higher` on top of `self`; fields set in `higher` win.
    pub fn merge(self, higher: PartialRunConfig) -> PartialRunConfig {
        PartialRunConfig {
            worker_count: higher.worker_count.or(self.worker_count),
            worker: higher.worker.or(self.worker),
            gatherer: higher.gatherer.or(self.gatherer),
            log_interval: higher.log_interval.or(self.log_interval),
            stagger: higher.stagger.or(self.stagger),
            output_dir: higher.output_dir.or(self.output_dir),
            worker_subcommand: higher.worker_subcommand.or(self.worker_subcommand),
            tail_policy: higher.tail_policy.or(self.tail_policy),
            default_header: higher.default_header.or(self.default_header),
        }
    }

    /// Read `PARALLELIT_*` variables through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Result<PartialRunConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut layer = PartialRunConfig::default();

        if let Some(value) = lookup("PARALLELIT_OUTPUT_DIR") {
            layer.output_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("PARALLELIT_STAGGER") {
            let stagger = humantime_serde::re::humantime::parse_duration(&value).map_err(|e| {
                Error::Config(format!("PARALLELIT_STAGGER '{value}' is not a duration: {e}"))
            })?;
            layer.stagger = Some(stagger);
        }
        if let Some(value) = lookup("PARALLELIT_LOG_INTERVAL") {
            let interval = value.parse().map_err(|e| {
                Error::Config(format!("PARALLELIT_LOG_INTERVAL '{value}' is not a number: {e}"))
            })?;
            layer.log_interval = Some(interval);
        }

        Ok(layer)
    }

    pub fn from_env() -> Result<PartialRunConfig> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> Result<RunConfig> {
        let worker_count = self
            .worker_count
            .ok_or_else(|| Error::Config("worker count is required (--count)".to_string()))?;
        if worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }

        let worker = self
            .worker
            .ok_or_else(|| Error::Config("worker executable is required (--worker)".to_string()))
            .and_then(|w| split_command("worker", &w))?;

        let gatherer = self
            .gatherer
            .map(|g| split_command("gatherer", &g))
            .transpose()?;

        let log_interval = self.log_interval.unwrap_or(DEFAULT_LOG_INTERVAL);
        if log_interval == 0 {
            return Err(Error::Config("log interval must be at least 1".to_string()));
        }

        let worker_subcommand = match self.worker_subcommand {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(s),
            None => Some(DEFAULT_WORKER_SUBCOMMAND.to_string()),
        };

        Ok(RunConfig {
            worker_count,
            worker,
            gatherer,
            log_interval,
            stagger: self.stagger.unwrap_or(DEFAULT_STAGGER),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            worker_subcommand,
            tail_policy: self.tail_policy.unwrap_or_default(),
            default_header: self
                .default_header
                .unwrap_or_else(|| vec!["id".to_string(), "value".to_string()]),
        })
    }
}

/// Split a command string the way a POSIX shell would.
fn split_command(role: &str, command: &str) -> Result<Vec<String>> {
    let parts = shell_words::split(command)
        .map_err(|e| Error::Config(format!("cannot parse {role} command '{command}': {e}")))?;
    if parts.is_empty() {
        return Err(Error::Config(format!("{role} command is empty")));
    }
    Ok(parts)
}

/// Where every file of a run lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: PathBuf,
}

impl OutputLayout {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raw input produced by the gatherer.
    pub fn input_path(&self) -> PathBuf {
        self.dir.join("STEP1.csv")
    }

    pub fn worker_output_path(&self, worker_number: usize) -> PathBuf {
        self.dir
            .join(format!("STEP2-WORKER-{worker_number}-OUT.csv"))
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.dir.join("OUT.csv")
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("run-report.json")
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))
    }

    /// Delete a worker output left by an earlier run. `Ok(false)` when there
    /// was none.
    pub fn remove_worker_output(&self, worker_number: usize) -> Result<bool> {
        let path = self.worker_output_path(worker_number);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

use std::path::PathBuf;
use thiserror::Error;

use crate::subprocess::{ExitStatus, ProcessError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: ProcessError,
    },

    #[error("{tag} exited with {status}")]
    ProcessExit { tag: String, status: ExitStatus },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Run interrupted")]
    Interrupted,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Error::Csv {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means a file was simply not there.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Error::Csv { source, .. } => matches!(
                source.kind(),
                csv::ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

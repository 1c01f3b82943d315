//! Error types for event sources and the supervisor.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from event source operations.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to initialize native watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Event channel closed unexpectedly")]
    ChannelClosed,

    #[error("Source task '{name}' ended abnormally: {reason}")]
    Task { name: String, reason: String },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl From<notify::Error> for SourceError {
    fn from(e: notify::Error) -> Self {
        SourceError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Errors from the ensure-running supervisor.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to read status file {path}: {source}")]
    ReadStatus {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write status file {path}: {source}")]
    WriteStatus {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Status file {path} is corrupted: {source}")]
    CorruptStatus {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot locate the current executable: {0}")]
    Executable(#[source] std::io::Error),

    #[error("Failed to open monitor log {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start monitor process: {0}")]
    Spawn(#[source] std::io::Error),
}

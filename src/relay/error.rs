//! Error types for the relay pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the local copier.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("Source {path} disappeared before it could be copied")]
    SourceMissing { path: PathBuf },

    /// The destination name is taken; nothing was written.
    #[error("Destination {path} already exists")]
    DestinationExists { path: PathBuf },

    #[error("Failed to copy {from} to {to}: {source}")]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the remote uploader.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read {path} for upload: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {reason}")]
    Client { reason: String },

    #[error("Upload transport error for {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Upload rejected with HTTP {status}: {message}")]
    Status { status: u16, message: String },
}

impl UploadError {
    /// HTTP status for rejected uploads, `None` for everything else.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from a single dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Operator must fix the configuration; not retried for this file version.
    #[error("Configuration error for {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    /// Every attempted action failed; the file stays eligible for retry.
    #[error("Relay failed for {}: {}", .path.display(), describe(.copy, .upload))]
    Failed {
        path: PathBuf,
        copy: Option<CopyError>,
        upload: Option<UploadError>,
    },
}

fn describe(copy: &Option<CopyError>, upload: &Option<UploadError>) -> String {
    match (copy, upload) {
        (Some(c), Some(u)) => format!("{c}; {u}"),
        (Some(c), None) => c.to_string(),
        (None, Some(u)) => u.to_string(),
        (None, None) => "no action attempted".to_string(),
    }
}

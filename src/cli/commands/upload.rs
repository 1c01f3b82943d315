//! Upload command: send one file outside the watch pipeline.
//!
//! Useful for checking endpoint and credentials. Nothing is recorded in the
//! ledger.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::config::Settings;
use crate::relay::{HttpUploader, Uploader};

pub async fn run_upload(settings: &Settings, file: &Path, tag: &str) -> Result<()> {
    let Some(upload) = settings.upload.as_ref() else {
        bail!("No [upload] section in the configuration");
    };
    if upload.endpoint.trim().is_empty() {
        bail!("upload.endpoint is not set");
    }
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }

    let uploader = HttpUploader::new(upload)?;
    let outcome = uploader
        .upload(file, tag)
        .await
        .with_context(|| format!("Upload of {} failed", file.display()))?;

    println!("Uploaded {} (HTTP {})", file.display(), outcome.status);
    if let Some(task_id) = &outcome.task_id {
        println!("Task id: {task_id}");
    }
    if let Some(status) = &outcome.remote_status {
        println!("Remote status: {status}");
    }
    Ok(())
}

//! File dispatcher: the per-file decide-and-act sequence.
//!
//! For one discovered file:
//! 1. stat it (vanished files are dropped silently)
//! 2. skip it if the exact (path, mtime) pair is in the ledger
//! 3. decide whether this is a reprocessing (path seen before)
//! 4. copy and/or upload according to the mode
//! 5. record (path, mtime) if at least one attempted action succeeded
//!
//! The dispatcher holds no per-file state besides the ledger and the last
//! version of each path reported as misconfigured, so it can be called
//! concurrently for distinct paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::copier::{Copier, CopyReport, LocalCopier};
use super::error::{CopyError, DispatchError, UploadError};
use super::uploader::{HttpUploader, UploadOutcome, Uploader};
use crate::config::{Settings, UploadMode};
use crate::ledger::Ledger;
use crate::namer::candidate_names;
use crate::rules::WatchRule;
use crate::utils::modification_time;

/// Whether the upload leg can run.
#[derive(Clone)]
enum UploadGate {
    Disabled,
    Ready(Arc<dyn Uploader>),
    Misconfigured(String),
}

/// What happened to one file.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The file could not be stat'ed (removed mid-scan).
    Vanished,
    /// This exact version is already in the ledger.
    AlreadyProcessed,
    /// This version was already reported as a configuration error.
    Held,
    /// At least one action ran; see the report for details.
    Relayed(RelayReport),
}

/// Details of a dispatch where at least one action succeeded.
#[derive(Debug)]
pub struct RelayReport {
    pub mod_time: i64,
    pub reprocessing: bool,
    pub copied: Option<CopyReport>,
    pub uploaded: Option<UploadOutcome>,
    pub copy_error: Option<CopyError>,
    pub upload_error: Option<UploadError>,
    /// False when the ledger write failed; the file will be retried.
    pub recorded: bool,
}

/// Orchestrates ledger, namer, copier and uploader for one file at a time.
pub struct Dispatcher {
    ledger: Arc<Ledger>,
    mode: UploadMode,
    destination: Option<PathBuf>,
    copier: Arc<dyn Copier>,
    upload: UploadGate,
    /// Last mtime of each path reported as a configuration error.
    held: Mutex<HashMap<PathBuf, i64>>,
}

impl Dispatcher {
    /// Create a builder for configuring the dispatcher.
    pub fn builder(ledger: Arc<Ledger>) -> DispatcherBuilder {
        DispatcherBuilder::new(ledger)
    }

    /// Wire the default copier and HTTP uploader from settings.
    ///
    /// Upload problems (missing endpoint or credentials) do not fail here;
    /// they surface as configuration errors when a file needs uploading.
    pub fn from_settings(settings: &Settings, ledger: Arc<Ledger>) -> Self {
        let mut builder = Dispatcher::builder(ledger).mode(settings.mode());
        if let Some(dir) = &settings.destination_directory {
            builder = builder.destination(dir.clone());
        }

        builder.upload = match settings.upload.as_ref().filter(|u| u.enabled) {
            None => UploadGate::Disabled,
            Some(upload) if upload.endpoint.trim().is_empty() => {
                UploadGate::Misconfigured("upload is enabled but no endpoint is set".to_string())
            }
            Some(upload) if upload.username.is_empty() => UploadGate::Misconfigured(
                "upload is enabled but no username is set".to_string(),
            ),
            Some(upload) => match HttpUploader::new(upload) {
                Ok(uploader) => UploadGate::Ready(Arc::new(uploader)),
                Err(e) => UploadGate::Misconfigured(e.to_string()),
            },
        };

        builder.build()
    }

    pub fn mode(&self) -> UploadMode {
        self.mode
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Whether uploads will be attempted.
    pub fn uploads_enabled(&self) -> bool {
        matches!(self.upload, UploadGate::Ready(_))
    }

    /// Reason the current configuration cannot relay files, if any.
    pub fn configuration_problem(&self) -> Option<String> {
        if self.mode.copies() && self.destination.is_none() {
            return Some(format!(
                "mode {} requires a destination directory",
                self.mode
            ));
        }
        match (&self.upload, self.mode) {
            (UploadGate::Misconfigured(reason), m) if m.uploads() => Some(reason.clone()),
            (UploadGate::Disabled, UploadMode::UploadOnly) => {
                Some("mode upload_only requires upload to be enabled".to_string())
            }
            _ => None,
        }
    }

    /// Run the full dispatch sequence for one file.
    pub async fn dispatch(
        &self,
        path: &Path,
        rule: &WatchRule,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(mod_time) = modification_time(path).await else {
            self.held.lock().remove(path);
            crate::debug_event!("dispatch", "vanished", "{}", path.display());
            return Ok(DispatchOutcome::Vanished);
        };

        if self.ledger.has(path, mod_time) {
            return Ok(DispatchOutcome::AlreadyProcessed);
        }

        if let Some(reason) = self.configuration_problem() {
            // A new mtime replaces the held version of the same path
            if self.held.lock().insert(path.to_path_buf(), mod_time) == Some(mod_time) {
                return Ok(DispatchOutcome::Held);
            }
            return Err(DispatchError::Config {
                path: path.to_path_buf(),
                reason,
            });
        }

        let reprocessing = self.ledger.was_seen_before(path);

        let (copied, copy_error) = if self.mode.copies() {
            match self.copy(path, rule, reprocessing).await {
                Ok(report) => (Some(report), None),
                Err(e) => (None, Some(e)),
            }
        } else {
            (None, None)
        };

        let (uploaded, upload_error) = match &self.upload {
            UploadGate::Ready(uploader) if self.mode.uploads() => {
                match uploader.upload(path, &rule.tag).await {
                    Ok(outcome) => (Some(outcome), None),
                    Err(e) => (None, Some(e)),
                }
            }
            _ => (None, None),
        };

        if let Some(report) = &copied {
            crate::log_event!(
                "copy",
                "copied",
                "{} -> {}",
                path.display(),
                report.destination.display()
            );
        }
        if let Some(outcome) = &uploaded {
            crate::log_event!(
                "upload",
                "accepted",
                "{} (HTTP {}, task {}, status {})",
                path.display(),
                outcome.status,
                outcome.task_id.as_deref().unwrap_or("-"),
                outcome.remote_status.as_deref().unwrap_or("-")
            );
        }

        if copied.is_none() && uploaded.is_none() {
            return Err(DispatchError::Failed {
                path: path.to_path_buf(),
                copy: copy_error,
                upload: upload_error,
            });
        }

        // Partial success still counts; report the half that failed
        if let Some(e) = &copy_error {
            tracing::warn!("[copy] {e}");
        }
        if let Some(e) = &upload_error {
            tracing::warn!("[upload] {} not uploaded: {e}", path.display());
        }

        let recorded = self.record(path, mod_time).await;

        Ok(DispatchOutcome::Relayed(RelayReport {
            mod_time,
            reprocessing,
            copied,
            uploaded,
            copy_error,
            upload_error,
            recorded,
        }))
    }

    /// Write the version to the ledger off the async workers.
    async fn record(&self, path: &Path, mod_time: i64) -> bool {
        let ledger = self.ledger.clone();
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || ledger.record(&owned, mod_time)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!("[ledger] {e}");
                false
            }
            Err(e) => {
                tracing::error!("[ledger] record task for {} failed: {e}", path.display());
                false
            }
        }
    }

    async fn copy(
        &self,
        path: &Path,
        rule: &WatchRule,
        reprocessing: bool,
    ) -> Result<CopyReport, CopyError> {
        // configuration_problem() guarantees a destination for copying modes
        let Some(destination) = self.destination.as_deref() else {
            return Err(CopyError::Io {
                from: path.to_path_buf(),
                to: PathBuf::new(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no destination directory",
                ),
            });
        };

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let now = chrono::Local::now();

        // Never overwrite an earlier copy; move on to the next free name
        let mut last_err = None;
        for name in candidate_names(&basename, &rule.tag, reprocessing, &now) {
            match self.copier.copy(path, destination, &name).await {
                Err(e @ CopyError::DestinationExists { .. }) => {
                    crate::debug_event!("copy", "name taken", "{name}");
                    last_err = Some(e);
                }
                result => return result,
            }
        }
        Err(last_err.unwrap_or_else(|| CopyError::DestinationExists {
            path: destination.to_path_buf(),
        }))
    }
}

/// Builder for constructing a [`Dispatcher`].
pub struct DispatcherBuilder {
    ledger: Arc<Ledger>,
    mode: UploadMode,
    destination: Option<PathBuf>,
    copier: Arc<dyn Copier>,
    uploader: Option<Arc<dyn Uploader>>,
    upload_enabled: bool,
    upload: UploadGate,
}

impl DispatcherBuilder {
    /// Create a new builder: copy_and_upload, no destination, uploads off.
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            mode: UploadMode::default(),
            destination: None,
            copier: Arc::new(LocalCopier),
            uploader: None,
            upload_enabled: true,
            upload: UploadGate::Disabled,
        }
    }

    /// Set the upload mode.
    pub fn mode(mut self, mode: UploadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the destination directory for local copies.
    pub fn destination(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = Some(dir.into());
        self
    }

    /// Replace the copier.
    pub fn copier(mut self, copier: Arc<dyn Copier>) -> Self {
        self.copier = copier;
        self
    }

    /// Set the uploader; uploads are enabled unless turned off.
    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Switch uploads on or off without removing the uploader.
    pub fn upload_enabled(mut self, enabled: bool) -> Self {
        self.upload_enabled = enabled;
        self
    }

    /// Build the dispatcher.
    pub fn build(self) -> Dispatcher {
        let upload = match (self.uploader, self.upload_enabled) {
            (Some(uploader), true) => UploadGate::Ready(uploader),
            (Some(_), false) => UploadGate::Disabled,
            (None, _) => self.upload,
        };

        Dispatcher {
            ledger: self.ledger,
            mode: self.mode,
            destination: self.destination,
            copier: self.copier,
            upload,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_held_versions_are_replaced_per_path() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path().join("in");
        std::fs::create_dir_all(&inbox).unwrap();
        let file = inbox.join("a.pdf");
        let rule = WatchRule::new(&inbox, ["pdf"], "docs");

        let ledger = Arc::new(Ledger::open(temp.path().join("processed.jsonl")).unwrap());
        // copy_only without a destination
        let dispatcher = Dispatcher::builder(ledger)
            .mode(UploadMode::CopyOnly)
            .build();

        for version in 0..5 {
            std::fs::write(&file, format!("v{version}")).unwrap();
            let mtime = filetime::FileTime::from_unix_time(1_700_000_000 + version, 0);
            filetime::set_file_mtime(&file, mtime).unwrap();
            assert!(matches!(
                dispatcher.dispatch(&file, &rule).await,
                Err(DispatchError::Config { .. })
            ));
        }
        assert_eq!(dispatcher.held.lock().len(), 1);

        std::fs::remove_file(&file).unwrap();
        assert!(matches!(
            dispatcher.dispatch(&file, &rule).await.unwrap(),
            DispatchOutcome::Vanished
        ));
        assert!(dispatcher.held.lock().is_empty());
    }
}

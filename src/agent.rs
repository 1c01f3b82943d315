//! Agent bootstrap: turn settings into a ready dispatcher and event source.
//!
//! Startup problems here are the only fatal class of error: with no active
//! watch rule, or a destination directory that cannot be created, there is
//! nothing useful the agent could do.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Settings, Strategy};
use crate::ledger::{Ledger, LedgerError};
use crate::relay::Dispatcher;
use crate::rules::ActiveRules;
use crate::source::{self, EventSource, ScanSummary, SourceError};

/// Fatal startup errors.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("No enabled watch directory could be activated")]
    NoActiveRules,

    #[error("Mode {mode} copies files but no destination_directory is configured")]
    MissingDestination { mode: String },

    #[error("Destination directory {path} is missing and cannot be created: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Everything a monitor or a one-shot scan needs.
pub struct Agent {
    settings: Arc<Settings>,
    rules: Arc<ActiveRules>,
    dispatcher: Arc<Dispatcher>,
}

impl Agent {
    /// Activate rules, prepare the destination, open the ledger.
    pub fn prepare(settings: Arc<Settings>) -> Result<Self, StartupError> {
        let rules = ActiveRules::activate(&settings.watch);
        if rules.is_empty() {
            return Err(StartupError::NoActiveRules);
        }

        let mode = settings.mode();
        if mode.copies() {
            let Some(dir) = settings.destination_directory.as_ref() else {
                return Err(StartupError::MissingDestination {
                    mode: mode.to_string(),
                });
            };
            std::fs::create_dir_all(dir).map_err(|source| StartupError::Destination {
                path: dir.clone(),
                source,
            })?;
        }

        let ledger = Arc::new(Ledger::open(&settings.monitor.ledger_path)?);
        let dispatcher = Dispatcher::from_settings(&settings, ledger);

        // Not fatal: reported per file at dispatch time
        if let Some(problem) = dispatcher.configuration_problem() {
            tracing::error!("[agent] {problem}; files will not be relayed until this is fixed");
        }

        crate::log_event!(
            "agent",
            "ready",
            "mode {}, uploads {}, {} rules, {} ledger entries",
            mode,
            if dispatcher.uploads_enabled() { "on" } else { "off" },
            rules.len(),
            dispatcher.ledger().len()
        );

        Ok(Self {
            settings,
            rules: Arc::new(rules),
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn rules(&self) -> &Arc<ActiveRules> {
        &self.rules
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Choose the event source for `strategy`.
    pub fn select_source(&self, strategy: Strategy) -> Result<Box<dyn EventSource>, StartupError> {
        Ok(source::select(
            strategy,
            self.rules.clone(),
            &self.settings.monitor,
        )?)
    }

    /// One polling pass over every active rule.
    pub async fn scan_once(&self) -> ScanSummary {
        source::poll_once(&self.rules, &self.dispatcher, self.settings.monitor.workers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{UploadConfig, UploadMode};
    use crate::rules::WatchRule;
    use tempfile::TempDir;

    fn settings_for(temp: &TempDir) -> Settings {
        let inbox = temp.path().join("in");
        std::fs::create_dir_all(&inbox).unwrap();

        let mut settings = Settings::default();
        settings.destination_directory = Some(temp.path().join("out"));
        settings.watch.push(WatchRule::new(inbox, ["pdf"], "x"));
        settings.monitor.ledger_path = temp.path().join("state").join("processed.jsonl");
        settings
    }

    #[test]
    fn test_prepare_creates_destination() {
        let temp = TempDir::new().unwrap();
        let agent = Agent::prepare(Arc::new(settings_for(&temp))).unwrap();

        assert!(temp.path().join("out").is_dir());
        assert_eq!(agent.rules().len(), 1);
        assert!(!agent.dispatcher().uploads_enabled());
    }

    #[test]
    fn test_no_active_rules_is_fatal() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings_for(&temp);
        settings.watch = vec![WatchRule::new(temp.path().join("missing"), ["pdf"], "x")];

        assert!(matches!(
            Agent::prepare(Arc::new(settings)),
            Err(StartupError::NoActiveRules)
        ));
    }

    #[test]
    fn test_copy_mode_without_destination_is_fatal() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings_for(&temp);
        settings.destination_directory = None;

        assert!(matches!(
            Agent::prepare(Arc::new(settings)),
            Err(StartupError::MissingDestination { .. })
        ));
    }

    #[test]
    fn test_uncreatable_destination_is_fatal() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let mut settings = settings_for(&temp);
        settings.destination_directory = Some(blocker.join("out"));

        assert!(matches!(
            Agent::prepare(Arc::new(settings)),
            Err(StartupError::Destination { .. })
        ));
    }

    #[test]
    fn test_upload_only_needs_no_destination() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings_for(&temp);
        settings.destination_directory = None;
        settings.upload = Some(UploadConfig {
            enabled: true,
            endpoint: "http://127.0.0.1:9/upload".to_string(),
            username: "agent".to_string(),
            mode: UploadMode::UploadOnly,
            ..UploadConfig::default()
        });

        let agent = Agent::prepare(Arc::new(settings)).unwrap();
        assert!(agent.dispatcher().uploads_enabled());
        assert!(agent.dispatcher().configuration_problem().is_none());
    }
}

//! Polling source: rescan every rule directory on a fixed interval.
//!
//! There is no change detection here beyond the ledger check inside the
//! dispatcher, so every pass re-examines every matching file. Cost is
//! O(files x rules) per tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::{EventSource, SourceError, SourceHandle, dispatch_and_log};
use crate::relay::{DispatchOutcome, Dispatcher};
use crate::rules::{ActiveRules, WatchRule};

/// Tally of one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Matching files handed to the dispatcher.
    pub examined: usize,
    /// Files copied and/or uploaded this pass.
    pub relayed: usize,
    /// Files already in the ledger, held, or vanished.
    pub skipped: usize,
    /// Files that failed or hit a configuration error.
    pub failed: usize,
}

impl ScanSummary {
    fn add(&mut self, outcome: &Result<DispatchOutcome, crate::relay::DispatchError>) {
        self.examined += 1;
        match outcome {
            Ok(DispatchOutcome::Relayed(_)) => self.relayed += 1,
            Ok(_) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Direct children of the rule's directory that the rule accepts, sorted.
pub fn candidates(rule: &WatchRule) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(&rule.directory) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("[polling] cannot list {}: {e}", rule.directory.display());
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && rule.matches(path))
        .collect();
    files.sort();
    files
}

/// Run one pass over every active rule.
///
/// With `workers > 1` files are dispatched concurrently, at most `workers`
/// at a time. Every file in a pass is a distinct path, and the ledger
/// serializes its own writes.
pub async fn poll_once(
    rules: &ActiveRules,
    dispatcher: &Arc<Dispatcher>,
    workers: usize,
) -> ScanSummary {
    let mut summary = ScanSummary::default();

    if workers <= 1 {
        for rule in rules.iter() {
            for path in candidates(rule) {
                let outcome = dispatch_and_log(dispatcher, &path, rule).await;
                summary.add(&outcome);
            }
        }
        return summary;
    }

    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    for rule in rules.iter() {
        for path in candidates(rule) {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let dispatcher = dispatcher.clone();
            let rule = rule.clone();
            tasks.spawn(async move {
                let outcome = dispatch_and_log(&dispatcher, &path, &rule).await;
                drop(permit);
                outcome
            });
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => summary.add(&outcome),
            Err(e) => {
                tracing::error!("[polling] dispatch task failed: {e}");
                summary.examined += 1;
                summary.failed += 1;
            }
        }
    }

    summary
}

/// Fixed-interval scanner.
pub struct PollingSource {
    rules: Arc<ActiveRules>,
    interval: Duration,
    workers: usize,
}

impl PollingSource {
    pub fn new(rules: Arc<ActiveRules>, interval_secs: u64, workers: usize) -> Self {
        Self {
            rules,
            interval: Duration::from_secs(interval_secs.max(1)),
            workers: workers.max(1),
        }
    }

    async fn run(self, dispatcher: Arc<Dispatcher>, token: CancellationToken) -> Result<(), SourceError> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        crate::log_event!(
            "polling",
            "started",
            "{} rules every {}s",
            self.rules.len(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A pass in progress is finished before cancellation is observed
            let summary = poll_once(&self.rules, &dispatcher, self.workers).await;
            if summary.relayed > 0 || summary.failed > 0 {
                crate::log_event!(
                    "polling",
                    "pass",
                    "{} relayed, {} failed, {} examined",
                    summary.relayed,
                    summary.failed,
                    summary.examined
                );
            }
        }

        crate::log_event!("polling", "stopped");
        Ok(())
    }
}

impl EventSource for PollingSource {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn start(self: Box<Self>, dispatcher: Arc<Dispatcher>) -> Result<SourceHandle, SourceError> {
        let token = CancellationToken::new();
        let task = tokio::spawn((*self).run(dispatcher, token.clone()));
        Ok(SourceHandle::new("polling", token, task))
    }
}

//! Native event source backed by the OS notification API.
//!
//! One `notify::RecommendedWatcher` watches every active rule directory
//! non-recursively. Create and modify events for matching files wait in a
//! [`SettleQueue`] together with the rule they matched, and are dispatched
//! once the file has been quiet for the debounce period. Remove events drop
//! any pending work for the path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

use super::polling::poll_once;
use super::{EventSource, SourceError, SourceHandle, dispatch_and_log};
use crate::relay::Dispatcher;
use crate::rules::{ActiveRules, WatchRule};

/// How often settled paths are checked for.
const SETTLE_TICK: Duration = Duration::from_millis(100);

/// A matched file still being written.
#[derive(Debug)]
struct PendingFile {
    rule: WatchRule,
    last_event: Instant,
    events: u32,
}

/// Matched files waiting for their event burst to end.
///
/// A file being written produces a burst of create/modify events; relaying
/// on the first one would copy a half-written file.
#[derive(Debug)]
pub struct SettleQueue {
    pending: HashMap<PathBuf, PendingFile>,
    quiet: Duration,
}

impl SettleQueue {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            quiet: Duration::from_millis(debounce_ms),
        }
    }

    /// Note an event for `path` under `rule`, restarting its quiet period.
    pub fn touch(&mut self, path: PathBuf, rule: &WatchRule) {
        let now = Instant::now();
        self.pending
            .entry(path)
            .and_modify(|file| {
                file.last_event = now;
                file.events += 1;
            })
            .or_insert_with(|| PendingFile {
                rule: rule.clone(),
                last_event: now,
                events: 1,
            });
    }

    /// Forget a path deleted or renamed away.
    pub fn forget(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Release every settled file with its rule, sorted by path.
    pub fn take_settled(&mut self) -> Vec<(PathBuf, WatchRule)> {
        let now = Instant::now();
        let mut settled = Vec::new();

        self.pending.retain(|path, file| {
            if now.duration_since(file.last_event) < self.quiet {
                return true;
            }
            crate::debug_event!("native", "settled", "{} after {} events", path.display(), file.events);
            settled.push((path.clone(), file.rule.clone()));
            false
        });

        settled.sort_by(|a, b| a.0.cmp(&b.0));
        settled
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// File events from the OS, settled per path.
pub struct NativeSource {
    rules: Arc<ActiveRules>,
    queue: SettleQueue,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    /// Kept alive for as long as the source runs.
    _watcher: notify::RecommendedWatcher,
}

impl NativeSource {
    /// Create a watcher and subscribe to every rule directory.
    ///
    /// Fails if the platform watcher cannot be created or any directory
    /// cannot be watched, which is the signal to fall back to polling.
    pub fn connect(rules: Arc<ActiveRules>, debounce_ms: u64) -> Result<Self, SourceError> {
        let (tx, rx) = mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        for dir in rules.directories() {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| SourceError::PathWatchFailed {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!("native", "watching", "{}", dir.display());
        }

        Ok(Self {
            rules,
            queue: SettleQueue::new(debounce_ms),
            event_rx: rx,
            _watcher: watcher,
        })
    }

    /// Route one OS event into the settle queue.
    fn handle_event(&mut self, event: Event) {
        for path in event.paths {
            match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) => match self.rules.route(&path) {
                    Some(rule) => self.queue.touch(path, rule),
                    None => {
                        crate::debug_event!("native", "unmatched", "{:?} {}", event.kind, path.display());
                    }
                },
                EventKind::Remove(_) => self.queue.forget(&path),
                _ => {}
            }
        }
    }

    async fn run(
        mut self,
        dispatcher: Arc<Dispatcher>,
        token: CancellationToken,
    ) -> Result<(), SourceError> {
        // Catch up on files that arrived while nothing was watching
        let summary = poll_once(&self.rules, &dispatcher, 1).await;
        crate::log_event!(
            "native",
            "started",
            "{} directories, initial sweep relayed {} of {}",
            self.rules.directories().len(),
            summary.relayed,
            summary.examined
        );

        loop {
            let settle = sleep(SETTLE_TICK);
            tokio::pin!(settle);

            tokio::select! {
                _ = token.cancelled() => break,

                received = self.event_rx.recv() => match received {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => tracing::error!("[native] file watch error: {e}"),
                    None => return Err(SourceError::ChannelClosed),
                },

                _ = &mut settle => {
                    for (path, rule) in self.queue.take_settled() {
                        // Deleted or renamed away after its last event
                        if !path.is_file() {
                            continue;
                        }
                        let _ = dispatch_and_log(&dispatcher, &path, &rule).await;
                    }
                }
            }
        }

        if !self.queue.is_empty() {
            crate::debug_event!("native", "dropping unsettled files", "{}", self.queue.len());
        }
        crate::log_event!("native", "stopped");
        Ok(())
    }
}

impl EventSource for NativeSource {
    fn name(&self) -> &'static str {
        "native"
    }

    fn start(self: Box<Self>, dispatcher: Arc<Dispatcher>) -> Result<SourceHandle, SourceError> {
        let token = CancellationToken::new();
        let task = tokio::spawn((*self).run(dispatcher, token.clone()));
        Ok(SourceHandle::new("native", token, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn rule(tag: &str) -> WatchRule {
        WatchRule::new("/in", ["pdf", "m4a"], tag)
    }

    #[test]
    fn test_file_released_with_its_rule_after_quiet_period() {
        let mut queue = SettleQueue::new(50);
        let path = PathBuf::from("/in/scan.pdf");
        queue.touch(path.clone(), &rule("docs"));

        assert!(queue.take_settled().is_empty());
        assert_eq!(queue.len(), 1);

        sleep(Duration::from_millis(60));

        let settled = queue.take_settled();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].0, path);
        assert_eq!(settled[0].1.tag, "docs");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_new_event_restarts_quiet_period() {
        let mut queue = SettleQueue::new(50);
        let path = PathBuf::from("/in/recording.m4a");
        queue.touch(path.clone(), &rule("audio"));
        sleep(Duration::from_millis(30));
        // Still being written
        queue.touch(path.clone(), &rule("audio"));
        sleep(Duration::from_millis(30));

        assert!(queue.take_settled().is_empty());

        sleep(Duration::from_millis(30));
        assert_eq!(queue.take_settled().len(), 1);
    }

    #[test]
    fn test_forgotten_file_is_never_released() {
        let mut queue = SettleQueue::new(0);
        let path = PathBuf::from("/in/tmp.pdf");
        queue.touch(path.clone(), &rule("docs"));
        queue.forget(&path);

        assert!(queue.take_settled().is_empty());
    }

    #[test]
    fn test_settled_files_come_out_sorted() {
        let mut queue = SettleQueue::new(0);
        queue.touch(PathBuf::from("/in/b.pdf"), &rule("docs"));
        queue.touch(PathBuf::from("/in/a.pdf"), &rule("docs"));

        let paths: Vec<PathBuf> = queue.take_settled().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec![PathBuf::from("/in/a.pdf"), PathBuf::from("/in/b.pdf")]);
    }
}

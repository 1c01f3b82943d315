//! Event sources feeding the dispatcher.
//!
//! Three interchangeable strategies implement [`EventSource`]:
//!
//! ```text
//! NativeSource      notify::RecommendedWatcher -> SettleQueue -> Dispatcher
//! PollingSource     interval -> scan rule dirs -> Dispatcher
//! SupervisorSource  interval -> ensure monitor process alive (no dispatch)
//! ```
//!
//! A source is started once and returns a [`SourceHandle`]; stopping the
//! handle cancels the source and waits for in-flight work to finish.

mod error;
mod native;
mod polling;
mod supervisor;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{MonitorConfig, Strategy};
use crate::relay::{DispatchError, DispatchOutcome, Dispatcher};
use crate::rules::{ActiveRules, WatchRule};

pub use error::{SourceError, SupervisorError};
pub use native::{NativeSource, SettleQueue};
pub use polling::{PollingSource, ScanSummary, candidates, poll_once};
pub use supervisor::{StatusSnapshot, Supervisor, SupervisorSource, SupervisorState};

/// A producer of file events for the dispatcher.
pub trait EventSource: Send {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Begin producing events on the current tokio runtime.
    fn start(self: Box<Self>, dispatcher: Arc<Dispatcher>) -> Result<SourceHandle, SourceError>;
}

/// A running event source.
pub struct SourceHandle {
    name: &'static str,
    token: CancellationToken,
    task: JoinHandle<Result<(), SourceError>>,
}

impl SourceHandle {
    pub(crate) fn new(
        name: &'static str,
        token: CancellationToken,
        task: JoinHandle<Result<(), SourceError>>,
    ) -> Self {
        Self { name, token, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop accepting events and wait for the source to wind down.
    pub async fn stop(self) -> Result<(), SourceError> {
        self.token.cancel();
        Self::join(self.name, self.task).await
    }

    /// Run until `shutdown` resolves or the source ends on its own.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), SourceError> {
        let SourceHandle {
            name,
            token,
            mut task,
        } = self;

        tokio::select! {
            _ = shutdown => {
                token.cancel();
                Self::join(name, task).await
            }
            res = &mut task => Self::flatten(name, res),
        }
    }

    async fn join(
        name: &'static str,
        task: JoinHandle<Result<(), SourceError>>,
    ) -> Result<(), SourceError> {
        Self::flatten(name, task.await)
    }

    fn flatten(
        name: &'static str,
        res: Result<Result<(), SourceError>, tokio::task::JoinError>,
    ) -> Result<(), SourceError> {
        match res {
            Ok(inner) => inner,
            Err(e) => Err(SourceError::Task {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Pick the file event source for `strategy`.
///
/// `Auto` tries the native notification API and falls back to polling when
/// it cannot watch every rule directory.
pub fn select(
    strategy: Strategy,
    rules: Arc<ActiveRules>,
    monitor: &MonitorConfig,
) -> Result<Box<dyn EventSource>, SourceError> {
    let polling = || {
        Box::new(PollingSource::new(
            rules.clone(),
            monitor.poll_interval_secs,
            monitor.workers,
        )) as Box<dyn EventSource>
    };

    match strategy {
        Strategy::Polling => Ok(polling()),
        Strategy::Native => Ok(Box::new(NativeSource::connect(
            rules.clone(),
            monitor.debounce_ms,
        )?)),
        Strategy::Auto => match NativeSource::connect(rules.clone(), monitor.debounce_ms) {
            Ok(native) => Ok(Box::new(native)),
            Err(e) => {
                tracing::warn!("[monitor] native events unavailable ({e}), falling back to polling");
                Ok(polling())
            }
        },
    }
}

/// Dispatch one path and log the result. Returns the outcome for tallying.
pub(crate) async fn dispatch_and_log(
    dispatcher: &Dispatcher,
    path: &Path,
    rule: &WatchRule,
) -> Result<DispatchOutcome, DispatchError> {
    let result = dispatcher.dispatch(path, rule).await;
    match &result {
        Ok(DispatchOutcome::Relayed(report)) => {
            crate::debug_event!(
                rule.tag,
                if report.reprocessing { "reprocessed" } else { "relayed" },
                "{} (mtime {})",
                path.display(),
                report.mod_time
            );
        }
        Ok(_) => {}
        Err(e @ DispatchError::Config { .. }) => tracing::error!("[dispatch] {e}"),
        Err(e) => tracing::warn!("[dispatch] {e}"),
    }
    result
}

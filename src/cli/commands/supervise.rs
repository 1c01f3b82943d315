//! Supervise command: make sure a monitor process is running.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Settings;
use crate::source::{Supervisor, SupervisorSource};
use crate::utils::shutdown_signal;

/// Check once, or keep checking every `every` seconds until interrupted.
pub async fn run_supervise(
    settings: &Settings,
    config_path: Option<&Path>,
    every: Option<u64>,
) -> Result<()> {
    let supervisor = Arc::new(Supervisor::new(settings.supervisor.clone(), config_path)?);

    match every {
        None => {
            let checker = supervisor.clone();
            let snapshot = tokio::task::spawn_blocking(move || checker.ensure_running()).await??;
            println!(
                "Monitor {} (session {}, pid {})",
                snapshot.state,
                snapshot.session,
                snapshot
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            Ok(())
        }
        Some(secs) => {
            let handle = SupervisorSource::new(supervisor, secs).spawn();
            handle.run_until(shutdown_signal()).await?;
            Ok(())
        }
    }
}

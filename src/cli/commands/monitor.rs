//! Monitor command: relay files until interrupted.

use std::sync::Arc;

use anyhow::Result;

use crate::agent::Agent;
use crate::config::{Settings, Strategy};
use crate::utils::shutdown_signal;

/// Run the monitor with the configured (or overridden) event source.
///
/// `session` only marks this process's command line for the supervisor.
pub async fn run_monitor(
    settings: Arc<Settings>,
    strategy: Option<Strategy>,
    session: Option<&str>,
) -> Result<()> {
    let strategy = strategy.unwrap_or(settings.monitor.strategy);
    let agent = Agent::prepare(settings)?;

    let source = agent.select_source(strategy)?;
    crate::log_event!(
        "monitor",
        "starting",
        "{} source{}",
        source.name(),
        session.map(|s| format!(", session {s}")).unwrap_or_default()
    );

    let handle = source.start(agent.dispatcher().clone())?;
    handle.run_until(shutdown_signal()).await?;

    crate::log_event!("monitor", "stopped");
    Ok(())
}

//! Scan command: one polling pass, then exit.

use std::sync::Arc;

use anyhow::{Result, bail};

use crate::agent::Agent;
use crate::config::Settings;

pub async fn run_scan(settings: Arc<Settings>) -> Result<()> {
    let agent = Agent::prepare(settings)?;
    let summary = agent.scan_once().await;

    println!(
        "Examined {} files: {} relayed, {} skipped, {} failed",
        summary.examined, summary.relayed, summary.skipped, summary.failed
    );

    if summary.failed > 0 {
        bail!("{} files could not be relayed", summary.failed);
    }
    Ok(())
}

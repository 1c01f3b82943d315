//! Status command: supervisor state and ledger size.

use anyhow::Result;

use crate::config::Settings;
use crate::ledger::Ledger;
use crate::source::Supervisor;

pub fn run_status(settings: &Settings) -> Result<()> {
    let supervisor = Supervisor::new(settings.supervisor.clone(), None)?;

    println!("Monitor Status:");
    println!("{}", "=".repeat(50));
    match supervisor.load_status()? {
        Some(status) => {
            let alive = status.pid.is_some_and(|pid| supervisor.is_alive(pid));
            println!("State:       {}", status.state);
            println!("Session:     {}", status.session);
            match status.pid {
                Some(pid) if alive => println!("Process:     {pid} (alive)"),
                Some(pid) => println!("Process:     {pid} (not running)"),
                None => println!("Process:     -"),
            }
            if let Some(started) = status.started_at {
                println!("Started:     {}", started.to_rfc3339());
            }
            println!("Checked:     {}", status.checked_at.to_rfc3339());
            println!("Restarts:    {}", status.restarts);
            if let Some(error) = &status.last_error {
                println!("Last error:  {error}");
            }
        }
        None => println!(
            "No status recorded at {} (run `filerelay init` or `filerelay supervise`)",
            supervisor.status_file().display()
        ),
    }

    let ledger = Ledger::open(&settings.monitor.ledger_path)?;
    println!();
    println!(
        "Processed:   {} files ({})",
        ledger.len(),
        ledger.file().display()
    );
    println!("Watch rules: {}", settings.watch.iter().filter(|r| r.enabled).count());
    Ok(())
}

//! Init and Config commands.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::config::Settings;
use crate::source::Supervisor;

/// Run init command - create configuration file and an `installed` status.
pub fn run_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_config_path);

    if path.exists() && !force {
        eprintln!("Configuration file already exists at: {}", path.display());
        bail!("Use --force to overwrite");
    }

    let path = Settings::init_config_file(&path, force)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created configuration file at: {}", path.display());
    println!("Edit the [[watch]] entries to choose folders, extensions and tags.");

    let settings = Settings::load(Some(&path)).map_err(|e| anyhow::anyhow!("{e}"))?;
    let supervisor = Supervisor::new(settings.supervisor.clone(), Some(&path))?;
    // A running monitor keeps its status
    if supervisor.load_status().ok().flatten().is_none() {
        supervisor.mark_installed()?;
        println!(
            "Supervisor status: installed ({})",
            supervisor.status_file().display()
        );
    }

    Ok(())
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("{toml_str}");
    Ok(())
}

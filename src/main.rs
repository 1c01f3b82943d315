//! filerelay: watch folders and relay new files.

use std::sync::Arc;

use clap::Parser;
use filerelay::Settings;
use filerelay::cli::commands;
use filerelay::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        // Init replaces a broken file anyway
        Err(_) if matches!(cli.command, Commands::Init { force: true }) => Settings::default(),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    filerelay::logging::init_with_config(&settings.logging);

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init { force } => commands::init::run_init(config_path, force),
        Commands::Config => commands::init::run_config(&settings),
        Commands::Monitor { strategy, session } => {
            commands::monitor::run_monitor(Arc::new(settings), strategy, session.as_deref()).await
        }
        Commands::Scan => commands::scan::run_scan(Arc::new(settings)).await,
        Commands::Supervise { every } => {
            commands::supervise::run_supervise(&settings, config_path, every).await
        }
        Commands::Status => commands::status::run_status(&settings),
        Commands::Upload { file, tag } => {
            commands::upload::run_upload(&settings, &file, &tag).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

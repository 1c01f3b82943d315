//! CLI argument parsing using clap.
//!
//! Contains the Cli struct and the Commands enum.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::Strategy;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch folders and relay new files
#[derive(Parser, Debug)]
#[command(
    name = "filerelay",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch folders and relay new files to an organized folder or a remote API",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ filerelay init                 # Write a starter settings.toml\n  $ filerelay scan                 # Relay everything pending once\n  $ filerelay monitor              # Run until interrupted\n  $ filerelay supervise            # Ensure a monitor is running (for cron)"
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter configuration file
    #[command(about = "Create settings.toml with an example watch rule")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display effective settings (password masked)")]
    Config,

    /// Watch configured directories until interrupted
    #[command(
        about = "Relay files continuously",
        after_help = "Examples:\n  filerelay monitor\n  filerelay monitor --strategy polling\n\nStrategies:\n  auto: native events, falling back to polling\n  native: OS notifications only\n  polling: rescan every poll_interval_secs"
    )]
    Monitor {
        /// Event source (overrides monitor.strategy)
        #[arg(long, value_name = "auto|native|polling")]
        strategy: Option<Strategy>,

        /// Session marker used by the supervisor to find this process
        #[arg(long, value_name = "NAME")]
        session: Option<String>,
    },

    /// Relay everything pending once, then exit
    #[command(about = "Run a single polling pass")]
    Scan,

    /// Ensure a monitor process is running
    #[command(
        about = "Start the monitor if it is not running",
        after_help = "Run from cron or a timer:\n  * * * * * filerelay supervise\n\nOr keep checking in the foreground:\n  filerelay supervise --every 60"
    )]
    Supervise {
        /// Keep checking every SECS seconds instead of checking once
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },

    /// Show supervisor and ledger status
    #[command(about = "Show monitor state and processed file count")]
    Status,

    /// Upload one file with the configured uploader
    #[command(about = "Send a single file to the upload endpoint")]
    Upload {
        /// File to send
        file: PathBuf,

        /// Tag sent with the file
        #[arg(long, default_value = "manual")]
        tag: String,
    },
}

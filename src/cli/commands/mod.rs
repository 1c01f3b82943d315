//! Command implementations for the CLI.
//!
//! Each command is implemented in its own module.

pub mod init;
pub mod monitor;
pub mod scan;
pub mod status;
pub mod supervise;
pub mod upload;

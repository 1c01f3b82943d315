pub mod agent;
pub mod cli;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod namer;
pub mod relay;
pub mod rules;
pub mod source;
pub mod utils;

pub use agent::{Agent, StartupError};
pub use config::{Settings, Strategy, UploadConfig, UploadMode};
pub use ledger::{Ledger, LedgerEntry, LedgerError};
pub use namer::destination_name;
pub use relay::{
    Copier, DispatchError, DispatchOutcome, Dispatcher, HttpUploader, LocalCopier, Uploader,
};
pub use rules::{ActiveRules, WatchRule};
pub use source::{EventSource, ScanSummary, SourceError, SourceHandle};

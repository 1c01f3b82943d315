//! The file relay pipeline.
//!
//! # Architecture
//!
//! ```text
//! EventSource --path--> Dispatcher --+--> Ledger (has / was_seen_before / record)
//!                                    +--> namer::candidate_names
//!                                    +--> Copier   (LocalCopier)
//!                                    +--> Uploader (HttpUploader)
//! ```

mod copier;
mod dispatcher;
mod error;
mod uploader;

pub use copier::{Copier, CopyReport, LocalCopier};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherBuilder, RelayReport};
pub use error::{CopyError, DispatchError, UploadError};
pub use uploader::{HttpUploader, UploadOutcome, Uploader};

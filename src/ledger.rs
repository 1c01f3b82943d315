//! Persistent record of which (path, modification time) pairs were relayed.
//!
//! The ledger is a line-oriented log, one JSON object per line:
//!
//! ```text
//! {"path":"/home/me/Downloads/a.pdf","mod_time":1700000000}
//! ```
//!
//! Lines in the older `path:mtime` form are accepted when loading. At most
//! one line per path is active: recording a path removes its previous lines
//! before appending the new one.
//!
//! All access goes through one mutex, so a single `Arc<Ledger>` can be shared
//! by concurrent dispatches without corrupting the one-entry-per-path rule.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One relayed file version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub path: PathBuf,
    pub mod_time: i64,
}

impl LedgerEntry {
    /// Parse one ledger line, JSON first, then the legacy `path:mtime` form.
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        if line.trim_start().starts_with('{') {
            return serde_json::from_str(line).ok();
        }

        // Split on the last colon: paths may contain colons, mtimes never do
        let (path, mod_time) = line.rsplit_once(':')?;
        if path.is_empty() {
            return None;
        }
        Some(Self {
            path: PathBuf::from(path),
            mod_time: mod_time.trim().parse().ok()?,
        })
    }
}

/// Errors from ledger persistence.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode ledger entry for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable (path, mtime) log with an in-memory index.
#[derive(Debug)]
pub struct Ledger {
    /// Backing file.
    file: PathBuf,
    /// Active entry per path: path -> mtime.
    active: Mutex<HashMap<PathBuf, i64>>,
}

impl Ledger {
    /// Open the ledger at `file`, creating its parent directory if needed.
    ///
    /// A missing file is an empty ledger. Unparseable lines are skipped with
    /// a warning; when a path appears more than once the last line wins.
    pub fn open(file: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let file = file.into();

        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Write {
                path: file.clone(),
                source,
            })?;
        }

        let mut active = HashMap::new();
        let mut skipped = 0usize;

        match File::open(&file) {
            Ok(handle) => {
                for line in BufReader::new(handle).lines() {
                    let line = line.map_err(|source| LedgerError::Read {
                        path: file.clone(),
                        source,
                    })?;
                    match LedgerEntry::parse(&line) {
                        Some(entry) => {
                            active.insert(entry.path, entry.mod_time);
                        }
                        None if line.trim().is_empty() => {}
                        None => skipped += 1,
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(LedgerError::Read {
                    path: file.clone(),
                    source,
                });
            }
        }

        if skipped > 0 {
            tracing::warn!(
                "[ledger] skipped {skipped} unreadable lines in {}",
                file.display()
            );
        }
        crate::debug_event!(
            "ledger",
            "loaded",
            "{} entries from {}",
            active.len(),
            file.display()
        );

        Ok(Self {
            file,
            active: Mutex::new(active),
        })
    }

    /// True iff exactly this (path, mtime) pair was recorded.
    pub fn has(&self, path: &Path, mod_time: i64) -> bool {
        self.active.lock().get(path) == Some(&mod_time)
    }

    /// True iff any version of `path` was recorded.
    pub fn was_seen_before(&self, path: &Path) -> bool {
        self.active.lock().contains_key(path)
    }

    /// Replace any entry for `path` with `(path, mod_time)`.
    ///
    /// The file is durable when this returns. On error the in-memory view is
    /// left unchanged, so the file stays eligible for another attempt.
    pub fn record(&self, path: &Path, mod_time: i64) -> Result<(), LedgerError> {
        let mut active = self.active.lock();

        let entry = LedgerEntry {
            path: path.to_path_buf(),
            mod_time,
        };
        let mut line = serde_json::to_string(&entry).map_err(|source| LedgerError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        line.push('\n');

        if active.contains_key(path) {
            self.rewrite_without(path, &line)?;
        } else {
            self.append(&line)?;
        }

        active.insert(entry.path, mod_time);
        Ok(())
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }

    /// Snapshot of all active entries, sorted by path.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<_> = self
            .active
            .lock()
            .iter()
            .map(|(path, mod_time)| LedgerEntry {
                path: path.clone(),
                mod_time: *mod_time,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Backing file location.
    pub fn file(&self) -> &Path {
        &self.file
    }

    fn write_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Write {
            path: self.file.clone(),
            source,
        }
    }

    fn append(&self, line: &str) -> Result<(), LedgerError> {
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)
            .map_err(|e| self.write_error(e))?;
        handle
            .write_all(line.as_bytes())
            .and_then(|_| handle.sync_data())
            .map_err(|e| self.write_error(e))
    }

    /// Drop every line belonging to `path`, then append `line`.
    ///
    /// Written to a temp file next to the ledger and renamed into place.
    fn rewrite_without(&self, path: &Path, line: &str) -> Result<(), LedgerError> {
        let existing = match File::open(&self.file) {
            Ok(handle) => BufReader::new(handle)
                .lines()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| LedgerError::Read {
                    path: self.file.clone(),
                    source,
                })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.file.clone(),
                    source,
                });
            }
        };

        let dir = match self.file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.write_error(e))?;

        for kept in existing.iter().filter(|l| {
            LedgerEntry::parse(l).is_none_or(|entry| entry.path != path) && !l.trim().is_empty()
        }) {
            writeln!(temp, "{kept}").map_err(|e| self.write_error(e))?;
        }
        temp.write_all(line.as_bytes())
            .and_then(|_| temp.as_file().sync_data())
            .map_err(|e| self.write_error(e))?;

        temp.persist(&self.file)
            .map_err(|e| self.write_error(e.error))?;
        Ok(())
    }
}

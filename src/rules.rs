//! Watch rules: which directories are monitored and which files qualify.
//!
//! A rule covers the direct children of one directory. A file qualifies when
//! its parent is the rule's directory and its extension (the text after the
//! last dot, compared case-sensitively) is in the rule's extension set.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::expand_tilde;

/// One monitored source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRule {
    /// Directory whose direct children are relayed
    pub directory: PathBuf,

    /// Accepted extensions without the leading dot
    #[serde(default)]
    pub extensions: BTreeSet<String>,

    /// Short label embedded in output filenames
    pub tag: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl WatchRule {
    /// Create an enabled rule.
    pub fn new<I, S>(directory: impl Into<PathBuf>, extensions: I, tag: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rule = Self {
            directory: directory.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
            tag: tag.into(),
            enabled: true,
        };
        rule.normalize();
        rule
    }

    /// Expand `~` in the directory and strip leading dots from extensions.
    ///
    /// Extension case is preserved: matching is case-sensitive.
    pub fn normalize(&mut self) {
        self.directory = expand_tilde(&self.directory);
        self.extensions = std::mem::take(&mut self.extensions)
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .collect();
    }

    /// Whether the file's extension is in this rule's set.
    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(ext))
    }

    /// Whether `path` is a direct child of this rule's directory with an
    /// accepted extension.
    pub fn matches(&self, path: &Path) -> bool {
        path.parent() == Some(self.directory.as_path()) && self.accepts_extension(path)
    }
}

/// The rules that passed activation, with canonical directories.
#[derive(Debug, Clone, Default)]
pub struct ActiveRules {
    rules: Vec<WatchRule>,
}

impl ActiveRules {
    /// Activate the enabled rules whose directory exists and is readable.
    ///
    /// Rules that fail activation are skipped with a warning. Directories are
    /// canonicalized so event paths reported by the OS line up with them.
    pub fn activate(rules: &[WatchRule]) -> Self {
        let mut active = Vec::new();

        for rule in rules {
            if !rule.enabled {
                crate::debug_event!("rules", "disabled", "[{}] {}", rule.tag, rule.directory.display());
                continue;
            }

            let directory = match std::fs::canonicalize(&rule.directory) {
                Ok(dir) => dir,
                Err(e) => {
                    tracing::warn!(
                        "[rules] skipping [{}] {}: {e}",
                        rule.tag,
                        rule.directory.display()
                    );
                    continue;
                }
            };

            if let Err(e) = std::fs::read_dir(&directory) {
                tracing::warn!(
                    "[rules] skipping [{}] {}: not readable: {e}",
                    rule.tag,
                    directory.display()
                );
                continue;
            }

            if rule.extensions.is_empty() {
                tracing::warn!(
                    "[rules] [{}] {} has no extensions, nothing will match",
                    rule.tag,
                    directory.display()
                );
            }

            crate::log_event!(
                "rules",
                "active",
                "[{}] {} ({})",
                rule.tag,
                directory.display(),
                rule.extensions.iter().cloned().collect::<Vec<_>>().join(", ")
            );

            active.push(WatchRule {
                directory,
                ..rule.clone()
            });
        }

        Self { rules: active }
    }

    /// First rule that accepts `path`, if any.
    pub fn route(&self, path: &Path) -> Option<&WatchRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Distinct directories to watch.
    pub fn directories(&self) -> BTreeSet<&Path> {
        self.rules.iter().map(|r| r.directory.as_path()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

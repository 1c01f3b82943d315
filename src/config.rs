//! Configuration module for the relay agent.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides (applied by the command layer)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `FILERELAY_` and use double
//! underscores to separate nested levels:
//! - `FILERELAY_UPLOAD__PASSWORD=secret` sets `upload.password`
//! - `FILERELAY_MONITOR__POLL_INTERVAL_SECS=10` sets `monitor.poll_interval_secs`
//! - `FILERELAY_DESTINATION_DIRECTORY=/srv/inbox` sets `destination_directory`
//!
//! Paths beginning with `~` are expanded after all layers are merged.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::rules::WatchRule;
use crate::utils::expand_tilde;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Flat folder receiving local copies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_directory: Option<PathBuf>,

    /// Remote processing endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadConfig>,

    /// Monitored source directories, in priority order
    #[serde(default)]
    pub watch: Vec<WatchRule>,

    /// Event source settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Ensure-running supervisor settings
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do with each qualifying file.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    CopyOnly,
    UploadOnly,
    #[default]
    CopyAndUpload,
}

impl UploadMode {
    /// Whether this mode writes a local copy.
    pub fn copies(self) -> bool {
        matches!(self, UploadMode::CopyOnly | UploadMode::CopyAndUpload)
    }

    /// Whether this mode may send the file to the remote endpoint.
    pub fn uploads(self) -> bool {
        matches!(self, UploadMode::UploadOnly | UploadMode::CopyAndUpload)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadMode::CopyOnly => "copy_only",
            UploadMode::UploadOnly => "upload_only",
            UploadMode::CopyAndUpload => "copy_and_upload",
        }
    }
}

impl std::fmt::Display for UploadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    /// Whether uploads are attempted at all
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Full URL receiving the multipart POST
    #[serde(default)]
    pub endpoint: String,

    /// Basic Auth user
    #[serde(default)]
    pub username: String,

    /// Basic Auth password
    #[serde(default)]
    pub password: String,

    /// Copy, upload, or both
    #[serde(default)]
    pub mode: UploadMode,

    /// Connect timeout; the whole request may take twice as long
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Name of the multipart field carrying the file body
    #[serde(default = "default_file_field")]
    pub file_field: String,

    /// Name of the multipart field carrying the tag
    #[serde(default = "default_tag_field")]
    pub tag_field: String,

    /// Extra fixed text fields sent with every upload (language hint, priority, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// How file events are discovered.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Probe the native notification API, fall back to polling.
    #[default]
    Auto,
    Native,
    Polling,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Strategy::Auto),
            "native" => Ok(Strategy::Native),
            "polling" | "poll" => Ok(Strategy::Polling),
            other => Err(format!(
                "unknown strategy '{other}' (expected auto, native or polling)"
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Event source selection
    #[serde(default)]
    pub strategy: Strategy,

    /// Seconds between polling passes
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How long a file must stay quiet before a native event is relayed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Concurrent dispatches within one polling pass
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Location of the processed-files ledger
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SupervisorConfig {
    /// Marker passed to the monitor process and used to find it again
    #[serde(default = "default_session")]
    pub session: String,

    /// JSON status snapshot written on every check
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,

    /// Output of the spawned monitor process
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Seconds between checks when running as a loop
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `filerelay::source = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_false() -> bool { false }
fn default_timeout_seconds() -> u64 { 30 }
fn default_file_field() -> String { "file".to_string() }
fn default_tag_field() -> String { "tag".to_string() }
fn default_poll_interval_secs() -> u64 { 5 }
fn default_debounce_ms() -> u64 { 500 }
fn default_workers() -> usize { 1 }
fn default_session() -> String { "filerelay-monitor".to_string() }
fn default_check_interval_secs() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filerelay")
}

fn default_ledger_path() -> PathBuf { data_dir().join("processed.jsonl") }
fn default_status_file() -> PathBuf { data_dir().join("status.json") }
fn default_log_file() -> PathBuf { data_dir().join("monitor.log") }

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            destination_directory: None,
            upload: None,
            watch: Vec::new(),
            monitor: MonitorConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            mode: UploadMode::default(),
            timeout_seconds: default_timeout_seconds(),
            file_field: default_file_field(),
            tag_field: default_tag_field(),
            fields: BTreeMap::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            poll_interval_secs: default_poll_interval_secs(),
            debounce_ms: default_debounce_ms(),
            workers: default_workers(),
            ledger_path: default_ledger_path(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            session: default_session(),
            status_file: default_status_file(),
            log_file: default_log_file(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Default location of `settings.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("filerelay")
            .join("settings.toml")
    }

    /// Load configuration from all sources.
    ///
    /// Uses `path` when given, otherwise [`Settings::default_config_path`].
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with FILERELAY_ prefix
            // Use double underscore (__) to separate nested levels
            // Single underscore (_) remains as is within field names
            .merge(Env::prefixed("FILERELAY_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".") // Double underscore becomes dot
                    .into()
            }))
            .extract()
            .map_err(Box::new)
            .map(Settings::resolved)
    }

    /// Expand `~` in every configured path and normalize watch rules.
    pub fn resolved(mut self) -> Self {
        self.destination_directory = self.destination_directory.map(|p| expand_tilde(&p));
        for rule in &mut self.watch {
            rule.normalize();
        }
        self.monitor.ledger_path = expand_tilde(&self.monitor.ledger_path);
        self.supervisor.status_file = expand_tilde(&self.supervisor.status_file);
        self.supervisor.log_file = expand_tilde(&self.supervisor.log_file);
        self
    }

    /// The effective upload mode (no upload section means copy, upload disabled).
    pub fn mode(&self) -> UploadMode {
        self.upload.as_ref().map(|u| u.mode).unwrap_or_default()
    }

    /// Whether uploads are switched on.
    pub fn upload_enabled(&self) -> bool {
        self.upload.as_ref().is_some_and(|u| u.enabled)
    }

    /// Copy of the settings safe for display (password masked).
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(upload) = copy.upload.as_mut() {
            if !upload.password.is_empty() {
                upload.password = "********".to_string();
            }
        }
        copy
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a starter settings file with one example watch rule.
    pub fn init_config_file(
        path: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        if !force && path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut settings = Settings::default();
        settings.destination_directory = Some(PathBuf::from("~/Organized"));
        settings.upload = Some(UploadConfig {
            mode: UploadMode::CopyOnly,
            ..UploadConfig::default()
        });
        settings.watch.push(WatchRule::new(
            PathBuf::from("~/Downloads"),
            ["pdf", "jpg", "png"],
            "dl",
        ));

        settings.save(path)?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert!(settings.watch.is_empty());
        assert!(settings.upload.is_none());
        assert_eq!(settings.mode(), UploadMode::CopyAndUpload);
        assert!(!settings.upload_enabled());
        assert_eq!(settings.monitor.poll_interval_secs, 5);
        assert_eq!(settings.monitor.workers, 1);
        assert_eq!(settings.supervisor.session, "filerelay-monitor");
        assert!(settings.monitor.ledger_path.ends_with("filerelay/processed.jsonl"));
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
destination_directory = "/srv/organized"

[upload]
enabled = true
endpoint = "https://api.example.com/v1/files"
username = "agent"
password = "secret"
mode = "upload_only"
timeout_seconds = 12

[upload.fields]
language = "en"
priority = "high"

[[watch]]
directory = "/srv/scans"
extensions = ["pdf", ".jpg"]
tag = "scan"

[[watch]]
directory = "/srv/voice"
extensions = ["m4a"]
tag = "rec"
enabled = false

[monitor]
strategy = "polling"
poll_interval_secs = 2
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load(Some(&config_path)).unwrap();
        assert_eq!(
            settings.destination_directory,
            Some(PathBuf::from("/srv/organized"))
        );

        let upload = settings.upload.as_ref().unwrap();
        assert!(upload.enabled);
        assert_eq!(upload.mode, UploadMode::UploadOnly);
        assert_eq!(upload.timeout_seconds, 12);
        assert_eq!(upload.file_field, "file");
        assert_eq!(upload.fields["priority"], "high");

        assert_eq!(settings.watch.len(), 2);
        assert_eq!(settings.watch[0].tag, "scan");
        // Leading dot is normalized away
        assert!(settings.watch[0].extensions.contains("jpg"));
        assert!(settings.watch[0].enabled);
        assert!(!settings.watch[1].enabled);

        assert_eq!(settings.monitor.strategy, Strategy::Polling);
        assert_eq!(settings.monitor.poll_interval_secs, 2);
        // Unspecified values keep their defaults
        assert_eq!(settings.monitor.debounce_ms, 500);
    }

    #[test]
    fn test_tilde_paths_expanded() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(
            &config_path,
            r#"
destination_directory = "~/Organized"

[[watch]]
directory = "~/Downloads"
extensions = ["pdf"]
tag = "dl"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&config_path)).unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(settings.destination_directory, Some(home.join("Organized")));
        assert_eq!(settings.watch[0].directory, home.join("Downloads"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(Some(&temp_dir.path().join("nope.toml"))).unwrap();
        assert!(settings.watch.is_empty());
        assert_eq!(settings.logging.default, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.destination_directory = Some(PathBuf::from("/data/out"));
        settings.monitor.workers = 4;
        settings.watch.push(WatchRule::new("/data/in", ["pdf"], "x"));
        settings.save(&config_path).unwrap();

        let loaded = Settings::load(Some(&config_path)).unwrap();
        assert_eq!(loaded.monitor.workers, 4);
        assert_eq!(loaded.watch, settings.watch);
    }

    #[test]
    fn test_init_config_file_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        Settings::init_config_file(&config_path, false).unwrap();
        assert!(Settings::init_config_file(&config_path, false).is_err());
        assert!(Settings::init_config_file(&config_path, true).is_ok());

        let loaded = Settings::load(Some(&config_path)).unwrap();
        assert_eq!(loaded.mode(), UploadMode::CopyOnly);
        assert_eq!(loaded.watch.len(), 1);
    }

    #[test]
    fn test_redacted_masks_password() {
        let mut settings = Settings::default();
        settings.upload = Some(UploadConfig {
            password: "hunter2".to_string(),
            ..UploadConfig::default()
        });
        let shown = settings.redacted();
        assert_eq!(shown.upload.unwrap().password, "********");
        assert_eq!(settings.upload.unwrap().password, "hunter2");
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("auto".parse::<Strategy>().unwrap(), Strategy::Auto);
        assert_eq!("poll".parse::<Strategy>().unwrap(), Strategy::Polling);
        assert!("inotify".parse::<Strategy>().is_err());
    }
}

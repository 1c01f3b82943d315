//! Ensure-running supervisor for the monitor process.
//!
//! Some platforms refuse to let the native service manager read protected
//! folders (a sandboxed recordings directory, for instance). In that setup
//! the monitor runs as an ordinary user process and this supervisor keeps it
//! alive: a scheduler (cron, launchd `StartInterval`, a systemd timer) calls
//! `filerelay supervise` every minute, or `supervise --every` loops itself.
//!
//! Each check reads the status file, looks up the recorded pid and confirms
//! its command line still carries the session name. When that fails, the
//! process table is searched for a monitor already running with the same
//! command line, which is adopted. Only when none exists is a fresh
//! `filerelay monitor --session <name>` started.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::{EventSource, SourceError, SourceHandle, SupervisorError};
use crate::config::SupervisorConfig;
use crate::relay::Dispatcher;

/// Lifecycle of the supervised monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// Set up, never started.
    Installed,
    Running,
    /// The last start attempt failed.
    Failed,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SupervisorState::Installed => "installed",
            SupervisorState::Running => "running",
            SupervisorState::Failed => "failed",
        })
    }
}

/// Contents of the status file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: SupervisorState,
    pub session: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
    #[serde(default)]
    pub restarts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Keeps one monitor process alive.
pub struct Supervisor {
    config: SupervisorConfig,
    program: PathBuf,
    args: Vec<OsString>,
    /// Child spawned by this process, reaped on the next check.
    child: Mutex<Option<Child>>,
}

impl Supervisor {
    /// Supervise `<current exe> [--config <path>] monitor --session <name>`.
    pub fn new(config: SupervisorConfig, settings_path: Option<&Path>) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(SupervisorError::Executable)?;

        let mut args: Vec<OsString> = Vec::new();
        if let Some(path) = settings_path {
            args.push("--config".into());
            args.push(path.as_os_str().to_os_string());
        }
        args.push("monitor".into());
        args.push("--session".into());
        args.push(config.session.clone().into());

        Ok(Self::with_command(config, program, args))
    }

    /// Supervise an arbitrary command. Its arguments must include the
    /// session name for liveness checks to recognise it.
    pub fn with_command(config: SupervisorConfig, program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            config,
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &str {
        &self.config.session
    }

    pub fn status_file(&self) -> &Path {
        &self.config.status_file
    }

    /// Read the status file; `None` if it does not exist yet.
    pub fn load_status(&self) -> Result<Option<StatusSnapshot>, SupervisorError> {
        let path = self.status_file();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SupervisorError::ReadStatus {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SupervisorError::CorruptStatus {
                path: path.to_path_buf(),
                source,
            })
    }

    fn save_status(&self, snapshot: &StatusSnapshot) -> Result<(), SupervisorError> {
        let path = self.status_file();
        let write_err = |source| SupervisorError::WriteStatus {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let body = serde_json::to_string_pretty(snapshot).map_err(|e| write_err(e.into()))?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        temp.write_all(body.as_bytes()).map_err(write_err)?;
        temp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Record that the agent is set up but not yet started.
    pub fn mark_installed(&self) -> Result<StatusSnapshot, SupervisorError> {
        let snapshot = StatusSnapshot {
            state: SupervisorState::Installed,
            session: self.config.session.clone(),
            pid: None,
            started_at: None,
            checked_at: Utc::now(),
            restarts: 0,
            last_error: None,
        };
        self.save_status(&snapshot)?;
        Ok(snapshot)
    }

    /// Whether `pid` is a live (non-zombie) process carrying our session name.
    pub fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let Some(process) = system.process(pid) else {
            return false;
        };
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return false;
        }

        let session = std::ffi::OsStr::new(&self.config.session);
        process.cmd().iter().any(|arg| arg.as_os_str() == session)
    }

    /// Find a live process started with our command line, e.g. one launched
    /// before the status file was written or after it was lost.
    ///
    /// Returns the lowest matching pid and its start time.
    pub fn find_session_process(&self) -> Option<(u32, Option<DateTime<Utc>>)> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let own = std::process::id();
        system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own)
            .filter(|(_, process)| {
                !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
            })
            .filter(|(_, process)| {
                let cmd = process.cmd();
                cmd.len() == self.args.len() + 1 && cmd[1..] == self.args[..]
            })
            .map(|(pid, process)| {
                let started = i64::try_from(process.start_time())
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0));
                (pid.as_u32(), started)
            })
            .min_by_key(|(pid, _)| *pid)
    }

    /// Reap a child we spawned earlier if it has exited.
    fn reap(&self) {
        let mut guard = self.child.lock();
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!("[supervisor] monitor {} exited: {status}", child.id());
                    *guard = None;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[supervisor] cannot query monitor {}: {e}", child.id());
                }
            }
        }
    }

    fn spawn_monitor(&self) -> Result<u32, SupervisorError> {
        let log_path = &self.config.log_file;
        let log_err = |source| SupervisorError::LogFile {
            path: log_path.clone(),
            source,
        };

        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(log_err)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        // Detach from the scheduler's process group so it survives the caller
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(SupervisorError::Spawn)?;
        let pid = child.id();
        *self.child.lock() = Some(child);
        Ok(pid)
    }

    /// Check the monitor and start it if it is not running.
    pub fn ensure_running(&self) -> Result<StatusSnapshot, SupervisorError> {
        self.reap();

        let previous = match self.load_status() {
            Ok(previous) => previous,
            Err(e @ SupervisorError::CorruptStatus { .. }) => {
                tracing::warn!("[supervisor] {e}, starting fresh");
                None
            }
            Err(e) => return Err(e),
        };
        let now = Utc::now();

        if let Some(prev) = previous.as_ref() {
            if let Some(pid) = prev.pid.filter(|pid| self.is_alive(*pid)) {
                crate::debug_event!("supervisor", "alive", "pid {pid}");
                let snapshot = StatusSnapshot {
                    state: SupervisorState::Running,
                    checked_at: now,
                    last_error: None,
                    ..prev.clone()
                };
                self.save_status(&snapshot)?;
                return Ok(snapshot);
            }
        }

        if let Some((pid, started_at)) = self.find_session_process() {
            crate::log_event!("supervisor", "adopted monitor", "pid {pid}");
            let snapshot = StatusSnapshot {
                state: SupervisorState::Running,
                session: self.config.session.clone(),
                pid: Some(pid),
                started_at,
                checked_at: now,
                restarts: previous.as_ref().map_or(0, |prev| prev.restarts),
                last_error: None,
            };
            self.save_status(&snapshot)?;
            return Ok(snapshot);
        }

        let restarts = match previous.as_ref() {
            Some(prev) if prev.pid.is_some() => prev.restarts + 1,
            Some(prev) => prev.restarts,
            None => 0,
        };

        match self.spawn_monitor() {
            Ok(pid) => {
                crate::log_event!("supervisor", "started monitor", "pid {pid}");
                let snapshot = StatusSnapshot {
                    state: SupervisorState::Running,
                    session: self.config.session.clone(),
                    pid: Some(pid),
                    started_at: Some(now),
                    checked_at: now,
                    restarts,
                    last_error: None,
                };
                self.save_status(&snapshot)?;
                Ok(snapshot)
            }
            Err(e) => {
                tracing::error!("[supervisor] {e}");
                let snapshot = StatusSnapshot {
                    state: SupervisorState::Failed,
                    session: self.config.session.clone(),
                    pid: None,
                    started_at: None,
                    checked_at: now,
                    restarts,
                    last_error: Some(e.to_string()),
                };
                self.save_status(&snapshot)?;
                Err(e)
            }
        }
    }
}

/// Runs [`Supervisor::ensure_running`] on a fixed interval.
///
/// As an [`EventSource`] it never dispatches files; its only job is liveness.
pub struct SupervisorSource {
    supervisor: Arc<Supervisor>,
    interval: Duration,
}

impl SupervisorSource {
    pub fn new(supervisor: Arc<Supervisor>, interval_secs: u64) -> Self {
        Self {
            supervisor,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Start the check loop.
    pub fn spawn(self) -> SourceHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        SourceHandle::new("supervisor", token, task)
    }

    async fn run(self, token: CancellationToken) -> Result<(), SourceError> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        crate::log_event!(
            "supervisor",
            "checking",
            "session {} every {}s",
            self.supervisor.session(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let supervisor = self.supervisor.clone();
            match tokio::task::spawn_blocking(move || supervisor.ensure_running()).await {
                Ok(Ok(_)) => {}
                // Already logged; try again next tick
                Ok(Err(_)) => {}
                Err(e) => {
                    return Err(SourceError::Task {
                        name: "supervisor".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl EventSource for SupervisorSource {
    fn name(&self) -> &'static str {
        "supervisor"
    }

    fn start(self: Box<Self>, _dispatcher: Arc<Dispatcher>) -> Result<SourceHandle, SourceError> {
        Ok((*self).spawn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &Path, session: &str) -> SupervisorConfig {
        SupervisorConfig {
            session: session.to_string(),
            status_file: dir.join("status.json"),
            log_file: dir.join("logs").join("monitor.log"),
            check_interval_secs: 1,
        }
    }

    fn sleeper(dir: &Path, session: &str) -> Supervisor {
        // Two commands keep the shell from exec'ing sleep and losing its argv
        Supervisor::with_command(
            config(dir, session),
            "sh",
            vec![
                "-c".into(),
                "sleep 30; true".into(),
                session.into(),
            ],
        )
    }

    fn kill(pid: u32) {
        let _ = Command::new("kill").arg(pid.to_string()).status();
    }

    #[test]
    fn test_status_round_trip() {
        let temp = TempDir::new().unwrap();
        let supervisor = sleeper(temp.path(), "filerelay-test-roundtrip");

        assert!(supervisor.load_status().unwrap().is_none());

        let installed = supervisor.mark_installed().unwrap();
        assert_eq!(installed.state, SupervisorState::Installed);
        assert_eq!(supervisor.load_status().unwrap(), Some(installed));

        let raw = std::fs::read_to_string(temp.path().join("status.json")).unwrap();
        assert!(raw.contains("\"state\": \"installed\""));
    }

    #[test]
    fn test_nonexistent_pid_is_not_alive() {
        let temp = TempDir::new().unwrap();
        let supervisor = sleeper(temp.path(), "filerelay-test-dead");
        assert!(!supervisor.is_alive(4_000_000_000));
    }

    #[test]
    fn test_foreign_process_is_not_alive() {
        let temp = TempDir::new().unwrap();
        let supervisor = sleeper(temp.path(), "filerelay-test-foreign");
        // The test binary is alive but does not carry the session name
        assert!(!supervisor.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_running_starts_and_restarts() {
        let temp = TempDir::new().unwrap();
        let supervisor = sleeper(temp.path(), "filerelay-test-restart");

        let first = supervisor.ensure_running().unwrap();
        assert_eq!(first.state, SupervisorState::Running);
        let pid = first.pid.unwrap();
        assert!(supervisor.is_alive(pid));
        assert_eq!(first.restarts, 0);

        // Still alive: no new process
        let second = supervisor.ensure_running().unwrap();
        assert_eq!(second.pid, Some(pid));
        assert_eq!(second.started_at, first.started_at);

        kill(pid);
        std::thread::sleep(Duration::from_millis(200));

        let third = supervisor.ensure_running().unwrap();
        let new_pid = third.pid.unwrap();
        assert_ne!(new_pid, pid);
        assert_eq!(third.restarts, 1);
        assert!(temp.path().join("logs").join("monitor.log").exists());

        kill(new_pid);
    }

    #[cfg(unix)]
    #[test]
    fn test_running_monitor_without_status_is_adopted() {
        let temp = TempDir::new().unwrap();
        let session = format!("filerelay-test-adopt-{}", std::process::id());
        let supervisor = sleeper(temp.path(), &session);

        // Started outside the supervisor, so no status file exists
        let mut existing = Command::new("sh")
            .args(["-c", "sleep 30; true", session.as_str()])
            .spawn()
            .unwrap();
        let pid = existing.id();
        std::thread::sleep(Duration::from_millis(100));
        assert!(supervisor.load_status().unwrap().is_none());

        let status = supervisor.ensure_running().unwrap();
        assert_eq!(status.state, SupervisorState::Running);
        assert_eq!(status.pid, Some(pid));
        assert_eq!(status.restarts, 0);
        assert!(supervisor.child.lock().is_none());
        assert!(!temp.path().join("logs").join("monitor.log").exists());

        // Later checks keep the adopted pid
        let again = supervisor.ensure_running().unwrap();
        assert_eq!(again.pid, Some(pid));

        kill(pid);
        let _ = existing.wait();
    }

    #[test]
    fn test_spawn_failure_records_failed_state() {
        let temp = TempDir::new().unwrap();
        let supervisor = Supervisor::with_command(
            config(temp.path(), "filerelay-test-missing"),
            temp.path().join("no-such-binary"),
            vec![],
        );

        let err = supervisor.ensure_running().unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn(_)));

        let status = supervisor.load_status().unwrap().unwrap();
        assert_eq!(status.state, SupervisorState::Failed);
        assert!(status.pid.is_none());
        assert!(status.last_error.is_some());
    }

    #[test]
    fn test_corrupt_status_is_replaced() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("status.json"), "{ not json").unwrap();
        let supervisor = Supervisor::with_command(
            config(temp.path(), "filerelay-test-corrupt"),
            temp.path().join("no-such-binary"),
            vec![],
        );

        assert!(matches!(
            supervisor.load_status(),
            Err(SupervisorError::CorruptStatus { .. })
        ));
        // The check still runs and overwrites the file
        let _ = supervisor.ensure_running();
        assert_eq!(
            supervisor.load_status().unwrap().unwrap().state,
            SupervisorState::Failed
        );
    }
}

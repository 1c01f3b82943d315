//! Common utilities shared across modules.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~` component are returned unchanged, as are
/// `~user` forms (only the current user's home is supported).
pub fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(std::path::Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Modification time of a file in whole epoch seconds.
///
/// Returns `None` when the file cannot be stat'ed (typically because it
/// was removed between discovery and dispatch).
pub async fn modification_time(path: &Path) -> Option<i64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    let modified = metadata.modified().ok()?;
    let secs = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    Some(secs)
}

/// Resolve when the process is asked to terminate (Ctrl-C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("[signal] failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("[signal] failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    crate::log_event!("signal", "shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().expect("home dir");
        assert_eq!(expand_tilde(Path::new("~/Downloads")), home.join("Downloads"));
        assert_eq!(expand_tilde(Path::new("~")), home);
        assert_eq!(
            expand_tilde(Path::new("/var/~/inbox")),
            PathBuf::from("/var/~/inbox")
        );
        assert_eq!(expand_tilde(Path::new("~other/x")), PathBuf::from("~other/x"));
    }

    #[tokio::test]
    async fn test_modification_time_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(modification_time(&dir.path().join("gone.pdf")).await.is_none());
        // Directories are not dispatchable files
        assert!(modification_time(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_modification_time_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.pdf");
        std::fs::write(&file, b"pdf").unwrap();
        let mtime = modification_time(&file).await.unwrap();
        assert!(mtime > 1577836800);
    }
}

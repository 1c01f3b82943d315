//! Local copier: places a byte-for-byte copy into the destination folder.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::CopyError;

/// Result of a successful copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub destination: PathBuf,
    pub bytes: u64,
}

/// Copies a file into a destination directory under a given name.
///
/// Implementations never touch the ledger and never replace an existing
/// destination file: a taken name fails with [`CopyError::DestinationExists`].
#[async_trait]
pub trait Copier: Send + Sync {
    async fn copy(
        &self,
        source: &Path,
        destination_dir: &Path,
        destination_name: &str,
    ) -> Result<CopyReport, CopyError>;
}

/// Filesystem copier: `create_new` destination, streamed with `tokio::io::copy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCopier;

#[async_trait]
impl Copier for LocalCopier {
    async fn copy(
        &self,
        source: &Path,
        destination_dir: &Path,
        destination_name: &str,
    ) -> Result<CopyReport, CopyError> {
        let destination = destination_dir.join(destination_name);
        let io_err = |to: &Path, source_err| CopyError::Io {
            from: source.to_path_buf(),
            to: to.to_path_buf(),
            source: source_err,
        };

        let mut reader = match File::open(source).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CopyError::SourceMissing {
                    path: source.to_path_buf(),
                });
            }
            Err(e) => return Err(io_err(&destination, e)),
        };

        let mut writer = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&destination)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CopyError::DestinationExists { path: destination });
            }
            Err(e) => return Err(io_err(&destination, e)),
        };

        let copied = async {
            let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
            writer.flush().await?;
            Ok::<_, std::io::Error>(bytes)
        }
        .await;

        match copied {
            Ok(bytes) => Ok(CopyReport { destination, bytes }),
            Err(e) => {
                // Release the name; a half-written copy is worse than none
                drop(writer);
                let _ = tokio::fs::remove_file(&destination).await;
                Err(io_err(&destination, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_preserves_bytes() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.pdf");
        let out = temp.path().join("out");
        std::fs::create_dir(&out).unwrap();
        std::fs::write(&source, b"%PDF-1.7 body").unwrap();

        let report = LocalCopier.copy(&source, &out, "[x]_a.pdf").await.unwrap();

        assert_eq!(report.destination, out.join("[x]_a.pdf"));
        assert_eq!(report.bytes, 13);
        assert_eq!(std::fs::read(&report.destination).unwrap(), b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn test_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = LocalCopier
            .copy(&temp.path().join("gone.pdf"), temp.path(), "[x]_gone.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::SourceMissing { .. }));
    }

    #[tokio::test]
    async fn test_existing_destination_is_kept() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.pdf");
        std::fs::write(&source, b"new version").unwrap();
        std::fs::write(temp.path().join("[x]_a.pdf"), b"earlier copy").unwrap();

        let err = LocalCopier
            .copy(&source, temp.path(), "[x]_a.pdf")
            .await
            .unwrap_err();

        assert!(matches!(err, CopyError::DestinationExists { .. }));
        assert_eq!(
            std::fs::read(temp.path().join("[x]_a.pdf")).unwrap(),
            b"earlier copy"
        );
    }

    #[tokio::test]
    async fn test_missing_destination_directory() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.pdf");
        std::fs::write(&source, b"x").unwrap();

        let err = LocalCopier
            .copy(&source, &temp.path().join("nowhere"), "[x]_a.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Io { .. }));
    }
}

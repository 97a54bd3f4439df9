//! On-disk file store behind the catalog and transfer paths
//!
//! The bulk-byte I/O a leaf performs sits behind one trait so the protocol
//! code never touches paths directly: scanning `local/` into the catalog,
//! creating and unlinking cached copies in `remote/`, and opening either side
//! for an obtain.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::fs::File;

use crate::error::{MeshError, MeshResult};

use super::catalog::LocalFile;

/// Disk operations a leaf performs, keyed by bare filenames; implementations
/// decide where the bytes live.
#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    /// Scan the owned directory into a fresh local catalog. Entries that fail
    /// to stat are skipped, subdirectories are ignored.
    async fn scan_local(&self) -> MeshResult<Vec<LocalFile>>;

    /// Open an owned file for serving.
    async fn open_local(&self, filename: &str) -> io::Result<File>;

    /// Open a cached copy for serving.
    async fn open_cached(&self, local_name: &str) -> io::Result<File>;

    /// Create (or truncate) a cached copy for an incoming download.
    async fn create_cached(&self, local_name: &str) -> io::Result<File>;

    /// Remove an invalidated cached copy.
    async fn unlink_cached(&self, local_name: &str) -> io::Result<()>;
}

/// Production store over `<dir>/local` and `<dir>/remote`.
#[derive(Debug, Clone)]
pub struct DiskStore {
    local_dir: PathBuf,
    remote_dir: PathBuf,
}

impl DiskStore {
    /// Both subdirectories must already exist; their absence is a fatal
    /// startup error.
    pub fn new(directory: impl AsRef<Path>) -> MeshResult<Self> {
        let local_dir = directory.as_ref().join("local");
        let remote_dir = directory.as_ref().join("remote");
        for dir in [&local_dir, &remote_dir] {
            if !dir.is_dir() {
                return Err(MeshError::InvalidDirectory { path: dir.clone() });
            }
        }
        Ok(Self {
            local_dir,
            remote_dir,
        })
    }
}

/// Filenames arrive off the wire; anything that could walk out of the store
/// directory is refused.
fn join_checked(dir: &Path, name: &str) -> io::Result<PathBuf> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("refusing filename {name:?}"),
        ));
    }
    Ok(dir.join(name))
}

#[async_trait]
impl FileStore for DiskStore {
    async fn scan_local(&self) -> MeshResult<Vec<LocalFile>> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.local_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(file = %filename, error = %e, "failed file stat; skipping");
                    continue;
                }
            };
            if meta.is_dir() {
                continue;
            }
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
            let Some(modified) = modified else {
                tracing::warn!(file = %filename, "file has no modification time; skipping");
                continue;
            };
            files.push(LocalFile {
                filename,
                version: modified.as_secs() as i64,
            });
        }
        Ok(files)
    }

    async fn open_local(&self, filename: &str) -> io::Result<File> {
        File::open(join_checked(&self.local_dir, filename)?).await
    }

    async fn open_cached(&self, local_name: &str) -> io::Result<File> {
        File::open(join_checked(&self.remote_dir, local_name)?).await
    }

    async fn create_cached(&self, local_name: &str) -> io::Result<File> {
        File::create(join_checked(&self.remote_dir, local_name)?).await
    }

    async fn unlink_cached(&self, local_name: &str) -> io::Result<()> {
        tokio::fs::remove_file(join_checked(&self.remote_dir, local_name)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("local")).unwrap();
        std::fs::create_dir(dir.path().join("remote")).unwrap();
        let store = DiskStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_subdirectories_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DiskStore::new(dir.path()),
            Err(MeshError::InvalidDirectory { .. })
        ));
    }

    #[tokio::test]
    async fn scan_reports_names_and_versions_and_skips_directories() {
        let (dir, store) = scratch_store();
        std::fs::write(dir.path().join("local/a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("local/b.txt"), b"beta").unwrap();
        std::fs::create_dir(dir.path().join("local/sub")).unwrap();

        let mut scan = store.scan_local().await.unwrap();
        scan.sort_by(|a, b| a.filename.cmp(&b.filename));
        assert_eq!(scan.len(), 2);
        assert_eq!(scan[0].filename, "a.txt");
        assert!(scan[0].version > 0);
    }

    #[tokio::test]
    async fn cached_copies_round_trip_and_unlink() {
        let (dir, store) = scratch_store();

        use tokio::io::AsyncWriteExt;
        let mut file = store.create_cached("c.bin").await.unwrap();
        file.write_all(b"cached bytes").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        assert!(dir.path().join("remote/c.bin").exists());
        store.unlink_cached("c.bin").await.unwrap();
        assert!(!dir.path().join("remote/c.bin").exists());
    }

    #[tokio::test]
    async fn traversal_names_are_refused() {
        let (_dir, store) = scratch_store();
        assert!(store.open_local("../etc/passwd").await.is_err());
        assert!(store.create_cached("").await.is_err());
        assert!(store.unlink_cached("..").await.is_err());
    }
}

//! Leaf catalogs: owned local files and cached remote files

use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

/// A file this leaf owns: name plus last-modified time in whole seconds,
/// which doubles as the version every cache of the file is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFile {
    pub filename: String,
    pub version: i64,
}

/// A cache entry for a file obtained from another leaf.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteFile {
    /// Name of the cached copy inside `remote/`; may carry an origin suffix
    /// when two origins advertise the same name.
    pub local_name: String,

    /// Name the origin advertises the file under.
    pub origin_name: String,

    /// The leaf owning the authoritative copy. Together with `origin_name`
    /// this identifies the entry's lineage; two entries for the same lineage
    /// never coexist.
    pub origin_leaf: i32,

    pub version: i64,

    #[serde(skip)]
    pub last_poll: Instant,

    /// Flips to false on invalidation and never back; the registration tick
    /// retires invalid entries.
    pub valid: bool,
}

/// Outcome of recording a completed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadRecord {
    Created,
    /// An entry with the same lineage already existed; its version was
    /// refreshed in place.
    Updated,
}

/// Both catalogs, shared between the registration tick, the poller, the
/// obtain paths, and the invalidate handler. Locks cover only the catalog
/// operation; callers never hold them across network I/O.
#[derive(Debug, Default)]
pub struct Catalog {
    local: RwLock<Vec<LocalFile>>,
    remote: Mutex<Vec<RemoteFile>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- local files -------------------------------------------------------

    /// Swap in a fresh directory scan, returning the previous one.
    pub async fn replace_local(&self, fresh: Vec<LocalFile>) -> Vec<LocalFile> {
        std::mem::replace(&mut *self.local.write().await, fresh)
    }

    pub async fn local_snapshot(&self) -> Vec<LocalFile> {
        self.local.read().await.clone()
    }

    pub async fn local_version(&self, filename: &str) -> Option<i64> {
        self.local
            .read()
            .await
            .iter()
            .find(|f| f.filename == filename)
            .map(|f| f.version)
    }

    /// Strict membership check used by the poll responder: name and version
    /// must both match.
    pub async fn local_contains(&self, filename: &str, version: i64) -> bool {
        self.local
            .read()
            .await
            .iter()
            .any(|f| f.filename == filename && f.version == version)
    }

    // ---- remote files ------------------------------------------------------

    pub async fn remote_snapshot(&self) -> Vec<RemoteFile> {
        self.remote.lock().await.clone()
    }

    /// A still-valid cache entry advertised under `origin_name`, if any; used
    /// by the obtain server to serve cached copies.
    pub async fn find_valid_remote(&self, origin_name: &str) -> Option<RemoteFile> {
        self.remote
            .lock()
            .await
            .iter()
            .find(|e| e.origin_name == origin_name && e.valid)
            .cloned()
    }

    /// Pick the on-disk name for a download of `origin_name` from
    /// `origin_leaf`: when a cache of the same name from a different origin
    /// exists, the origin id is spliced in before the extension.
    pub async fn resolve_local_name(&self, origin_name: &str, origin_leaf: i32) -> String {
        let collides = self
            .remote
            .lock()
            .await
            .iter()
            .any(|e| e.origin_name == origin_name && e.origin_leaf != origin_leaf);
        if collides {
            suffixed_name(origin_name, origin_leaf)
        } else {
            origin_name.to_owned()
        }
    }

    /// Create or refresh the entry for a completed download.
    pub async fn record_download(
        &self,
        local_name: &str,
        origin_name: &str,
        origin_leaf: i32,
        version: i64,
    ) -> DownloadRecord {
        let mut remote = self.remote.lock().await;
        if let Some(entry) = remote
            .iter_mut()
            .find(|e| e.origin_name == origin_name && e.origin_leaf == origin_leaf)
        {
            entry.version = version;
            entry.last_poll = Instant::now();
            entry.valid = true;
            DownloadRecord::Updated
        } else {
            remote.push(RemoteFile {
                local_name: local_name.to_owned(),
                origin_name: origin_name.to_owned(),
                origin_leaf,
                version,
                last_poll: Instant::now(),
                valid: true,
            });
            DownloadRecord::Created
        }
    }

    /// Pushed invalidation: mark the entry matching the lineage whose stored
    /// version differs from `version`. Returns the local name to unlink.
    pub async fn invalidate_matching(
        &self,
        origin_leaf: i32,
        origin_name: &str,
        version: i64,
    ) -> Option<String> {
        let mut remote = self.remote.lock().await;
        let entry = remote.iter_mut().find(|e| {
            e.origin_leaf == origin_leaf && e.origin_name == origin_name && e.version != version
        })?;
        entry.valid = false;
        Some(entry.local_name.clone())
    }

    /// Apply a poll verdict: refresh the poll time and, on a stale verdict,
    /// mark the entry invalid. Returns the local name to unlink when the
    /// entry just became invalid.
    pub async fn set_poll_result(
        &self,
        origin_leaf: i32,
        origin_name: &str,
        valid: bool,
    ) -> Option<String> {
        let mut remote = self.remote.lock().await;
        let entry = remote
            .iter_mut()
            .find(|e| e.origin_leaf == origin_leaf && e.origin_name == origin_name)?;
        entry.last_poll = Instant::now();
        if valid || !entry.valid {
            return None;
        }
        entry.valid = false;
        Some(entry.local_name.clone())
    }

    /// Drop the entry for one lineage (after its deregister was sent).
    pub async fn remove_remote(&self, origin_leaf: i32, origin_name: &str) {
        self.remote
            .lock()
            .await
            .retain(|e| !(e.origin_leaf == origin_leaf && e.origin_name == origin_name));
    }
}

fn suffixed_name(origin_name: &str, origin_leaf: i32) -> String {
    match origin_name.rfind('.') {
        Some(idx) => format!(
            "{}-origin-{}{}",
            &origin_name[..idx],
            origin_leaf,
            &origin_name[idx..]
        ),
        None => format!("{origin_name}-origin-{origin_leaf}"),
    }
}

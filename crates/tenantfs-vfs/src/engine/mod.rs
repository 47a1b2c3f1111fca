//! The VFS engine.
//!
//! [`Vfs`] is the only writer of a tenant's documents. It keeps the path
//! index, the document model and the storage backend consistent:
//!
//! - tree mutations run under the tenant's write lock
//! - traversals run under the read lock
//! - uploads stream without any tenant-wide lock; only the reservation and
//!   the commit are serialized
//!
//! Operations are grouped by concern:
//!
//! - `quota` - disk usage and available space
//! - `tree` - directory creation, metadata patches, cascading renames
//! - `upload` - file creation, content access, copies
//! - `remove` - trash, restore and erasure
//! - `walk` - depth-first traversal

mod quota;
mod remove;
mod tree;
mod upload;
mod walk;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::error::VfsResult;
use crate::index::{DocumentIndex, PathIndex};
use crate::lock::{LockGuard, TreeLocker};
use crate::model::{DirDoc, DirOrFile, FileDoc};
use crate::storage::StorageBackend;

pub use quota::check_available_space;
pub use remove::RemoveMode;
pub use upload::FileHandle;
pub use walk::WalkEntry;

/// One tenant's file system.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<VfsInner>,
}

struct VfsInner {
    domain: String,
    disk_quota: AtomicU64,
    index: PathIndex,
    storage: Arc<dyn StorageBackend>,
    locker: Arc<dyn TreeLocker>,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("domain", &self.inner.domain)
            .field("layout", &self.inner.storage.layout())
            .field("disk_quota", &self.disk_quota())
            .finish()
    }
}

impl Vfs {
    /// Assemble a tenant file system from its collaborators.
    pub fn new(
        domain: impl Into<String>,
        index: Arc<dyn DocumentIndex>,
        storage: Arc<dyn StorageBackend>,
        locker: Arc<dyn TreeLocker>,
    ) -> Self {
        Self {
            inner: Arc::new(VfsInner {
                domain: domain.into(),
                disk_quota: AtomicU64::new(0),
                index: PathIndex::new(index),
                storage,
                locker,
            }),
        }
    }

    /// Set the initial disk quota (bytes, 0 = unlimited).
    pub fn with_disk_quota(self, quota: u64) -> Self {
        self.inner.disk_quota.store(quota, Ordering::Relaxed);
        self
    }

    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    pub fn index(&self) -> &PathIndex {
        &self.inner.index
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.storage
    }

    pub fn locker(&self) -> &Arc<dyn TreeLocker> {
        &self.inner.locker
    }

    /// Current disk quota in bytes, 0 when unlimited.
    pub fn disk_quota(&self) -> u64 {
        self.inner.disk_quota.load(Ordering::Relaxed)
    }

    /// Hard per-file maximum of the storage backend.
    pub fn max_file_size(&self) -> Option<u64> {
        self.inner.storage.max_file_size()
    }

    pub(crate) async fn write_lock(&self) -> VfsResult<LockGuard> {
        self.inner.locker.write(&self.inner.domain).await
    }

    pub(crate) async fn read_lock(&self) -> VfsResult<LockGuard> {
        self.inner.locker.read(&self.inner.domain).await
    }

    /// Create the root and trash directories and prepare the storage
    /// namespace. Safe to call on an initialized tenant.
    pub async fn init(&self) -> VfsResult<()> {
        let _guard = self.write_lock().await?;
        self.inner.storage.init().await?;
        let docs = self.inner.index.documents();
        for reserved in [DirDoc::root(), DirDoc::trash()] {
            if docs.get(&reserved.id).await?.is_none() {
                let mut doc = DirOrFile::from(reserved);
                docs.create(&mut doc).await?;
            }
        }
        info!(domain = %self.inner.domain, layout = %self.inner.storage.layout(), "tenant initialized");
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub async fn dir_by_id(&self, id: &str) -> VfsResult<DirDoc> {
        self.inner.index.dir_by_id(id).await
    }

    pub async fn file_by_id(&self, id: &str) -> VfsResult<FileDoc> {
        self.inner.index.file_by_id(id).await
    }

    pub async fn dir_or_file_by_id(&self, id: &str) -> VfsResult<DirOrFile> {
        self.inner.index.dir_or_file_by_id(id).await
    }

    pub async fn dir_by_path(&self, path: &str) -> VfsResult<DirDoc> {
        self.inner.index.dir_by_path(path).await
    }

    pub async fn file_by_path(&self, path: &str) -> VfsResult<FileDoc> {
        self.inner.index.file_by_path(path).await
    }

    pub async fn dir_or_file_by_path(&self, path: &str) -> VfsResult<DirOrFile> {
        self.inner.index.dir_or_file_by_path(path).await
    }
}

use std::sync::atomic::Ordering;
use tracing::info;

use super::Vfs;
use crate::error::{VfsError, VfsResult};
use crate::model::FileDoc;

/// Largest size a file may have given the tenant's quota and usage and the
/// backend's hard maximum. `None` means unbounded.
///
/// `quota` of 0 is unlimited. `usage` must not include the file being
/// replaced, if any. Fails with [`VfsError::FileTooBig`] when `size` is
/// known and above the bound.
pub fn check_available_space(
    size: Option<u64>,
    quota: u64,
    usage: u64,
    max_file_size: Option<u64>,
) -> VfsResult<Option<u64>> {
    let room = (quota > 0).then(|| quota.saturating_sub(usage));
    let limit = match (room, max_file_size) {
        (Some(room), Some(max)) => Some(room.min(max)),
        (room, max) => room.or(max),
    };
    if let (Some(size), Some(limit)) = (size, limit) {
        if size > limit {
            return Err(VfsError::FileTooBig);
        }
    }
    Ok(limit)
}

impl Vfs {
    /// Bytes used by committed, non-trashed files.
    pub async fn disk_usage(&self) -> VfsResult<u64> {
        self.index().disk_usage().await
    }

    /// Change the tenant's quota (bytes, 0 = unlimited).
    pub fn set_disk_quota(&self, quota: u64) {
        self.inner.disk_quota.store(quota, Ordering::Relaxed);
        info!(domain = %self.domain(), quota, "disk quota updated");
    }

    /// Check that `doc` fits, crediting back the size of `old` when it is
    /// being replaced. Returns the bound the upload must stay under.
    pub async fn check_available_disk_space(
        &self,
        doc: &FileDoc,
        old: Option<&FileDoc>,
    ) -> VfsResult<Option<u64>> {
        let quota = self.disk_quota();
        let usage = if quota > 0 {
            let credit = old.filter(|o| !o.trashed && !o.pending).and_then(|o| o.size);
            self.disk_usage()
                .await?
                .saturating_sub(credit.unwrap_or(0))
        } else {
            0
        };
        check_available_space(doc.size, quota, usage, self.max_file_size())
    }
}

//! Content storage backends.
//!
//! A [`StorageBackend`] owns the bytes of a tenant's files; metadata lives in
//! the document index. Every backend exposes the same capability set (read,
//! write-then-commit, remove, copy, usage) keyed by an object key derived
//! from the file document and the tenant's layout.
//!
//! Backends:
//!
//! - [`LocalBackend`] - a directory tree on the local filesystem
//! - [`ObjectBackend`] - an [`ObjectStore`] container, under one of three
//!   historical key layouts
//!
//! The concrete backend is chosen once, by [`open_backend`].

mod dir_store;
mod local;
mod object;
mod object_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{COPY_BUFFER_SIZE, OBJECT_MAX_FILE_SIZE, OBJECT_PAGE_SIZE};
use crate::error::VfsResult;
use crate::model::FileDoc;

pub use dir_store::DirObjectStore;
pub use local::LocalBackend;
pub use object::ObjectBackend;
pub use object_store::{MemoryObjectStore, ObjectInfo, ObjectStore};

/// Byte stream of a committed file.
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Storage layout of a tenant, fixed when the tenant is created.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageLayout {
    /// Files under a directory tree on the local filesystem, keyed by id and
    /// content version.
    #[default]
    Local,
    /// Object storage, one object per file keyed by id.
    ObjectV1,
    /// Object storage keyed by id and content version.
    ObjectV2,
    /// Object storage keyed by id and version, sharded by creation month.
    ObjectV3,
}

impl StorageLayout {
    /// Returns true for layouts that keep one object per content version.
    pub fn is_versioned(self) -> bool {
        !matches!(self, StorageLayout::ObjectV1)
    }
}

/// One stored content object, as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    /// File id the key was derived from, when the key parses.
    pub doc_id: Option<String>,
    pub version: Option<String>,
    pub size: u64,
    /// Hex BLAKE3 of the stored bytes.
    pub checksum: String,
}

/// Bytes left behind by an upload that was never committed nor aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedUpload {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Write handle for one content object.
///
/// Nothing is visible to readers until [`ContentWriter::commit`] returns.
/// A handle that is aborted leaves nothing behind.
#[async_trait]
pub trait ContentWriter: Send {
    async fn write(&mut self, buf: &[u8]) -> VfsResult<()>;

    /// Publish the written bytes under the object key.
    async fn commit(self: Box<Self>) -> VfsResult<()>;

    /// Discard the written bytes.
    async fn abort(self: Box<Self>) -> VfsResult<()>;
}

/// Byte-level content operations for one tenant.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn layout(&self) -> StorageLayout;

    /// Hard per-file maximum, independent of quota.
    fn max_file_size(&self) -> Option<u64>;

    /// Content version to stamp on a document before writing it.
    ///
    /// `None` for layouts that overwrite in place.
    fn next_version(&self) -> Option<String> {
        None
    }

    /// Key of the object holding `doc`'s content.
    fn object_key(&self, doc: &FileDoc) -> String;

    /// Prepare the tenant namespace. Idempotent.
    async fn init(&self) -> VfsResult<()>;

    // ========================================================================
    // Content
    // ========================================================================

    async fn open(&self, doc: &FileDoc) -> VfsResult<ContentReader>;

    async fn create(&self, doc: &FileDoc) -> VfsResult<Box<dyn ContentWriter>>;

    async fn remove(&self, doc: &FileDoc) -> VfsResult<()>;

    /// Copy `src`'s content to the object of `dst`.
    async fn copy(&self, src: &FileDoc, dst: &FileDoc) -> VfsResult<()>;

    /// Remove the object of `old` after `new` replaced it, unless both share
    /// the same key.
    async fn remove_superseded(&self, old: &FileDoc, new: &FileDoc) -> VfsResult<()> {
        if self.object_key(old) == self.object_key(new) {
            return Ok(());
        }
        self.remove(old).await
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Size and checksum of `doc`'s object, if it exists.
    async fn stat(&self, doc: &FileDoc) -> VfsResult<Option<StoredObject>>;

    /// Up to `limit` objects with a key strictly after `after`, in key
    /// order.
    async fn list_objects_page(&self, after: Option<&str>, limit: usize) -> VfsResult<Vec<StoredObject>>;

    /// Every object in the tenant namespace.
    async fn list_objects(&self) -> VfsResult<Vec<StoredObject>> {
        let mut objects: Vec<StoredObject> = Vec::new();
        loop {
            let after = objects.last().map(|o| o.key.clone());
            let page = self.list_objects_page(after.as_deref(), OBJECT_PAGE_SIZE).await?;
            let done = page.len() < OBJECT_PAGE_SIZE;
            objects.extend(page);
            if done {
                return Ok(objects);
            }
        }
    }

    /// Uploads staged by this backend and not yet published or discarded.
    async fn list_staged(&self) -> VfsResult<Vec<StagedUpload>> {
        Ok(Vec::new())
    }

    /// Raw bytes held by the namespace, trashed content included.
    async fn usage(&self) -> VfsResult<u64> {
        let mut total = 0;
        let mut after: Option<String> = None;
        loop {
            let page = self.list_objects_page(after.as_deref(), OBJECT_PAGE_SIZE).await?;
            total += page.iter().map(|o| o.size).sum::<u64>();
            if page.len() < OBJECT_PAGE_SIZE {
                return Ok(total);
            }
            after = page.last().map(|o| o.key.clone());
        }
    }
}

/// Build the backend for a tenant from its persisted layout.
///
/// This is the only place that branches on the layout. `fs_root` is used by
/// the local layout, `objects` by the object layouts.
pub fn open_backend(
    layout: StorageLayout,
    domain: &str,
    fs_root: &Path,
    objects: Arc<dyn ObjectStore>,
    max_file_size: Option<u64>,
) -> Arc<dyn StorageBackend> {
    match layout {
        StorageLayout::Local => Arc::new(LocalBackend::new(fs_root, domain, max_file_size)),
        StorageLayout::ObjectV1 | StorageLayout::ObjectV2 | StorageLayout::ObjectV3 => {
            let limit = Some(max_file_size.map_or(OBJECT_MAX_FILE_SIZE, |m| m.min(OBJECT_MAX_FILE_SIZE)));
            Arc::new(ObjectBackend::new(objects, domain, layout, limit))
        }
    }
}

/// Fresh content version: 8 random bytes, hex encoded.
pub(crate) fn random_version() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A file found under a key-addressed directory tree.
#[derive(Debug)]
pub(crate) struct KeyedFile {
    pub key: String,
    pub path: PathBuf,
}

struct KeyEntry {
    /// Key of a file, or key prefix (with a trailing `/`) of a directory.
    key: String,
    path: PathBuf,
    is_dir: bool,
}

async fn sorted_entries(dir: &Path, prefix: &str) -> VfsResult<Vec<KeyEntry>> {
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await?.is_dir();
        let key = if is_dir {
            format!("{prefix}{name}/")
        } else {
            format!("{prefix}{name}")
        };
        entries.push(KeyEntry {
            key,
            path: entry.path(),
            is_dir,
        });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

/// Up to `limit` files below `root` whose key (path relative to `root`)
/// starts with `prefix` and sorts strictly after `after`, in key order.
///
/// Only one directory listing per level is held at a time; subtrees that
/// cannot hold a matching key are not read. Top-level directories named in
/// `skip` are ignored.
pub(crate) async fn list_files_page(
    root: &Path,
    skip: &[&str],
    prefix: &str,
    after: Option<&str>,
    limit: usize,
) -> VfsResult<Vec<KeyedFile>> {
    let mut found = Vec::new();
    let mut stack = vec![sorted_entries(root, "").await?.into_iter()];
    while found.len() < limit {
        let Some(level) = stack.last_mut() else {
            break;
        };
        let Some(entry) = level.next() else {
            stack.pop();
            continue;
        };
        if entry.is_dir {
            let skipped = stack.len() == 1
                && skip
                    .iter()
                    .any(|s| entry.key.strip_suffix('/') == Some(*s));
            let before = after.is_some_and(|a| a >= entry.key.as_str() && !a.starts_with(&entry.key));
            let outside = !(entry.key.starts_with(prefix) || prefix.starts_with(entry.key.as_str()));
            if skipped || before || outside {
                continue;
            }
            let children = sorted_entries(&entry.path, &entry.key).await?;
            stack.push(children.into_iter());
        } else if entry.key.starts_with(prefix) && after.is_none_or(|a| entry.key.as_str() > a) {
            found.push(KeyedFile {
                key: entry.key,
                path: entry.path,
            });
        }
    }
    Ok(found)
}

/// Size and hex BLAKE3 of a byte stream.
pub(crate) async fn hash_reader<R: AsyncRead + Unpin>(mut reader: R) -> VfsResult<(u64, String)> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hasher.finalize().to_hex().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_codes() {
        assert_eq!(StorageLayout::ObjectV3.to_string(), "object_v3");
        assert_eq!("object_v2".parse::<StorageLayout>().unwrap(), StorageLayout::ObjectV2);
        let parsed: StorageLayout = serde_json::from_str("\"object_v1\"").unwrap();
        assert_eq!(parsed, StorageLayout::ObjectV1);
        assert!(StorageLayout::ObjectV2.is_versioned());
        assert!(StorageLayout::Local.is_versioned());
        assert!(!StorageLayout::ObjectV1.is_versioned());
    }

    #[tokio::test]
    async fn test_list_files_page_in_key_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        for key in ["ab/id/v2", "ab/id/v1", "ab/id-x", "cd/other", ".uploads/tmp", "top"] {
            let path = tmp.path().join(key);
            fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            fs::write(&path, key).await.unwrap();
        }

        let keys = |page: Vec<KeyedFile>| page.into_iter().map(|f| f.key).collect::<Vec<_>>();
        let all = list_files_page(tmp.path(), &[".uploads"], "", None, 100).await.unwrap();
        assert_eq!(keys(all), ["ab/id-x", "ab/id/v1", "ab/id/v2", "cd/other", "top"]);

        let first = list_files_page(tmp.path(), &[".uploads"], "", None, 2).await.unwrap();
        assert_eq!(keys(first), ["ab/id-x", "ab/id/v1"]);
        let next = list_files_page(tmp.path(), &[".uploads"], "", Some("ab/id/v1"), 2)
            .await
            .unwrap();
        assert_eq!(keys(next), ["ab/id/v2", "cd/other"]);

        let scoped = list_files_page(tmp.path(), &[], "ab/id/", None, 10).await.unwrap();
        assert_eq!(keys(scoped), ["ab/id/v1", "ab/id/v2"]);
    }

    #[tokio::test]
    async fn test_hash_reader() {
        let (size, sum) = hash_reader(&b"hello"[..]).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(sum, blake3::hash(b"hello").to_hex().to_string());
    }
}

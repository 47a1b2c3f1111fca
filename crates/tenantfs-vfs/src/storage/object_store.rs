//! Object-storage client contract.
//!
//! The object backend speaks to an [`ObjectStore`]: named containers of
//! flat keys, written through multipart upload sessions that only become
//! visible on `complete`.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use super::ContentReader;
use crate::error::{VfsError, VfsResult};

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Hex BLAKE3 of the content.
    pub checksum: String,
}

/// Object-storage client.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the container if it does not exist.
    async fn ensure_container(&self, container: &str) -> VfsResult<()>;

    // ========================================================================
    // Multipart upload
    // ========================================================================

    /// Start an upload session; returns its id.
    async fn create_upload(&self, container: &str, key: &str) -> VfsResult<String>;

    async fn append(&self, upload_id: &str, chunk: &[u8]) -> VfsResult<()>;

    /// Publish the session's bytes, replacing any object at the same key.
    async fn complete(&self, upload_id: &str) -> VfsResult<ObjectInfo>;

    async fn abort(&self, upload_id: &str) -> VfsResult<()>;

    // ========================================================================
    // Objects
    // ========================================================================

    async fn get(&self, container: &str, key: &str) -> VfsResult<ContentReader>;

    async fn head(&self, container: &str, key: &str) -> VfsResult<Option<ObjectInfo>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, container: &str, key: &str) -> VfsResult<()>;

    async fn copy(&self, container: &str, from: &str, to: &str) -> VfsResult<()>;

    /// Up to `limit` objects whose key starts with `prefix` and sorts
    /// strictly after `after`, ordered by key.
    async fn list(
        &self,
        container: &str,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> VfsResult<Vec<ObjectInfo>>;
}

#[derive(Debug, Clone)]
struct Blob {
    data: Vec<u8>,
    checksum: String,
}

impl Blob {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            checksum: self.checksum.clone(),
        }
    }
}

#[derive(Debug)]
struct Upload {
    container: String,
    key: String,
    data: Vec<u8>,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    containers: RwLock<HashMap<String, BTreeMap<String, Blob>>>,
    uploads: DashMap<String, Upload>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upload sessions neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    fn missing_container(container: &str) -> VfsError {
        VfsError::unavailable("object store", format!("no such container: {container}"))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_container(&self, container: &str) -> VfsResult<()> {
        self.containers
            .write()
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn create_upload(&self, container: &str, key: &str) -> VfsResult<String> {
        if !self.containers.read().contains_key(container) {
            return Err(Self::missing_container(container));
        }
        let id = uuid::Uuid::new_v4().as_simple().to_string();
        self.uploads.insert(
            id.clone(),
            Upload {
                container: container.to_string(),
                key: key.to_string(),
                data: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn append(&self, upload_id: &str, chunk: &[u8]) -> VfsResult<()> {
        let mut upload = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| VfsError::not_found(format!("upload {upload_id}")))?;
        upload.data.extend_from_slice(chunk);
        Ok(())
    }

    async fn complete(&self, upload_id: &str) -> VfsResult<ObjectInfo> {
        let (_, upload) = self
            .uploads
            .remove(upload_id)
            .ok_or_else(|| VfsError::not_found(format!("upload {upload_id}")))?;
        let blob = Blob {
            checksum: blake3::hash(&upload.data).to_hex().to_string(),
            data: upload.data,
        };
        let info = blob.info(&upload.key);
        let mut containers = self.containers.write();
        let objects = containers
            .get_mut(&upload.container)
            .ok_or_else(|| Self::missing_container(&upload.container))?;
        objects.insert(upload.key, blob);
        Ok(info)
    }

    async fn abort(&self, upload_id: &str) -> VfsResult<()> {
        self.uploads.remove(upload_id);
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> VfsResult<ContentReader> {
        let containers = self.containers.read();
        let blob = containers
            .get(container)
            .and_then(|c| c.get(key))
            .ok_or_else(|| VfsError::not_found(format!("{container}/{key}")))?;
        Ok(Box::new(std::io::Cursor::new(blob.data.clone())))
    }

    async fn head(&self, container: &str, key: &str) -> VfsResult<Option<ObjectInfo>> {
        let containers = self.containers.read();
        Ok(containers
            .get(container)
            .and_then(|c| c.get(key))
            .map(|b| b.info(key)))
    }

    async fn delete(&self, container: &str, key: &str) -> VfsResult<()> {
        if let Some(objects) = self.containers.write().get_mut(container) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn copy(&self, container: &str, from: &str, to: &str) -> VfsResult<()> {
        let mut containers = self.containers.write();
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| Self::missing_container(container))?;
        let blob = objects
            .get(from)
            .cloned()
            .ok_or_else(|| VfsError::not_found(format!("{container}/{from}")))?;
        objects.insert(to.to_string(), blob);
        Ok(())
    }

    async fn list(
        &self,
        container: &str,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> VfsResult<Vec<ObjectInfo>> {
        let containers = self.containers.read();
        let Some(objects) = containers.get(container) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Included(prefix),
        };
        Ok(objects
            .range::<str, _>((lower, Bound::Unbounded))
            .skip_while(|(k, _)| !k.starts_with(prefix) && k.as_str() < prefix)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, b)| b.info(k))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_upload_session_visibility() {
        let store = MemoryObjectStore::new();
        assert!(store.create_upload("c", "k").await.is_err());
        store.ensure_container("c").await.unwrap();

        let id = store.create_upload("c", "k").await.unwrap();
        store.append(&id, b"abc").await.unwrap();
        assert!(store.head("c", "k").await.unwrap().is_none());
        assert_eq!(store.pending_uploads(), 1);

        let info = store.complete(&id).await.unwrap();
        assert_eq!(info.size, 3);
        assert_eq!(store.pending_uploads(), 0);

        let mut out = Vec::new();
        store
            .get("c", "k")
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn test_copy_list_delete() {
        let store = MemoryObjectStore::new();
        store.ensure_container("c").await.unwrap();
        let id = store.create_upload("c", "a/1").await.unwrap();
        store.append(&id, b"x").await.unwrap();
        store.complete(&id).await.unwrap();

        store.copy("c", "a/1", "b/1").await.unwrap();
        let keys: Vec<_> = store
            .list("c", "", None, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a/1", "b/1"]);
        assert_eq!(store.list("c", "b/", None, 10).await.unwrap().len(), 1);
        let page = store.list("c", "", Some("a/1"), 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "b/1");
        assert_eq!(store.list("c", "", None, 1).await.unwrap()[0].key, "a/1");

        store.delete("c", "a/1").await.unwrap();
        store.delete("c", "a/1").await.unwrap();
        assert!(store.get("c", "a/1").await.is_err());
    }
}

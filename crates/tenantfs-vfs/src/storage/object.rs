//! Object-storage backend.
//!
//! One container per tenant. The object key depends on the tenant's layout:
//!
//! | layout      | container          | key                          |
//! |-------------|--------------------|------------------------------|
//! | `object_v1` | `data-<domain>`    | `<id>`                       |
//! | `object_v2` | `data-v2-<domain>` | `<id>/<version>`             |
//! | `object_v3` | `data-v3-<domain>` | `<yyyy>/<mm>/<id>/<version>` |
//!
//! Versioned layouts write every new content under a fresh version, so an
//! overwrite never clobbers the object a committed document points at. On
//! `object_v1` the engine publishes an overwrite only after the metadata
//! update succeeded.

use async_trait::async_trait;
use chrono::Datelike;
use std::sync::Arc;
use tracing::debug;

use super::{
    ContentReader, ContentWriter, ObjectInfo, ObjectStore, StorageBackend, StorageLayout, StoredObject,
    random_version,
};
use crate::error::{ResultExt, VfsResult};
use crate::model::FileDoc;

/// Object-storage backend for one tenant.
pub struct ObjectBackend {
    store: Arc<dyn ObjectStore>,
    container: String,
    layout: StorageLayout,
    max_file_size: Option<u64>,
}

impl std::fmt::Debug for ObjectBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBackend")
            .field("container", &self.container)
            .field("layout", &self.layout)
            .finish()
    }
}

impl ObjectBackend {
    /// `layout` must be one of the object layouts; anything else is
    /// treated as `object_v1`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        domain: &str,
        layout: StorageLayout,
        max_file_size: Option<u64>,
    ) -> Self {
        let (layout, container) = match layout {
            StorageLayout::ObjectV2 => (layout, format!("data-v2-{domain}")),
            StorageLayout::ObjectV3 => (layout, format!("data-v3-{domain}")),
            _ => (StorageLayout::ObjectV1, format!("data-{domain}")),
        };
        Self {
            store,
            container,
            layout,
            max_file_size,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Recover (doc id, version) from a key of this layout.
    fn parse_key(&self, key: &str) -> (Option<String>, Option<String>) {
        let parts: Vec<&str> = key.split('/').collect();
        match (self.layout, parts.as_slice()) {
            (StorageLayout::ObjectV1, [id]) => (Some(id.to_string()), None),
            (StorageLayout::ObjectV2, [id, version]) => {
                (Some(id.to_string()), Some(version.to_string()))
            }
            (StorageLayout::ObjectV3, [_, _, id, version]) => {
                (Some(id.to_string()), Some(version.to_string()))
            }
            _ => (None, None),
        }
    }

    fn stored(&self, info: ObjectInfo) -> StoredObject {
        let (doc_id, version) = self.parse_key(&info.key);
        StoredObject {
            key: info.key,
            doc_id,
            version,
            size: info.size,
            checksum: info.checksum,
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectBackend {
    fn layout(&self) -> StorageLayout {
        self.layout
    }

    fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    fn next_version(&self) -> Option<String> {
        if !self.layout.is_versioned() {
            return None;
        }
        Some(random_version())
    }

    fn object_key(&self, doc: &FileDoc) -> String {
        let version = doc.internal_version.as_deref().unwrap_or("0");
        match self.layout {
            StorageLayout::ObjectV2 => format!("{}/{}", doc.id, version),
            StorageLayout::ObjectV3 => format!(
                "{:04}/{:02}/{}/{}",
                doc.created_at.year(),
                doc.created_at.month(),
                doc.id,
                version
            ),
            _ => doc.id.clone(),
        }
    }

    async fn init(&self) -> VfsResult<()> {
        self.store.ensure_container(&self.container).await
    }

    async fn open(&self, doc: &FileDoc) -> VfsResult<ContentReader> {
        self.store
            .get(&self.container, &self.object_key(doc))
            .await
            .context(|| format!("opening content of {}", doc.fullpath))
    }

    async fn create(&self, doc: &FileDoc) -> VfsResult<Box<dyn ContentWriter>> {
        let key = self.object_key(doc);
        let upload_id = self.store.create_upload(&self.container, &key).await?;
        debug!(container = %self.container, %key, "upload started");
        Ok(Box::new(ObjectWriter {
            store: self.store.clone(),
            upload_id,
        }))
    }

    async fn remove(&self, doc: &FileDoc) -> VfsResult<()> {
        self.store
            .delete(&self.container, &self.object_key(doc))
            .await
    }

    async fn copy(&self, src: &FileDoc, dst: &FileDoc) -> VfsResult<()> {
        self.store
            .copy(&self.container, &self.object_key(src), &self.object_key(dst))
            .await
            .context(|| format!("copying content of {}", src.fullpath))
    }

    async fn stat(&self, doc: &FileDoc) -> VfsResult<Option<StoredObject>> {
        let key = self.object_key(doc);
        let info = self.store.head(&self.container, &key).await?;
        Ok(info.map(|info| self.stored(info)))
    }

    async fn list_objects_page(&self, after: Option<&str>, limit: usize) -> VfsResult<Vec<StoredObject>> {
        let listed = self.store.list(&self.container, "", after, limit).await?;
        Ok(listed.into_iter().map(|info| self.stored(info)).collect())
    }
}

struct ObjectWriter {
    store: Arc<dyn ObjectStore>,
    upload_id: String,
}

#[async_trait]
impl ContentWriter for ObjectWriter {
    async fn write(&mut self, buf: &[u8]) -> VfsResult<()> {
        self.store.append(&self.upload_id, buf).await
    }

    async fn commit(self: Box<Self>) -> VfsResult<()> {
        let info = self.store.complete(&self.upload_id).await?;
        debug!(key = %info.key, size = info.size, "upload completed");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> VfsResult<()> {
        self.store.abort(&self.upload_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ROOT_DIR_ID;
    use crate::storage::MemoryObjectStore;
    use chrono::TimeZone;

    fn doc(backend: &ObjectBackend) -> FileDoc {
        let mut d = FileDoc::new("a.txt", ROOT_DIR_ID)
            .unwrap()
            .with_created_at(chrono::Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap());
        d.id = "f1".into();
        d.internal_version = backend.next_version();
        d
    }

    #[test]
    fn test_keys_per_layout() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let v1 = ObjectBackend::new(store.clone(), "alice.example", StorageLayout::ObjectV1, None);
        let d = doc(&v1);
        assert!(d.internal_version.is_none());
        assert_eq!(v1.object_key(&d), "f1");
        assert_eq!(v1.container(), "data-alice.example");

        let v2 = ObjectBackend::new(store.clone(), "alice.example", StorageLayout::ObjectV2, None);
        let d = doc(&v2);
        let version = d.internal_version.clone().unwrap();
        assert_eq!(version.len(), 16);
        assert_eq!(v2.object_key(&d), format!("f1/{version}"));
        assert_eq!(v2.parse_key(&v2.object_key(&d)), (Some("f1".into()), Some(version.clone())));

        let v3 = ObjectBackend::new(store, "alice.example", StorageLayout::ObjectV3, None);
        let d = doc(&v3);
        let version = d.internal_version.clone().unwrap();
        assert_eq!(v3.object_key(&d), format!("2024/03/f1/{version}"));
        assert_eq!(v3.parse_key(&v3.object_key(&d)).0.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn test_versioned_overwrite_keeps_old_object() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let backend = ObjectBackend::new(store, "alice.example", StorageLayout::ObjectV2, None);
        backend.init().await.unwrap();

        let old = doc(&backend);
        let mut w = backend.create(&old).await.unwrap();
        w.write(b"old").await.unwrap();
        w.commit().await.unwrap();

        let mut new = old.clone();
        new.internal_version = backend.next_version();
        let mut w = backend.create(&new).await.unwrap();
        w.write(b"newer").await.unwrap();
        w.commit().await.unwrap();

        assert_eq!(backend.list_objects().await.unwrap().len(), 2);
        backend.remove_superseded(&old, &new).await.unwrap();
        let objects = backend.list_objects().await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].size, 5);
        assert_eq!(objects[0].version, new.internal_version);
    }
}

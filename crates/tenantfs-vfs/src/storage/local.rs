//! Local filesystem backend.
//!
//! Content of tenant `domain` lives under `<root>/<domain>/`, one file per
//! content version, sharded by the first two characters of the id:
//!
//! ```text
//! <root>/<domain>/01/0192f3c4.../9c1e0a7b5d3f2e11
//! <root>/<domain>/.uploads/<upload id>     (in-flight writes)
//! ```
//!
//! Writes go to `.uploads/` and are published with an atomic rename. Every
//! upload gets a fresh version, so an overwrite never replaces the bytes a
//! committed document points at.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{
    ContentReader, ContentWriter, StagedUpload, StorageBackend, StorageLayout, StoredObject,
    hash_reader, list_files_page, random_version,
};
use crate::error::{ResultExt, VfsError, VfsResult};
use crate::model::FileDoc;

const UPLOADS_DIR: &str = ".uploads";

/// Local filesystem backend for one tenant.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    max_file_size: Option<u64>,
}

impl LocalBackend {
    /// Create a backend for `domain` under `base`.
    pub fn new(base: impl AsRef<Path>, domain: &str, max_file_size: Option<u64>) -> Self {
        Self {
            root: base.as_ref().join(domain),
            max_file_size,
        }
    }

    /// The tenant's content directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn shard(id: &str) -> &str {
        match id.get(..2) {
            Some(shard) if id.len() > 2 => shard,
            _ => "_",
        }
    }

    /// Recover (doc id, version) from a key.
    fn parse_key(key: &str) -> (Option<String>, Option<String>) {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [_, id] => (Some(id.to_string()), None),
            [_, id, version] => (Some(id.to_string()), Some(version.to_string())),
            _ => (None, None),
        }
    }

    async fn stat_path(key: String, path: &Path) -> VfsResult<Option<StoredObject>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (size, checksum) = hash_reader(file).await?;
        let (doc_id, version) = Self::parse_key(&key);
        Ok(Some(StoredObject {
            key,
            doc_id,
            version,
            size,
            checksum,
        }))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn layout(&self) -> StorageLayout {
        StorageLayout::Local
    }

    fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    fn next_version(&self) -> Option<String> {
        Some(random_version())
    }

    fn object_key(&self, doc: &FileDoc) -> String {
        let shard = Self::shard(&doc.id);
        match &doc.internal_version {
            Some(version) => format!("{shard}/{}/{version}", doc.id),
            None => format!("{shard}/{}", doc.id),
        }
    }

    async fn init(&self) -> VfsResult<()> {
        fs::create_dir_all(self.root.join(UPLOADS_DIR))
            .await
            .map_err(|e| VfsError::unavailable("local storage", e))?;
        Ok(())
    }

    async fn open(&self, doc: &FileDoc) -> VfsResult<ContentReader> {
        let path = self.object_path(&self.object_key(doc));
        let file = fs::File::open(&path)
            .await
            .map_err(VfsError::from)
            .context(|| format!("opening content of {}", doc.fullpath))?;
        Ok(Box::new(file))
    }

    async fn create(&self, doc: &FileDoc) -> VfsResult<Box<dyn ContentWriter>> {
        let staging = self
            .root
            .join(UPLOADS_DIR)
            .join(uuid::Uuid::new_v4().as_simple().to_string());
        let file = fs::File::create(&staging)
            .await
            .map_err(|e| VfsError::unavailable("local storage", e))?;
        Ok(Box::new(LocalWriter {
            file,
            staging,
            target: self.object_path(&self.object_key(doc)),
        }))
    }

    async fn remove(&self, doc: &FileDoc) -> VfsResult<()> {
        let path = self.object_path(&self.object_key(doc));
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "content already gone");
            }
            Err(e) => return Err(VfsError::from(e).context(format!("removing {}", path.display()))),
        }
        if doc.internal_version.is_some() {
            if let Some(versions) = path.parent() {
                // Fails while other versions remain.
                let _ = fs::remove_dir(versions).await;
            }
        }
        Ok(())
    }

    async fn copy(&self, src: &FileDoc, dst: &FileDoc) -> VfsResult<()> {
        let from = self.object_path(&self.object_key(src));
        let to = self.object_path(&self.object_key(dst));
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&from, &to)
            .await
            .map_err(VfsError::from)
            .context(|| format!("copying content of {}", src.fullpath))?;
        Ok(())
    }

    async fn stat(&self, doc: &FileDoc) -> VfsResult<Option<StoredObject>> {
        let key = self.object_key(doc);
        let path = self.object_path(&key);
        Self::stat_path(key, &path).await
    }

    async fn list_objects_page(&self, after: Option<&str>, limit: usize) -> VfsResult<Vec<StoredObject>> {
        let files = list_files_page(&self.root, &[UPLOADS_DIR], "", after, limit).await?;
        let mut objects = Vec::with_capacity(files.len());
        for file in files {
            if let Some(obj) = Self::stat_path(file.key, &file.path).await? {
                objects.push(obj);
            }
        }
        Ok(objects)
    }

    async fn list_staged(&self) -> VfsResult<Vec<StagedUpload>> {
        let mut staged = Vec::new();
        let mut entries = match fs::read_dir(self.root.join(UPLOADS_DIR)).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(staged),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            staged.push(StagedUpload {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
            });
        }
        staged.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(staged)
    }
}

struct LocalWriter {
    file: fs::File,
    staging: PathBuf,
    target: PathBuf,
}

#[async_trait]
impl ContentWriter for LocalWriter {
    async fn write(&mut self, buf: &[u8]) -> VfsResult<()> {
        self.file.write_all(buf).await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> VfsResult<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&self.staging, &self.target).await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> VfsResult<()> {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.staging).await {
            warn!(path = %self.staging.display(), error = %e, "failed to discard upload");
        }
        Ok(())
    }
}

//! Object store emulated on a local directory.
//!
//! Containers are subdirectories of the root and keys are relative paths
//! inside them. Upload sessions are staged in `<root>/.sessions/` and moved
//! into place on completion. Lets operators run object-layout tenants
//! without a remote service.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{ContentReader, ObjectInfo, ObjectStore, hash_reader, list_files_page};
use crate::error::{VfsError, VfsResult};

const SESSIONS_DIR: &str = ".sessions";

#[derive(Debug)]
struct Session {
    staging: PathBuf,
    target: PathBuf,
    key: String,
}

/// Object store backed by a local directory.
#[derive(Debug)]
pub struct DirObjectStore {
    root: PathBuf,
    sessions: DashMap<String, Session>,
}

impl DirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: DashMap::new(),
        }
    }

    fn container_dir(&self, container: &str) -> VfsResult<PathBuf> {
        if container.is_empty() || container.starts_with('.') || container.contains('/') {
            return Err(VfsError::invalid_name(container));
        }
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, key: &str) -> VfsResult<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(VfsError::invalid_name(key));
        }
        Ok(self.container_dir(container)?.join(rel))
    }

    async fn info_at(key: String, path: &Path) -> VfsResult<Option<ObjectInfo>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (size, checksum) = hash_reader(file).await?;
        Ok(Some(ObjectInfo {
            key,
            size,
            checksum,
        }))
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn ensure_container(&self, container: &str) -> VfsResult<()> {
        fs::create_dir_all(self.container_dir(container)?)
            .await
            .map_err(|e| VfsError::unavailable("object store", e))?;
        fs::create_dir_all(self.root.join(SESSIONS_DIR))
            .await
            .map_err(|e| VfsError::unavailable("object store", e))?;
        Ok(())
    }

    async fn create_upload(&self, container: &str, key: &str) -> VfsResult<String> {
        let target = self.object_path(container, key)?;
        let id = uuid::Uuid::new_v4().as_simple().to_string();
        let staging = self.root.join(SESSIONS_DIR).join(&id);
        fs::File::create(&staging)
            .await
            .map_err(|e| VfsError::unavailable("object store", e))?;
        self.sessions.insert(
            id.clone(),
            Session {
                staging,
                target,
                key: key.to_string(),
            },
        );
        Ok(id)
    }

    async fn append(&self, upload_id: &str, chunk: &[u8]) -> VfsResult<()> {
        let staging = self
            .sessions
            .get(upload_id)
            .map(|s| s.staging.clone())
            .ok_or_else(|| VfsError::not_found(format!("upload {upload_id}")))?;
        let mut file = fs::OpenOptions::new().append(true).open(&staging).await?;
        file.write_all(chunk).await?;
        file.flush().await?;
        Ok(())
    }

    async fn complete(&self, upload_id: &str) -> VfsResult<ObjectInfo> {
        let (_, session) = self
            .sessions
            .remove(upload_id)
            .ok_or_else(|| VfsError::not_found(format!("upload {upload_id}")))?;
        if let Some(parent) = session.target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&session.staging, &session.target).await?;
        Self::info_at(session.key.clone(), &session.target)
            .await?
            .ok_or_else(|| VfsError::not_found(session.key))
    }

    async fn abort(&self, upload_id: &str) -> VfsResult<()> {
        if let Some((_, session)) = self.sessions.remove(upload_id) {
            match fs::remove_file(&session.staging).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> VfsResult<ContentReader> {
        let file = fs::File::open(self.object_path(container, key)?).await?;
        Ok(Box::new(file))
    }

    async fn head(&self, container: &str, key: &str) -> VfsResult<Option<ObjectInfo>> {
        Self::info_at(key.to_string(), &self.object_path(container, key)?).await
    }

    async fn delete(&self, container: &str, key: &str) -> VfsResult<()> {
        match fs::remove_file(self.object_path(container, key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(&self, container: &str, from: &str, to: &str) -> VfsResult<()> {
        let target = self.object_path(container, to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(self.object_path(container, from)?, target).await?;
        Ok(())
    }

    async fn list(
        &self,
        container: &str,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> VfsResult<Vec<ObjectInfo>> {
        let base = self.container_dir(container)?;
        let files = list_files_page(&base, &[], prefix, after, limit).await?;
        let mut found = Vec::with_capacity(files.len());
        for file in files {
            if let Some(info) = Self::info_at(file.key, &file.path).await? {
                found.push(info);
            }
        }
        Ok(found)
    }
}

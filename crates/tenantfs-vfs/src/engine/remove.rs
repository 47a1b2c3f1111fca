use tracing::{debug, info};

use super::Vfs;
use crate::constants::TRASH_DIR_ID;
use crate::error::{ResultExt, VfsError, VfsResult};
use crate::model::name::parent_path;
use crate::model::{DirDoc, DirOrFile, DocPatch, FileDoc};

/// How a removal treats its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoveMode {
    /// Move into the trash; can be restored.
    #[default]
    Trash,
    /// Destroy metadata and content. Cannot be undone.
    EnsureErased,
}

impl Vfs {
    /// Remove one file or one empty directory.
    ///
    /// Anything already in the trash is erased.
    pub async fn remove(&self, path: &str, mode: RemoveMode) -> VfsResult<()> {
        if !path.starts_with('/') {
            return Err(VfsError::NonAbsolutePath(path.to_string()));
        }
        let _guard = self.write_lock().await?;
        match self.index().dir_or_file_by_path(path).await? {
            DirOrFile::File(file) => self.remove_file_locked(file, mode).await,
            DirOrFile::Directory(dir) => {
                Self::check_removable(&dir)?;
                if !self.index().children(&dir.id, 0, 1).await?.is_empty() {
                    return Err(VfsError::directory_not_empty(dir.fullpath));
                }
                self.remove_dir_locked(dir, mode).await
            }
        }
    }

    /// Remove a file or a whole directory subtree.
    pub async fn remove_all(&self, path: &str, mode: RemoveMode) -> VfsResult<()> {
        if !path.starts_with('/') {
            return Err(VfsError::NonAbsolutePath(path.to_string()));
        }
        let _guard = self.write_lock().await?;
        match self.index().dir_or_file_by_path(path).await? {
            DirOrFile::File(file) => self.remove_file_locked(file, mode).await,
            DirOrFile::Directory(dir) => {
                Self::check_removable(&dir)?;
                self.remove_dir_locked(dir, mode).await
            }
        }
    }

    fn check_removable(dir: &DirDoc) -> VfsResult<()> {
        if dir.is_root() || dir.is_trash() {
            return Err(VfsError::forbidden_move(format!("{} cannot be removed", dir.fullpath)));
        }
        Ok(())
    }

    async fn remove_file_locked(&self, file: FileDoc, mode: RemoveMode) -> VfsResult<()> {
        if mode == RemoveMode::EnsureErased || file.trashed {
            self.destroy_file_locked(&file).await
        } else {
            self.trash_file_locked(&file).await.map(|_| ())
        }
    }

    async fn remove_dir_locked(&self, dir: DirDoc, mode: RemoveMode) -> VfsResult<()> {
        if mode == RemoveMode::EnsureErased || dir.is_in_trash() {
            self.destroy_dir_and_content_locked(&dir).await
        } else {
            self.trash_dir_locked(&dir).await.map(|_| ())
        }
    }

    // ========================================================================
    // Trash
    // ========================================================================

    /// Move a file into the trash, remembering where it came from.
    pub async fn trash_file(&self, file: &FileDoc) -> VfsResult<FileDoc> {
        let _guard = self.write_lock().await?;
        self.trash_file_locked(file).await
    }

    /// Move a directory and its subtree into the trash.
    pub async fn trash_dir(&self, dir: &DirDoc) -> VfsResult<DirDoc> {
        let _guard = self.write_lock().await?;
        Self::check_removable(dir)?;
        self.trash_dir_locked(dir).await
    }

    async fn trash_file_locked(&self, file: &FileDoc) -> VfsResult<FileDoc> {
        if file.trashed {
            return Err(VfsError::forbidden_move(format!("{} is already in the trash", file.fullpath)));
        }
        let name = self.trash_name(&file.name, true).await?;
        let patch = DocPatch {
            restore_path: Some(Some(parent_path(&file.fullpath).to_string())),
            ..DocPatch::new().with_name(name).with_dir_id(TRASH_DIR_ID)
        };
        let trashed = self.modify_file_locked(file, patch).await?;
        debug!(from = %file.fullpath, to = %trashed.fullpath, "file trashed");
        Ok(trashed)
    }

    async fn trash_dir_locked(&self, dir: &DirDoc) -> VfsResult<DirDoc> {
        if dir.is_in_trash() {
            return Err(VfsError::forbidden_move(format!("{} is already in the trash", dir.fullpath)));
        }
        let name = self.trash_name(&dir.name, false).await?;
        let patch = DocPatch {
            restore_path: Some(Some(parent_path(&dir.fullpath).to_string())),
            ..DocPatch::new().with_name(name).with_dir_id(TRASH_DIR_ID)
        };
        let trashed = self.modify_dir_locked(dir, patch).await?;
        debug!(from = %dir.fullpath, to = %trashed.fullpath, "directory trashed");
        Ok(trashed)
    }

    async fn trash_name(&self, name: &str, is_file: bool) -> VfsResult<String> {
        if self.index().dir_child_exists(TRASH_DIR_ID, name).await? {
            self.conflict_name(TRASH_DIR_ID, name, is_file).await
        } else {
            Ok(name.to_string())
        }
    }

    /// Move a trashed file back to its restore path, recreating missing
    /// directories. A taken name gets a conflict suffix.
    pub async fn restore_file(&self, file: &FileDoc) -> VfsResult<FileDoc> {
        let _guard = self.write_lock().await?;
        if !file.trashed {
            return Err(VfsError::forbidden_move(format!("{} is not in the trash", file.fullpath)));
        }
        let target = self
            .mkdir_all_locked(file.restore_path.as_deref().unwrap_or("/"))
            .await?;
        let name = self.restore_name(&target.id, &file.name, true).await?;
        let patch = DocPatch {
            restore_path: Some(None),
            ..DocPatch::new().with_name(name).with_dir_id(target.id)
        };
        self.modify_file_locked(file, patch).await
    }

    /// Move a trashed directory and its subtree back to its restore path.
    pub async fn restore_dir(&self, dir: &DirDoc) -> VfsResult<DirDoc> {
        let _guard = self.write_lock().await?;
        if !dir.is_in_trash() {
            return Err(VfsError::forbidden_move(format!("{} is not in the trash", dir.fullpath)));
        }
        let target = self
            .mkdir_all_locked(dir.restore_path.as_deref().unwrap_or("/"))
            .await?;
        let name = self.restore_name(&target.id, &dir.name, false).await?;
        let patch = DocPatch {
            restore_path: Some(None),
            ..DocPatch::new().with_name(name).with_dir_id(target.id)
        };
        self.modify_dir_locked(dir, patch).await
    }

    async fn restore_name(&self, dir_id: &str, name: &str, is_file: bool) -> VfsResult<String> {
        if self.index().dir_child_exists(dir_id, name).await? {
            self.conflict_name(dir_id, name, is_file).await
        } else {
            Ok(name.to_string())
        }
    }

    // ========================================================================
    // Erasure
    // ========================================================================

    /// Erase a file: metadata first, then content.
    pub async fn destroy_file(&self, file: &FileDoc) -> VfsResult<()> {
        let _guard = self.write_lock().await?;
        self.destroy_file_locked(file).await
    }

    /// Erase a directory, everything below it, and their content.
    pub async fn destroy_dir_and_content(&self, dir: &DirDoc) -> VfsResult<()> {
        let _guard = self.write_lock().await?;
        Self::check_removable(dir)?;
        self.destroy_dir_and_content_locked(dir).await
    }

    /// Erase everything below a directory, keeping the directory.
    pub async fn destroy_dir_content(&self, dir: &DirDoc) -> VfsResult<()> {
        let _guard = self.write_lock().await?;
        self.destroy_descendants_locked(dir).await
    }

    async fn destroy_file_locked(&self, file: &FileDoc) -> VfsResult<()> {
        self.index()
            .documents()
            .delete(&DirOrFile::from(file.clone()))
            .await
            .context(|| format!("erasing {}", file.fullpath))?;
        self.storage().remove(file).await?;
        debug!(path = %file.fullpath, "file erased");
        Ok(())
    }

    async fn destroy_dir_and_content_locked(&self, dir: &DirDoc) -> VfsResult<()> {
        self.destroy_descendants_locked(dir).await?;
        self.index()
            .documents()
            .delete(&DirOrFile::from(dir.clone()))
            .await
            .context(|| format!("erasing {}", dir.fullpath))?;
        info!(path = %dir.fullpath, "directory erased");
        Ok(())
    }

    /// The subtree is listed before anything changes, then erased deepest
    /// first so no document is ever left without its parent.
    async fn destroy_descendants_locked(&self, dir: &DirDoc) -> VfsResult<()> {
        let mut subtree = self.index().descendants(dir).await?;
        if dir.is_root() {
            subtree.retain(|d| d.id() != TRASH_DIR_ID);
        }
        subtree.sort_by_key(|d| std::cmp::Reverse(d.fullpath().matches('/').count()));
        for doc in subtree {
            match doc {
                DirOrFile::File(f) => self.destroy_file_locked(&f).await?,
                DirOrFile::Directory(d) => {
                    self.index()
                        .documents()
                        .delete(&DirOrFile::from(d.clone()))
                        .await
                        .context(|| format!("erasing {}", d.fullpath))?;
                }
            }
        }
        Ok(())
    }
}

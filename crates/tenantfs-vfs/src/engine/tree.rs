use chrono::Utc;
use tracing::{debug, error};

use super::Vfs;
use crate::constants::{CONFLICT_NAME_ATTEMPTS, ROOT_DIR_ID, TRASH_DIR_PATH};
use crate::error::{ResultExt, VfsError, VfsResult};
use crate::index::new_doc_id;
use crate::model::name::{
    ConflictSeed, base_name, check_name, clean_path, join_path, parent_path, split_ext,
};
use crate::model::{DirDoc, DirOrFile, DocPatch, FileDoc, mime_and_class_from_filename};

/// Returns true for the trash directory and everything below it.
pub(crate) fn is_trash_path(path: &str) -> bool {
    path == TRASH_DIR_PATH
        || path
            .strip_prefix(TRASH_DIR_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl Vfs {
    // ========================================================================
    // Directory creation
    // ========================================================================

    /// Create a directory under `doc.dir_id`.
    pub async fn create_dir(&self, doc: DirDoc) -> VfsResult<DirDoc> {
        let _guard = self.write_lock().await?;
        self.create_dir_locked(doc).await
    }

    pub(crate) async fn create_dir_locked(&self, mut doc: DirDoc) -> VfsResult<DirDoc> {
        check_name(&doc.name)?;
        let parent = self.index().dir_by_id(&doc.dir_id).await?;
        doc.fullpath = join_path(&parent.fullpath, &doc.name);
        if self.index().dir_child_exists(&parent.id, &doc.name).await? {
            return Err(VfsError::already_exists(doc.fullpath));
        }
        let path = doc.fullpath.clone();
        let mut stored = DirOrFile::from(doc);
        self.index()
            .documents()
            .create(&mut stored)
            .await
            .context(|| format!("creating {path}"))?;
        debug!(%path, id = %stored.id(), "directory created");
        stored
            .into_dir()
            .ok_or_else(|| VfsError::other("create changed the document kind"))
    }

    /// Create the directory at `path`; its parent must exist.
    pub async fn mkdir(&self, path: &str, tags: Vec<String>) -> VfsResult<DirDoc> {
        let path = clean_path(path).ok_or_else(|| VfsError::NonAbsolutePath(path.to_string()))?;
        if path == "/" {
            return Err(VfsError::already_exists("/"));
        }
        let _guard = self.write_lock().await?;
        let parent = self.index().dir_by_path(parent_path(&path)).await?;
        let doc = DirDoc::new(base_name(&path), parent.id)?.with_tags(tags);
        self.create_dir_locked(doc).await
    }

    /// Create the directory at `path` and any missing ancestors.
    pub async fn mkdir_all(&self, path: &str) -> VfsResult<DirDoc> {
        let _guard = self.write_lock().await?;
        self.mkdir_all_locked(path).await
    }

    pub(crate) async fn mkdir_all_locked(&self, path: &str) -> VfsResult<DirDoc> {
        let path = clean_path(path).ok_or_else(|| VfsError::NonAbsolutePath(path.to_string()))?;
        let mut current = self.index().dir_by_id(ROOT_DIR_ID).await?;
        if path == "/" {
            return Ok(current);
        }
        for segment in path[1..].split('/') {
            current = match self.index().child_by_name(&current.id, segment).await? {
                Some(DirOrFile::Directory(d)) => d,
                Some(DirOrFile::File(f)) => return Err(VfsError::not_a_directory(f.fullpath)),
                None => {
                    self.create_dir_locked(DirDoc::new(segment, current.id.clone())?)
                        .await?
                }
            };
        }
        Ok(current)
    }

    // ========================================================================
    // Metadata patches
    // ========================================================================

    /// Rename, move or retag a directory, cascading the new full path to
    /// every descendant in one bulk update.
    pub async fn modify_dir_metadata(&self, dir: &DirDoc, patch: DocPatch) -> VfsResult<DirDoc> {
        let _guard = self.write_lock().await?;
        self.modify_dir_locked(dir, patch).await
    }

    pub(crate) async fn modify_dir_locked(&self, dir: &DirDoc, patch: DocPatch) -> VfsResult<DirDoc> {
        if dir.is_root() || dir.is_trash() {
            return Err(VfsError::forbidden_move(format!(
                "{} cannot be modified",
                dir.fullpath
            )));
        }
        let name = patch.name.clone().unwrap_or_else(|| dir.name.clone());
        check_name(&name)?;
        let dir_id = patch.dir_id.clone().unwrap_or_else(|| dir.dir_id.clone());
        let parent = self.index().dir_by_id(&dir_id).await?;
        if parent.id == dir.id || parent.fullpath.starts_with(&format!("{}/", dir.fullpath)) {
            return Err(VfsError::forbidden_move(format!(
                "{} cannot be moved inside itself",
                dir.fullpath
            )));
        }
        if name != dir.name || dir_id != dir.dir_id {
            self.ensure_free_name(&parent.id, &name, &dir.id).await?;
        }

        let old_path = dir.fullpath.clone();
        let mut updated = dir.clone();
        updated.fullpath = join_path(&parent.fullpath, &name);
        updated.name = name;
        updated.dir_id = dir_id;
        updated.updated_at = patch.updated_at.unwrap_or_else(Utc::now);
        if let Some(tags) = patch.tags {
            updated.tags = tags;
        }
        if let Some(restore_path) = patch.restore_path {
            updated.restore_path = restore_path;
        }

        let mut batch = vec![DirOrFile::from(updated)];
        if old_path != batch[0].fullpath() {
            let new_path = batch[0].fullpath().to_string();
            let trashed = is_trash_path(&new_path);
            for mut child in self.index().descendants(dir).await? {
                let rebased = format!("{}{}", new_path, &child.fullpath()[old_path.len()..]);
                match &mut child {
                    DirOrFile::Directory(d) => d.fullpath = rebased,
                    DirOrFile::File(f) => {
                        f.fullpath = rebased;
                        f.trashed = trashed;
                    }
                }
                batch.push(child);
            }
        }

        if let Err(e) = self.index().documents().bulk_update(&mut batch).await {
            if batch.len() > 1 && e.kind() != crate::ErrorKind::Conflict {
                error!(
                    from = %old_path,
                    descendants = batch.len() - 1,
                    error = %e,
                    "cascading rename failed, run fsck"
                );
            }
            return Err(e.context(format!("moving {old_path}")));
        }
        debug!(from = %old_path, to = %batch[0].fullpath(), descendants = batch.len() - 1, "directory moved");
        let mut batch = batch.into_iter();
        batch
            .next()
            .and_then(DirOrFile::into_dir)
            .ok_or_else(|| VfsError::other("bulk update lost the directory"))
    }

    /// Rename, move or retag a file.
    ///
    /// A new extension re-derives the MIME type and class.
    pub async fn modify_file_metadata(&self, file: &FileDoc, patch: DocPatch) -> VfsResult<FileDoc> {
        let _guard = self.write_lock().await?;
        self.modify_file_locked(file, patch).await
    }

    pub(crate) async fn modify_file_locked(&self, file: &FileDoc, patch: DocPatch) -> VfsResult<FileDoc> {
        let name = patch.name.clone().unwrap_or_else(|| file.name.clone());
        check_name(&name)?;
        let dir_id = patch.dir_id.clone().unwrap_or_else(|| file.dir_id.clone());
        let parent = self.index().dir_by_id(&dir_id).await?;
        if name != file.name || dir_id != file.dir_id {
            self.ensure_free_name(&parent.id, &name, &file.id).await?;
        }

        let mut updated = file.clone();
        if split_ext(&name).1 != split_ext(&file.name).1 {
            let (mime, class) = mime_and_class_from_filename(&name);
            updated.mime = mime;
            updated.class = class;
        }
        updated.fullpath = join_path(&parent.fullpath, &name);
        updated.trashed = is_trash_path(&updated.fullpath);
        updated.name = name;
        updated.dir_id = dir_id;
        updated.updated_at = patch.updated_at.unwrap_or_else(Utc::now);
        if let Some(tags) = patch.tags {
            updated.tags = tags;
        }
        if let Some(executable) = patch.executable {
            updated.executable = executable;
        }
        if let Some(restore_path) = patch.restore_path {
            updated.restore_path = restore_path;
        }

        let mut stored = DirOrFile::from(updated);
        self.index()
            .documents()
            .update(&mut stored)
            .await
            .context(|| format!("updating {}", file.fullpath))?;
        debug!(from = %file.fullpath, to = %stored.fullpath(), "file updated");
        stored
            .into_file()
            .ok_or_else(|| VfsError::other("update changed the document kind"))
    }

    async fn ensure_free_name(&self, dir_id: &str, name: &str, self_id: &str) -> VfsResult<()> {
        match self.index().child_by_name(dir_id, name).await? {
            Some(other) if other.id() != self_id => {
                Err(VfsError::already_exists(other.fullpath().to_string()))
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Conflict names
    // ========================================================================

    /// Next free variant of `name` in `dir_id`: `x` gives `x (2)`, `x (3)`
    /// gives `x (4)`, `x (copy)` gives `x (copy) (2)`.
    ///
    /// For files the suffix goes before the extension. The lowest free index
    /// is returned; after too many taken slots a unique suffix is used.
    pub async fn conflict_name(&self, dir_id: &str, name: &str, is_file: bool) -> VfsResult<String> {
        let seed = ConflictSeed::parse(name, is_file);
        for index in seed.start..seed.start.saturating_add(CONFLICT_NAME_ATTEMPTS) {
            let candidate = seed.candidate(index);
            if !self.index().dir_child_exists(dir_id, &candidate).await? {
                return Ok(candidate);
            }
        }
        Ok(format!("{} ({}){}", seed.base, new_doc_id(), seed.ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_trash_path() {
        assert!(is_trash_path("/.trash"));
        assert!(is_trash_path("/.trash/a"));
        assert!(!is_trash_path("/.trashcan"));
        assert!(!is_trash_path("/a/.trash"));
    }
}

//! Quota-checked uploads, content access and copies.

use chrono::Utc;
use tracing::{debug, error, warn};

use super::Vfs;
use crate::error::{ResultExt, VfsError, VfsResult};
use crate::model::name::{check_name, join_path};
use crate::model::{DirOrFile, FileDoc};
use crate::storage::{ContentReader, ContentWriter};

impl Vfs {
    /// Start writing a file.
    ///
    /// With `old = None` a new file is created: its name is reserved right
    /// away by a pending document, which only becomes readable once
    /// [`FileHandle::close`] commits the content. With `old = Some(..)` the
    /// content of an existing file is replaced; `newdoc` carries the new
    /// metadata and the old document stays readable until the commit.
    ///
    /// Fails with [`VfsError::FileTooBig`] when the declared size does not fit.
    pub async fn create_file(&self, mut newdoc: FileDoc, old: Option<FileDoc>) -> VfsResult<FileHandle> {
        check_name(&newdoc.name)?;
        let guard = self.write_lock().await?;

        let parent = self.index().dir_by_id(&newdoc.dir_id).await?;
        newdoc.fullpath = join_path(&parent.fullpath, &newdoc.name);
        newdoc.trashed = super::tree::is_trash_path(&newdoc.fullpath);
        newdoc.internal_version = self.storage().next_version();

        match &old {
            None => {
                if self.index().dir_child_exists(&parent.id, &newdoc.name).await? {
                    return Err(VfsError::already_exists(newdoc.fullpath));
                }
            }
            Some(old) => {
                if let Some(other) = self.index().child_by_name(&parent.id, &newdoc.name).await? {
                    if other.id() != old.id {
                        return Err(VfsError::already_exists(newdoc.fullpath));
                    }
                }
                newdoc.id = old.id.clone();
                newdoc.created_at = old.created_at;
            }
        }

        let limit = self.check_available_disk_space(&newdoc, old.as_ref()).await?;

        if old.is_none() {
            newdoc.pending = true;
            let declared_checksum = newdoc.checksum.take();
            let path = newdoc.fullpath.clone();
            let mut reserved = DirOrFile::from(newdoc);
            self.index()
                .documents()
                .create(&mut reserved)
                .await
                .context(|| format!("reserving {path}"))?;
            newdoc = reserved
                .into_file()
                .ok_or_else(|| VfsError::other("create changed the document kind"))?;
            newdoc.checksum = declared_checksum;
        }
        drop(guard);

        let writer = match self.storage().create(&newdoc).await {
            Ok(w) => w,
            Err(e) => {
                if old.is_none() {
                    self.discard_pending(&newdoc, false).await;
                }
                return Err(e.context(format!("opening {} for writing", newdoc.fullpath)));
            }
        };
        debug!(path = %newdoc.fullpath, size = ?newdoc.size, overwrite = old.is_some(), "upload started");

        Ok(FileHandle {
            vfs: self.clone(),
            declared_size: newdoc.size,
            declared_checksum: newdoc.checksum.clone(),
            doc: newdoc,
            is_new: old.is_none(),
            writer: Some(writer),
            hasher: blake3::Hasher::new(),
            written: 0,
            limit,
            too_big: false,
            settled: false,
        })
    }

    /// Open a committed file's content.
    pub async fn open_file(&self, doc: &FileDoc) -> VfsResult<ContentReader> {
        if doc.pending {
            return Err(VfsError::not_found(doc.fullpath.as_str()));
        }
        self.storage().open(doc).await
    }

    /// Copy a file next to itself.
    ///
    /// Without `name`, the next free conflict name of the source is used.
    /// The copy counts against the quota like any upload.
    pub async fn copy_file(&self, src: &FileDoc, name: Option<&str>) -> VfsResult<FileDoc> {
        let _guard = self.write_lock().await?;
        let src = self.index().file_by_id(&src.id).await?;
        if src.pending {
            return Err(VfsError::not_found(src.fullpath));
        }
        let name = match name {
            Some(n) => n.to_string(),
            None => self.conflict_name(&src.dir_id, &src.name, true).await?,
        };
        check_name(&name)?;
        let mut copy = src.copy_as(name);
        copy.trashed = super::tree::is_trash_path(&copy.fullpath);
        if self.index().dir_child_exists(&copy.dir_id, &copy.name).await? {
            return Err(VfsError::already_exists(copy.fullpath));
        }
        self.check_available_disk_space(&copy, None).await?;
        copy.internal_version = self.storage().next_version();
        copy.pending = true;

        let mut stored = DirOrFile::from(copy);
        self.index().documents().create(&mut stored).await?;
        let copy = stored
            .into_file()
            .ok_or_else(|| VfsError::other("create changed the document kind"))?;

        if let Err(e) = self.storage().copy(&src, &copy).await {
            let pending = DirOrFile::from(copy.clone());
            if let Err(rollback) = self.index().documents().delete(&pending).await {
                warn!(path = %copy.fullpath, error = %rollback, "failed to drop pending copy");
            }
            return Err(e);
        }

        let mut committed = copy.clone();
        committed.pending = false;
        let mut stored = DirOrFile::from(committed);
        self.index()
            .documents()
            .update(&mut stored)
            .await
            .context(|| format!("committing copy {}", copy.fullpath))?;
        debug!(from = %src.fullpath, to = %copy.fullpath, "file copied");
        stored
            .into_file()
            .ok_or_else(|| VfsError::other("update changed the document kind"))
    }

    /// Delete `doc` if it is still pending, along with its stored content
    /// when `with_content` is set.
    async fn discard_pending(&self, doc: &FileDoc, with_content: bool) {
        let result = async {
            let _guard = self.write_lock().await?;
            let current = self.index().file_by_id(&doc.id).await?;
            if current.pending {
                if with_content {
                    if let Err(e) = self.storage().remove(doc).await {
                        warn!(path = %doc.fullpath, error = %e, "failed to remove stored content");
                    }
                }
                self.index()
                    .documents()
                    .delete(&DirOrFile::from(current))
                    .await?;
            }
            Ok::<_, VfsError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(path = %doc.fullpath, error = %e, "failed to drop pending document");
        }
    }
}

/// Write handle returned by [`Vfs::create_file`].
///
/// Bytes are streamed without holding the tenant lock. A handle should end
/// with [`FileHandle::close`] or [`FileHandle::abort`]; one dropped before
/// that is rolled back on a background task.
pub struct FileHandle {
    vfs: Vfs,
    doc: FileDoc,
    is_new: bool,
    writer: Option<Box<dyn ContentWriter>>,
    hasher: blake3::Hasher,
    written: u64,
    declared_size: Option<u64>,
    declared_checksum: Option<String>,
    limit: Option<u64>,
    too_big: bool,
    /// Committed or rolled back; nothing left for `Drop` to undo.
    settled: bool,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.doc.fullpath)
            .field("written", &self.written)
            .field("declared_size", &self.declared_size)
            .finish()
    }
}

impl FileHandle {
    /// Document being written.
    pub fn doc(&self) -> &FileDoc {
        &self.doc
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append bytes.
    ///
    /// Going past the declared size or the quota fails with
    /// [`VfsError::FileTooBig`]; the handle is then unusable and `close`
    /// fails the same way.
    pub async fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        if self.too_big {
            return Err(VfsError::FileTooBig);
        }
        let next = self.written + buf.len() as u64;
        let over_declared = self.declared_size.is_some_and(|d| next > d);
        let over_limit = self.limit.is_some_and(|l| next > l);
        if over_declared || over_limit {
            self.too_big = true;
            return Err(VfsError::FileTooBig);
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| VfsError::other("write after close"))?;
        writer.write(buf).await?;
        self.hasher.update(buf);
        self.written = next;
        Ok(buf.len())
    }

    /// Discard everything written and release the reserved name.
    pub async fn abort(mut self) -> VfsResult<()> {
        self.rollback().await;
        Ok(())
    }

    /// Commit the content and return the committed document.
    ///
    /// On any failure nothing is left reachable: the written bytes are
    /// discarded and a new file's pending document is removed.
    pub async fn close(mut self) -> VfsResult<FileDoc> {
        if self.too_big {
            self.rollback().await;
            return Err(VfsError::FileTooBig);
        }
        if let Some(expected) = self.declared_size {
            if expected != self.written {
                self.rollback().await;
                return Err(VfsError::ContentLengthMismatch {
                    expected,
                    actual: self.written,
                });
            }
        }
        let checksum = self.hasher.finalize().to_hex().to_string();
        if let Some(expected) = self.declared_checksum.clone() {
            if expected != checksum {
                self.rollback().await;
                return Err(VfsError::ChecksumMismatch {
                    expected,
                    actual: checksum,
                });
            }
        }

        let vfs = self.vfs.clone();
        let guard = match vfs.write_lock().await {
            Ok(g) => g,
            Err(e) => {
                self.rollback().await;
                return Err(e);
            }
        };
        let current = match vfs.file_by_id(&self.doc.id).await {
            Ok(c) => c,
            Err(e) => {
                drop(guard);
                self.rollback().await;
                return Err(e.context(format!("committing {}", self.doc.fullpath)));
            }
        };

        let mut sized = self.doc.clone();
        sized.size = Some(self.written);
        let old = (!self.is_new).then_some(&current);
        if let Err(e) = vfs.check_available_disk_space(&sized, old).await {
            drop(guard);
            self.rollback().await;
            return Err(e);
        }

        let Some(writer) = self.writer.take() else {
            return Err(VfsError::other("handle already closed"));
        };
        // Unversioned overwrites replace the object the current document
        // points at, so they are published only once the metadata is.
        let deferred = if self.is_new || vfs.storage().layout().is_versioned() {
            if let Err(e) = writer.commit().await {
                drop(guard);
                self.rollback().await;
                return Err(e.context(format!("storing {}", self.doc.fullpath)));
            }
            None
        } else {
            Some(writer)
        };

        // A new file may have been moved while its bytes were streaming.
        let mut committed = if self.is_new {
            let mut moved = current.clone();
            moved.size = sized.size;
            moved.internal_version = sized.internal_version;
            moved
        } else {
            sized
        };
        committed.rev = current.rev;
        committed.checksum = Some(checksum);
        committed.pending = false;
        committed.updated_at = Utc::now();
        let mut stored = DirOrFile::from(committed);
        if let Err(e) = vfs.index().documents().update(&mut stored).await {
            error!(path = %self.doc.fullpath, error = %e, "metadata update failed, discarding upload");
            if let Some(writer) = deferred {
                self.writer = Some(writer);
                self.rollback().await;
            } else if self.is_new {
                drop(guard);
                self.rollback().await;
            } else {
                if vfs.storage().object_key(&current) != vfs.storage().object_key(&self.doc) {
                    if let Err(e) = vfs.storage().remove(&self.doc).await {
                        warn!(path = %self.doc.fullpath, error = %e, "failed to remove unreferenced content");
                    }
                }
                self.settled = true;
            }
            return Err(e.context(format!("committing {}", self.doc.fullpath)));
        }
        self.settled = true;
        let committed = stored
            .into_file()
            .ok_or_else(|| VfsError::other("update changed the document kind"))?;

        if let Some(writer) = deferred {
            if let Err(e) = writer.commit().await {
                let mut previous = current.clone();
                previous.rev = committed.rev.clone();
                let mut previous = DirOrFile::from(previous);
                if let Err(revert) = vfs.index().documents().update(&mut previous).await {
                    error!(
                        path = %committed.fullpath,
                        error = %revert,
                        "metadata updated but content not stored, run fsck"
                    );
                }
                return Err(e.context(format!("storing {}", committed.fullpath)));
            }
        } else if !self.is_new {
            if let Err(e) = vfs.storage().remove_superseded(&current, &committed).await {
                warn!(path = %committed.fullpath, error = %e, "superseded content not removed");
            }
        }
        drop(guard);
        debug!(path = %committed.fullpath, size = self.written, "upload committed");
        Ok(committed)
    }

    async fn rollback(&mut self) {
        self.settled = true;
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.abort().await {
                warn!(path = %self.doc.fullpath, error = %e, "failed to discard upload");
            }
            if self.is_new {
                self.vfs.discard_pending(&self.doc, false).await;
            }
        } else if self.is_new {
            self.vfs.discard_pending(&self.doc, true).await;
        }
        warn!(path = %self.doc.fullpath, written = self.written, "upload rolled back");
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(path = %self.doc.fullpath, "upload handle dropped outside a runtime, run fsck");
            return;
        };
        let writer = self.writer.take();
        let vfs = self.vfs.clone();
        let doc = self.doc.clone();
        let is_new = self.is_new;
        runtime.spawn(async move {
            let stored = writer.is_none();
            if let Some(writer) = writer {
                if let Err(e) = writer.abort().await {
                    warn!(path = %doc.fullpath, error = %e, "failed to discard upload");
                }
            }
            if is_new {
                vfs.discard_pending(&doc, stored).await;
            }
            warn!(path = %doc.fullpath, "upload dropped before close, rolled back");
        });
    }
}

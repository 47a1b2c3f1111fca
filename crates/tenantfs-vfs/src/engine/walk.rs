use super::Vfs;
use crate::error::{VfsError, VfsResult};
use crate::index::{DirIterator, IteratorOptions};
use crate::model::{DirDoc, DirOrFile, FileDoc};

/// What the walk visitor is shown for one path.
#[derive(Debug)]
pub enum WalkEntry<'a> {
    Dir(&'a DirDoc),
    File(&'a FileDoc),
    /// The path could not be resolved or listed. Returning `Ok(())` from
    /// the visitor skips it; returning the error aborts the walk.
    Error(VfsError),
}

impl Vfs {
    /// Depth-first, pre-order traversal from `root` under the read lock.
    ///
    /// Directories are visited before their content; children come
    /// directories first, then files, each by name. The first error the
    /// visitor returns stops the walk and is returned.
    pub async fn walk<F>(&self, root: &str, visitor: F) -> VfsResult<()>
    where
        F: FnMut(&str, WalkEntry<'_>) -> VfsResult<()> + Send,
    {
        let _guard = self.read_lock().await?;
        let mut visitor = visitor;
        match self.index().dir_or_file_by_path(root).await {
            Ok(DirOrFile::Directory(dir)) => self.walk_dir(&dir, &mut visitor).await,
            Ok(DirOrFile::File(file)) => {
                if file.pending {
                    return Ok(());
                }
                visitor(&file.fullpath, WalkEntry::File(&file))
            }
            Err(e) => visitor(root, WalkEntry::Error(e)),
        }
    }

    /// Same traversal as [`Vfs::walk`], for callers that already hold the
    /// tenant's lock. Never touches the locker.
    pub async fn walk_already_locked<F>(&self, dir: &DirDoc, visitor: F) -> VfsResult<()>
    where
        F: FnMut(&str, WalkEntry<'_>) -> VfsResult<()> + Send,
    {
        let mut visitor = visitor;
        self.walk_dir(dir, &mut visitor).await
    }

    async fn walk_dir<F>(&self, dir: &DirDoc, visitor: &mut F) -> VfsResult<()>
    where
        F: FnMut(&str, WalkEntry<'_>) -> VfsResult<()> + Send,
    {
        visitor(&dir.fullpath, WalkEntry::Dir(dir))?;
        let mut stack: Vec<(String, DirIterator)> = vec![(
            dir.fullpath.clone(),
            self.index().dir_iterator(dir, IteratorOptions::default()),
        )];
        while let Some((_, iter)) = stack.last_mut() {
            let next = iter.next().await;
            match next {
                Ok(Some(DirOrFile::Directory(child))) => {
                    visitor(&child.fullpath, WalkEntry::Dir(&child))?;
                    let iter = self.index().dir_iterator(&child, IteratorOptions::default());
                    stack.push((child.fullpath, iter));
                }
                Ok(Some(DirOrFile::File(file))) => {
                    if !file.pending {
                        visitor(&file.fullpath, WalkEntry::File(&file))?;
                    }
                }
                Ok(None) => {
                    stack.pop();
                }
                Err(e) => {
                    if let Some((path, _)) = stack.pop() {
                        visitor(&path, WalkEntry::Error(e))?;
                    }
                }
            }
        }
        Ok(())
    }
}

//! Path resolution and directory iteration over a flat document index.

use std::sync::Arc;

use super::{DocumentIndex, FindRequest, Selector};
use crate::constants::{INDEX_PAGE_SIZE, ROOT_DIR_ID};
use crate::error::{VfsError, VfsResult};
use crate::model::name::{clean_path, normalize};
use crate::model::{DirDoc, DirOrFile, FileDoc};

/// Tree view of a tenant's documents.
///
/// Cheap to clone; all clones share the underlying index.
#[derive(Clone)]
pub struct PathIndex {
    docs: Arc<dyn DocumentIndex>,
}

impl std::fmt::Debug for PathIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathIndex")
            .field("index", &self.docs.name())
            .finish()
    }
}

impl PathIndex {
    pub fn new(docs: Arc<dyn DocumentIndex>) -> Self {
        Self { docs }
    }

    /// The underlying document index.
    pub fn documents(&self) -> &Arc<dyn DocumentIndex> {
        &self.docs
    }

    // ========================================================================
    // By identifier
    // ========================================================================

    pub async fn dir_or_file_by_id(&self, id: &str) -> VfsResult<DirOrFile> {
        self.docs
            .get(id)
            .await?
            .ok_or_else(|| VfsError::not_found(id))
    }

    pub async fn dir_by_id(&self, id: &str) -> VfsResult<DirDoc> {
        match self.dir_or_file_by_id(id).await? {
            DirOrFile::Directory(d) => Ok(d),
            DirOrFile::File(f) => Err(VfsError::not_a_directory(f.fullpath)),
        }
    }

    pub async fn file_by_id(&self, id: &str) -> VfsResult<FileDoc> {
        match self.dir_or_file_by_id(id).await? {
            DirOrFile::File(f) => Ok(f),
            DirOrFile::Directory(_) => Err(VfsError::not_found(format!("file {id}"))),
        }
    }

    // ========================================================================
    // By path
    // ========================================================================

    /// Resolve an absolute path.
    ///
    /// The stored spelling is tried first; when that misses, the tree is
    /// walked segment by segment accepting NFD-equivalent names.
    pub async fn dir_or_file_by_path(&self, path: &str) -> VfsResult<DirOrFile> {
        let path = clean_path(path).ok_or_else(|| VfsError::NonAbsolutePath(path.to_string()))?;
        let exact = self
            .docs
            .find(&FindRequest::new(Selector::Fullpath(path.clone())).page(0, 1))
            .await?;
        if let Some(doc) = exact.into_iter().next() {
            return Ok(doc);
        }
        if path == "/" {
            return Err(VfsError::not_found("/"));
        }

        let mut current = self.dir_or_file_by_id(ROOT_DIR_ID).await?;
        for segment in path[1..].split('/') {
            if !current.is_dir() {
                return Err(VfsError::not_found(path.as_str()));
            }
            current = self
                .lookup_child(current.id(), segment)
                .await?
                .ok_or_else(|| VfsError::not_found(path.as_str()))?;
        }
        Ok(current)
    }

    pub async fn dir_by_path(&self, path: &str) -> VfsResult<DirDoc> {
        match self.dir_or_file_by_path(path).await? {
            DirOrFile::Directory(d) => Ok(d),
            DirOrFile::File(f) => Err(VfsError::not_a_directory(f.fullpath)),
        }
    }

    pub async fn file_by_path(&self, path: &str) -> VfsResult<FileDoc> {
        match self.dir_or_file_by_path(path).await? {
            DirOrFile::File(f) => Ok(f),
            DirOrFile::Directory(d) => Err(VfsError::not_found(format!("file {}", d.fullpath))),
        }
    }

    async fn lookup_child(&self, dir_id: &str, name: &str) -> VfsResult<Option<DirOrFile>> {
        if let Some(doc) = self.child_by_name(dir_id, name).await? {
            return Ok(Some(doc));
        }
        let wanted = normalize(name);
        let mut skip = 0;
        loop {
            let page = self.children(dir_id, skip, INDEX_PAGE_SIZE).await?;
            let done = page.len() < INDEX_PAGE_SIZE;
            skip += page.len();
            if let Some(doc) = page.into_iter().find(|d| normalize(d.name()) == wanted) {
                return Ok(Some(doc));
            }
            if done {
                return Ok(None);
            }
        }
    }

    // ========================================================================
    // Children
    // ========================================================================

    /// The child of `dir_id` stored with exactly this name.
    pub async fn child_by_name(&self, dir_id: &str, name: &str) -> VfsResult<Option<DirOrFile>> {
        let found = self
            .docs
            .find(
                &FindRequest::new(Selector::Child {
                    dir_id: dir_id.to_string(),
                    name: name.to_string(),
                })
                .page(0, 1),
            )
            .await?;
        Ok(found.into_iter().next())
    }

    /// Returns true if a sibling already uses exactly this name.
    pub async fn dir_child_exists(&self, dir_id: &str, name: &str) -> VfsResult<bool> {
        Ok(self.child_by_name(dir_id, name).await?.is_some())
    }

    /// One page of children: directories first, then files, each by name.
    pub async fn children(
        &self,
        dir_id: &str,
        skip: usize,
        limit: usize,
    ) -> VfsResult<Vec<DirOrFile>> {
        self.docs
            .find(&FindRequest::new(Selector::Children(dir_id.to_string())).page(skip, limit))
            .await
    }

    /// Everything strictly below `dir`, ordered by full path.
    pub async fn descendants(&self, dir: &DirDoc) -> VfsResult<Vec<DirOrFile>> {
        self.docs
            .find(&FindRequest::new(Selector::Descendants(dir.fullpath.clone())))
            .await
    }

    /// Lazy, restartable iterator over the children of `dir`.
    pub fn dir_iterator(&self, dir: &DirDoc, opts: IteratorOptions) -> DirIterator {
        DirIterator {
            index: self.clone(),
            dir_id: dir.id.clone(),
            page_size: opts.by_fetch.max(1),
            skip: 0,
            buffer: std::collections::VecDeque::new(),
            exhausted: false,
        }
    }

    /// Sum of sizes of committed, non-trashed files.
    pub async fn disk_usage(&self) -> VfsResult<u64> {
        self.docs.disk_usage().await
    }
}

/// Options for [`PathIndex::dir_iterator`].
#[derive(Debug, Clone, Copy)]
pub struct IteratorOptions {
    /// Documents fetched per index round-trip.
    pub by_fetch: usize,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            by_fetch: INDEX_PAGE_SIZE,
        }
    }
}

/// Paged iterator over a directory's children.
///
/// `next` yields `Ok(None)` once the directory is exhausted; that is the
/// normal end of iteration, not an error.
#[derive(Debug)]
pub struct DirIterator {
    index: PathIndex,
    dir_id: String,
    page_size: usize,
    skip: usize,
    buffer: std::collections::VecDeque<DirOrFile>,
    exhausted: bool,
}

impl DirIterator {
    pub async fn next(&mut self) -> VfsResult<Option<DirOrFile>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .index
                .children(&self.dir_id, self.skip, self.page_size)
                .await?;
            self.exhausted = page.len() < self.page_size;
            self.skip += page.len();
            self.buffer.extend(page);
        }
        Ok(self.buffer.pop_front())
    }

    /// Start over from the first child.
    pub fn reset(&mut self) {
        self.skip = 0;
        self.buffer.clear();
        self.exhausted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;

    async fn put(index: &PathIndex, doc: impl Into<DirOrFile>) -> DirOrFile {
        let mut doc = doc.into();
        index.documents().create(&mut doc).await.unwrap();
        doc
    }

    async fn dir(index: &PathIndex, name: &str, parent: &DirOrFile) -> DirOrFile {
        let mut d = DirDoc::new(name, parent.id()).unwrap();
        d.fullpath = crate::model::name::join_path(parent.fullpath(), name);
        put(index, d).await
    }

    async fn setup() -> (PathIndex, DirOrFile) {
        let index = PathIndex::new(Arc::new(MemoryIndex::new()));
        let root = put(&index, DirDoc::root()).await;
        (index, root)
    }

    #[tokio::test]
    async fn test_resolve_paths() {
        let (index, root) = setup().await;
        let a = dir(&index, "a", &root).await;
        let b = dir(&index, "b", &a).await;
        let mut f = FileDoc::new("f.txt", b.id()).unwrap();
        f.fullpath = "/a/b/f.txt".into();
        put(&index, f).await;

        assert_eq!(index.dir_by_path("/a/b/").await.unwrap().id, b.id());
        assert_eq!(index.dir_by_path("/").await.unwrap().id, ROOT_DIR_ID);
        assert_eq!(index.file_by_path("/a//b/f.txt").await.unwrap().name, "f.txt");

        let err = index.dir_or_file_by_path("a/b").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NonAbsolutePath);
        assert!(index.dir_or_file_by_path("/a/nope").await.unwrap_err().is_not_found());
        assert!(
            index
                .dir_or_file_by_path("/a/b/f.txt/x")
                .await
                .unwrap_err()
                .is_not_found()
        );
        let err = index.dir_by_path("/a/b/f.txt").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn test_nfd_fallback() {
        let (index, root) = setup().await;
        dir(&index, "cha\u{00ee}ne", &root).await;

        let found = index.dir_by_path("/chai\u{0302}ne").await.unwrap();
        assert_eq!(found.name, "cha\u{00ee}ne");
        assert!(!index.dir_child_exists(ROOT_DIR_ID, "chai\u{0302}ne").await.unwrap());
    }

    #[tokio::test]
    async fn test_dir_iterator_pages_and_resets() {
        let (index, root) = setup().await;
        for name in ["c", "a", "b"] {
            dir(&index, name, &root).await;
        }
        let root_dir = index.dir_by_id(ROOT_DIR_ID).await.unwrap();
        let mut iter = index.dir_iterator(&root_dir, IteratorOptions { by_fetch: 2 });

        let mut names = Vec::new();
        while let Some(doc) = iter.next().await.unwrap() {
            names.push(doc.name().to_string());
        }
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(iter.next().await.unwrap().is_none());

        iter.reset();
        assert_eq!(iter.next().await.unwrap().unwrap().name(), "a");
    }
}

//! Document index: the flat, revisioned store holding tree metadata.
//!
//! The index is not tree-aware. [`DocumentIndex`] is the collaborator
//! contract (CRUD with optimistic revisions, selector queries, bulk
//! enumeration); [`PathIndex`] builds path resolution and directory
//! iteration on top of it.
//!
//! Implementations:
//!
//! - [`MemoryIndex`] - in-process, for tests and ephemeral tenants
//! - [`SqliteIndex`] - one SQLite database per tenant

mod memory;
mod path;
mod sqlite;

use async_trait::async_trait;

use crate::error::VfsResult;
use crate::model::DirOrFile;

pub use memory::MemoryIndex;
pub use path::{DirIterator, IteratorOptions, PathIndex};
pub use sqlite::SqliteIndex;

/// Query selectors. Each one is backed by an index over the matching fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Documents whose full path is exactly this.
    Fullpath(String),
    /// The child of `dir_id` with exactly this name.
    Child { dir_id: String, name: String },
    /// Children of a directory: directories first, then files, each by name.
    Children(String),
    /// Everything strictly below a directory path, ordered by full path.
    Descendants(String),
}

impl Selector {
    /// Prefix matched by [`Selector::Descendants`].
    pub(crate) fn descendants_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        }
    }
}

/// A find request: selector plus paging.
#[derive(Debug, Clone)]
pub struct FindRequest {
    pub selector: Selector,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindRequest {
    /// Unpaged request.
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            skip: 0,
            limit: None,
        }
    }

    /// Set paging.
    pub fn page(mut self, skip: usize, limit: usize) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }
}

/// Collaborator contract for the tenant's document index.
///
/// Revisions are optimistic: `update` and `delete` fail with
/// [`VfsError::Conflict`](crate::VfsError::Conflict) when the document's
/// `rev` is not the stored one. Implementations never interpret the tree;
/// keeping `fullpath` consistent is the engine's job.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Insert a document. Assigns an id when empty and sets `rev` to 1.
    async fn create(&self, doc: &mut DirOrFile) -> VfsResult<()>;

    /// Replace a document, checking and bumping its revision.
    async fn update(&self, doc: &mut DirOrFile) -> VfsResult<()>;

    /// Replace several documents at once.
    ///
    /// Either every revision matches and all are written, or nothing is.
    async fn bulk_update(&self, docs: &mut [DirOrFile]) -> VfsResult<()>;

    /// Delete a document, checking its revision.
    async fn delete(&self, doc: &DirOrFile) -> VfsResult<()>;

    // ========================================================================
    // Reading
    // ========================================================================

    /// Fetch by id.
    async fn get(&self, id: &str) -> VfsResult<Option<DirOrFile>>;

    /// Run a selector query.
    async fn find(&self, req: &FindRequest) -> VfsResult<Vec<DirOrFile>>;

    /// Enumerate every document, ordered by id.
    async fn all_docs(&self, skip: usize, limit: usize) -> VfsResult<Vec<DirOrFile>>;

    /// Sum of sizes of committed, non-trashed files.
    async fn disk_usage(&self) -> VfsResult<u64>;
}

/// Ordering used by [`Selector::Children`].
pub(crate) fn children_order(a: &DirOrFile, b: &DirOrFile) -> std::cmp::Ordering {
    b.is_dir()
        .cmp(&a.is_dir())
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.id().cmp(b.id()))
}

/// New document identifier (time-ordered, hex).
pub(crate) fn new_doc_id() -> String {
    uuid::Uuid::now_v7().as_simple().to_string()
}

//! In-memory document index.
//!
//! Used for tests and ephemeral tenants. All data is lost when dropped.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{DocumentIndex, FindRequest, Selector, children_order, new_doc_id};
use crate::error::{VfsError, VfsResult};
use crate::model::DirOrFile;

/// In-memory document index.
///
/// Thread-safe via internal `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    docs: RwLock<BTreeMap<String, DirOrFile>>,
}

impl MemoryIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn check_rev(stored: Option<&DirOrFile>, doc: &DirOrFile) -> VfsResult<()> {
        match stored {
            None => Err(VfsError::not_found(doc.id())),
            Some(s) if s.rev() != doc.rev() => Err(VfsError::conflict(format!(
                "{}: stored rev {:?}, got {:?}",
                doc.id(),
                s.rev(),
                doc.rev()
            ))),
            Some(_) => Ok(()),
        }
    }

    fn matches(selector: &Selector, doc: &DirOrFile) -> bool {
        match selector {
            Selector::Fullpath(path) => doc.fullpath() == path,
            Selector::Child { dir_id, name } => doc.dir_id() == dir_id && doc.name() == name,
            Selector::Children(dir_id) => doc.dir_id() == dir_id && doc.id() != dir_id,
            Selector::Descendants(path) => {
                let prefix = Selector::descendants_prefix(path);
                doc.fullpath() != path && doc.fullpath().starts_with(&prefix)
            }
        }
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    fn name(&self) -> &'static str {
        "memory-index"
    }

    async fn create(&self, doc: &mut DirOrFile) -> VfsResult<()> {
        let mut docs = self.docs.write();
        if doc.id().is_empty() {
            doc.set_id(new_doc_id());
        }
        if docs.contains_key(doc.id()) {
            return Err(VfsError::already_exists(doc.id()));
        }
        doc.set_rev(1);
        docs.insert(doc.id().to_string(), doc.clone());
        Ok(())
    }

    async fn update(&self, doc: &mut DirOrFile) -> VfsResult<()> {
        let mut docs = self.docs.write();
        Self::check_rev(docs.get(doc.id()), doc)?;
        doc.set_rev(doc.rev().unwrap_or(0) + 1);
        docs.insert(doc.id().to_string(), doc.clone());
        Ok(())
    }

    async fn bulk_update(&self, batch: &mut [DirOrFile]) -> VfsResult<()> {
        let mut docs = self.docs.write();
        for doc in batch.iter() {
            Self::check_rev(docs.get(doc.id()), doc)?;
        }
        for doc in batch.iter_mut() {
            doc.set_rev(doc.rev().unwrap_or(0) + 1);
            docs.insert(doc.id().to_string(), doc.clone());
        }
        Ok(())
    }

    async fn delete(&self, doc: &DirOrFile) -> VfsResult<()> {
        let mut docs = self.docs.write();
        Self::check_rev(docs.get(doc.id()), doc)?;
        docs.remove(doc.id());
        Ok(())
    }

    async fn get(&self, id: &str) -> VfsResult<Option<DirOrFile>> {
        Ok(self.docs.read().get(id).cloned())
    }

    async fn find(&self, req: &FindRequest) -> VfsResult<Vec<DirOrFile>> {
        let docs = self.docs.read();
        let mut found: Vec<DirOrFile> = docs
            .values()
            .filter(|d| Self::matches(&req.selector, d))
            .cloned()
            .collect();
        drop(docs);

        match req.selector {
            Selector::Children(_) => found.sort_by(children_order),
            _ => found.sort_by(|a, b| a.fullpath().cmp(b.fullpath()).then(a.id().cmp(b.id()))),
        }

        let limit = req.limit.unwrap_or(usize::MAX);
        Ok(found.into_iter().skip(req.skip).take(limit).collect())
    }

    async fn all_docs(&self, skip: usize, limit: usize) -> VfsResult<Vec<DirOrFile>> {
        let docs = self.docs.read();
        Ok(docs.values().skip(skip).take(limit).cloned().collect())
    }

    async fn disk_usage(&self) -> VfsResult<u64> {
        let docs = self.docs.read();
        Ok(docs
            .values()
            .filter_map(|d| d.as_file())
            .filter(|f| !f.trashed && !f.pending)
            .filter_map(|f| f.size)
            .sum())
    }
}

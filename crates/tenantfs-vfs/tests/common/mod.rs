//! Shared setup: one tenant per (index, storage layout) combination.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;
use tenantfs_vfs::constants::ROOT_DIR_ID;
use tenantfs_vfs::{
    DirDoc, DirOrFile, DocumentIndex, FileDoc, FindRequest, LocalLocker, MemoryIndex,
    MemoryObjectStore, SqliteIndex, StorageLayout, Vfs, VfsError, VfsResult, open_backend,
};
use tokio::io::AsyncReadExt;

pub const DOMAIN: &str = "alice.example.net";

pub const LAYOUTS: [StorageLayout; 4] = [
    StorageLayout::Local,
    StorageLayout::ObjectV1,
    StorageLayout::ObjectV2,
    StorageLayout::ObjectV3,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Memory,
    Sqlite,
}

/// A tenant and everything that must outlive it.
pub struct TestTenant {
    pub vfs: Vfs,
    pub objects: Arc<MemoryObjectStore>,
    pub index: Arc<dyn DocumentIndex>,
    _tmp: TempDir,
}

impl TestTenant {
    pub async fn new(index: IndexKind, layout: StorageLayout) -> Self {
        Self::with_max_file_size(index, layout, None).await
    }

    pub async fn with_max_file_size(
        index: IndexKind,
        layout: StorageLayout,
        max_file_size: Option<u64>,
    ) -> Self {
        let tmp = TempDir::new().unwrap();
        let docs: Arc<dyn DocumentIndex> = match index {
            IndexKind::Memory => Arc::new(MemoryIndex::new()),
            IndexKind::Sqlite => Arc::new(SqliteIndex::open(tmp.path().join("index.db")).unwrap()),
        };
        Self::assemble(tmp, docs, layout, max_file_size).await
    }

    /// A tenant over a caller-provided index.
    pub async fn with_index(docs: Arc<dyn DocumentIndex>, layout: StorageLayout) -> Self {
        Self::assemble(TempDir::new().unwrap(), docs, layout, None).await
    }

    async fn assemble(
        tmp: TempDir,
        docs: Arc<dyn DocumentIndex>,
        layout: StorageLayout,
        max_file_size: Option<u64>,
    ) -> Self {
        let objects = Arc::new(MemoryObjectStore::new());
        let storage = open_backend(
            layout,
            DOMAIN,
            &tmp.path().join("files"),
            objects.clone(),
            max_file_size,
        );
        let vfs = Vfs::new(DOMAIN, docs.clone(), storage, Arc::new(LocalLocker::default()));
        vfs.init().await.unwrap();
        Self {
            vfs,
            objects,
            index: docs,
            _tmp: tmp,
        }
    }
}

/// In-memory index whose updates can be switched off.
#[derive(Default)]
pub struct FlakyIndex {
    inner: MemoryIndex,
    pub fail_updates: AtomicBool,
}

impl FlakyIndex {
    fn check(&self) -> VfsResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(VfsError::unavailable("index", "down"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentIndex for FlakyIndex {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn create(&self, doc: &mut DirOrFile) -> VfsResult<()> {
        self.inner.create(doc).await
    }

    async fn update(&self, doc: &mut DirOrFile) -> VfsResult<()> {
        self.check()?;
        self.inner.update(doc).await
    }

    async fn bulk_update(&self, docs: &mut [DirOrFile]) -> VfsResult<()> {
        self.check()?;
        self.inner.bulk_update(docs).await
    }

    async fn delete(&self, doc: &DirOrFile) -> VfsResult<()> {
        self.inner.delete(doc).await
    }

    async fn get(&self, id: &str) -> VfsResult<Option<DirOrFile>> {
        self.inner.get(id).await
    }

    async fn find(&self, req: &FindRequest) -> VfsResult<Vec<DirOrFile>> {
        self.inner.find(req).await
    }

    async fn all_docs(&self, skip: usize, limit: usize) -> VfsResult<Vec<DirOrFile>> {
        self.inner.all_docs(skip, limit).await
    }

    async fn disk_usage(&self) -> VfsResult<u64> {
        self.inner.disk_usage().await
    }
}

/// Every index/layout combination.
pub async fn all_tenants() -> Vec<(String, TestTenant)> {
    let mut tenants = Vec::new();
    for index in [IndexKind::Memory, IndexKind::Sqlite] {
        for layout in LAYOUTS {
            tenants.push((
                format!("{index:?}/{layout}"),
                TestTenant::new(index, layout).await,
            ));
        }
    }
    tenants
}

pub async fn mkdir(vfs: &Vfs, parent: &DirDoc, name: &str) -> DirDoc {
    vfs.create_dir(DirDoc::new(name, parent.id.clone()).unwrap())
        .await
        .unwrap()
}

pub async fn root(vfs: &Vfs) -> DirDoc {
    vfs.dir_by_id(ROOT_DIR_ID).await.unwrap()
}

/// Upload `content` with a declared size.
pub async fn upload(vfs: &Vfs, parent: &DirDoc, name: &str, content: &[u8]) -> FileDoc {
    let doc = FileDoc::new(name, parent.id.clone())
        .unwrap()
        .with_size(content.len() as u64);
    let mut handle = vfs.create_file(doc, None).await.unwrap();
    handle.write(content).await.unwrap();
    handle.close().await.unwrap()
}

pub async fn read_all(vfs: &Vfs, file: &FileDoc) -> Vec<u8> {
    let mut reader = vfs.open_file(file).await.unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

//! # tenantfs-vfs
//!
//! Per-tenant virtual file system.
//!
//! Every tenant owns one tree of directories and files. Tree metadata lives
//! in a flat document index; file bytes live in a storage backend chosen per
//! tenant. The [`Vfs`] engine keeps the two consistent:
//!
//! - [`model`] - directory and file documents
//! - [`index`] - the document index and path resolution over it
//! - [`storage`] - content backends: local filesystem, object storage
//! - [`engine`] - tree mutations, uploads, quota, trash, walk
//! - [`archive`] / [`download`] - zip export and ephemeral download links
//! - [`fsck`] - offline consistency checks
//!
//! ## Design Decisions
//!
//! - **Full paths are denormalized**: every document stores its absolute
//!   path, so lookups are one index query; renames rewrite descendants in a
//!   single bulk update.
//! - **Per-tenant reader/writer lock**: mutations are exclusive, traversals
//!   are shared, uploads stream outside the lock.
//! - **Pending documents**: a new file's name is reserved before its bytes
//!   are written and becomes visible only once the content is committed.

pub mod archive;
pub mod config;
pub mod constants;
pub mod deployment;
pub mod download;
pub mod engine;
mod error;
pub mod fsck;
pub mod index;
pub mod lock;
pub mod model;
pub mod storage;

pub use archive::Archive;
pub use config::{ConfigError, Instance, TenantfsConfig};
pub use deployment::Deployment;
pub use download::{DownloadRegistry, DownloadStore};
pub use engine::{FileHandle, RemoveMode, Vfs, WalkEntry, check_available_space};
pub use error::{ErrorKind, ResultExt, VfsError, VfsResult};
pub use fsck::{FsckKind, FsckLog, FsckOptions, FsckSummary, fsck};
pub use index::{DocumentIndex, FindRequest, MemoryIndex, PathIndex, Selector, SqliteIndex};
pub use lock::{LocalLocker, LockGuard, TreeLocker};
pub use model::{DirDoc, DirOrFile, DocPatch, FileDoc};
pub use storage::{
    ContentReader, ContentWriter, DirObjectStore, LocalBackend, MemoryObjectStore, ObjectBackend,
    ObjectStore, StagedUpload, StorageBackend, StorageLayout, StoredObject, open_backend,
};

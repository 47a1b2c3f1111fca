//! Document model for files and directories.
//!
//! Documents are plain serde structs owned by the tenant's document index.
//! Only the engine writes them; everything else reads.

mod dir;
pub mod disposition;
mod file;
pub mod mime;
pub mod name;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use dir::DirDoc;
pub use disposition::content_disposition;
pub use file::{DocReference, FileDoc};
pub use mime::{mime_and_class, mime_and_class_from_filename};

/// A document of either kind, as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirOrFile {
    Directory(DirDoc),
    File(FileDoc),
}

impl DirOrFile {
    pub fn id(&self) -> &str {
        match self {
            DirOrFile::Directory(d) => &d.id,
            DirOrFile::File(f) => &f.id,
        }
    }

    pub fn rev(&self) -> Option<u64> {
        match self {
            DirOrFile::Directory(d) => d.rev,
            DirOrFile::File(f) => f.rev,
        }
    }

    pub fn set_rev(&mut self, rev: u64) {
        match self {
            DirOrFile::Directory(d) => d.rev = Some(rev),
            DirOrFile::File(f) => f.rev = Some(rev),
        }
    }

    pub fn set_id(&mut self, id: String) {
        match self {
            DirOrFile::Directory(d) => d.id = id,
            DirOrFile::File(f) => f.id = id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DirOrFile::Directory(d) => &d.name,
            DirOrFile::File(f) => &f.name,
        }
    }

    pub fn dir_id(&self) -> &str {
        match self {
            DirOrFile::Directory(d) => &d.dir_id,
            DirOrFile::File(f) => &f.dir_id,
        }
    }

    pub fn fullpath(&self) -> &str {
        match self {
            DirOrFile::Directory(d) => &d.fullpath,
            DirOrFile::File(f) => &f.fullpath,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, DirOrFile::Directory(_))
    }

    pub fn as_dir(&self) -> Option<&DirDoc> {
        match self {
            DirOrFile::Directory(d) => Some(d),
            DirOrFile::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileDoc> {
        match self {
            DirOrFile::Directory(_) => None,
            DirOrFile::File(f) => Some(f),
        }
    }

    pub fn into_dir(self) -> Option<DirDoc> {
        match self {
            DirOrFile::Directory(d) => Some(d),
            DirOrFile::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<FileDoc> {
        match self {
            DirOrFile::Directory(_) => None,
            DirOrFile::File(f) => Some(f),
        }
    }
}

impl From<DirDoc> for DirOrFile {
    fn from(d: DirDoc) -> Self {
        DirOrFile::Directory(d)
    }
}

impl From<FileDoc> for DirOrFile {
    fn from(f: FileDoc) -> Self {
        DirOrFile::File(f)
    }
}

/// Partial metadata update. Only provided fields change.
#[derive(Debug, Clone, Default)]
pub struct DocPatch {
    /// Rename.
    pub name: Option<String>,
    /// Move under another directory.
    pub dir_id: Option<String>,
    pub tags: Option<Vec<String>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Files only.
    pub executable: Option<bool>,
    /// Set or clear the trash restore path.
    pub(crate) restore_path: Option<Option<String>>,
}

impl DocPatch {
    /// Create a new empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the new name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the new parent.
    pub fn with_dir_id(mut self, dir_id: impl Into<String>) -> Self {
        self.dir_id = Some(dir_id.into());
        self
    }

    /// Set the new tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Set the executable flag.
    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = Some(executable);
        self
    }
}

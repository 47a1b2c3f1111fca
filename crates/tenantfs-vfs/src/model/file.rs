//! File documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VfsResult;
use crate::model::mime::mime_and_class_from_filename;
use crate::model::name::{check_name, join_path, parent_path};

/// Back-reference from another entity (an album, a note...) to a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocReference {
    pub doctype: String,
    pub id: String,
}

/// One file of a tenant tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDoc {
    /// Empty until the document is persisted.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    pub name: String,
    pub dir_id: String,
    pub fullpath: String,
    /// Byte size; `None` while a streaming upload of unknown length runs.
    pub size: Option<u64>,
    /// Hex BLAKE3 of the stored bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub mime: String,
    pub class: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub referenced_by: Vec<DocReference>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_path: Option<String>,
    /// Content version for layouts that key objects by (id, version).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_version: Option<String>,
    /// Set while the name is reserved but content is not yet committed.
    #[serde(default)]
    pub pending: bool,
}

impl FileDoc {
    /// Create a new, not yet persisted file under `dir_id`.
    ///
    /// MIME type and class are derived from the name; override them with
    /// [`FileDoc::with_mime`] when the uploader declares a Content-Type.
    pub fn new(name: impl Into<String>, dir_id: impl Into<String>) -> VfsResult<Self> {
        let name = name.into();
        check_name(&name)?;
        let (mime, class) = mime_and_class_from_filename(&name);
        let now = Utc::now();
        Ok(Self {
            id: String::new(),
            rev: None,
            name,
            dir_id: dir_id.into(),
            fullpath: String::new(),
            size: None,
            checksum: None,
            mime,
            class,
            created_at: now,
            updated_at: now,
            trashed: false,
            executable: false,
            encrypted: false,
            referenced_by: Vec::new(),
            tags: Vec::new(),
            restore_path: None,
            internal_version: None,
            pending: false,
        })
    }

    /// Declare the size of the upload.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Declare the expected checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Override MIME type and class.
    pub fn with_mime(mut self, mime: impl Into<String>, class: impl Into<String>) -> Self {
        self.mime = mime.into();
        self.class = class.into();
        self
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// Set tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Mark executable.
    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    /// Mark encrypted.
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Build the document for a "save as copy" of this file.
    ///
    /// The copy has no identity yet (id, revision, references and content
    /// version are cleared) and a fresh creation time; size, checksum, type
    /// and parent are kept.
    pub fn copy_as(&self, new_name: impl Into<String>) -> FileDoc {
        let name = new_name.into();
        let now = Utc::now();
        let fullpath = if self.fullpath.is_empty() {
            String::new()
        } else {
            join_path(parent_path(&self.fullpath), &name)
        };
        FileDoc {
            id: String::new(),
            rev: None,
            name,
            fullpath,
            created_at: now,
            updated_at: now,
            trashed: false,
            referenced_by: Vec::new(),
            restore_path: None,
            internal_version: None,
            pending: false,
            ..self.clone()
        }
    }
}

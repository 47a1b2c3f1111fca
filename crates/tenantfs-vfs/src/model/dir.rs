//! Directory documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ROOT_DIR_ID, TRASH_DIR_ID, TRASH_DIR_NAME, TRASH_DIR_PATH};
use crate::error::VfsResult;
use crate::model::name::check_name;

/// One directory of a tenant tree.
///
/// `fullpath` is denormalized from the parent chain and kept in lock-step by
/// the engine's cascade; the index never derives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirDoc {
    /// Empty until the document is persisted.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    pub name: String,
    /// Parent directory id (empty for the root).
    pub dir_id: String,
    pub fullpath: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Where a trashed directory came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_path: Option<String>,
}

impl DirDoc {
    /// Create a new, not yet persisted directory under `dir_id`.
    ///
    /// The full path is computed by the engine when the document is created.
    pub fn new(name: impl Into<String>, dir_id: impl Into<String>) -> VfsResult<Self> {
        let name = name.into();
        check_name(&name)?;
        let now = Utc::now();
        Ok(Self {
            id: String::new(),
            rev: None,
            name,
            dir_id: dir_id.into(),
            fullpath: String::new(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            restore_path: None,
        })
    }

    /// Set tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// The root directory document of a fresh tenant.
    pub fn root() -> Self {
        let now = Utc::now();
        Self {
            id: ROOT_DIR_ID.to_string(),
            rev: None,
            name: String::new(),
            dir_id: String::new(),
            fullpath: "/".to_string(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            restore_path: None,
        }
    }

    /// The trash directory document of a fresh tenant.
    pub fn trash() -> Self {
        let now = Utc::now();
        Self {
            id: TRASH_DIR_ID.to_string(),
            rev: None,
            name: TRASH_DIR_NAME.to_string(),
            dir_id: ROOT_DIR_ID.to_string(),
            fullpath: TRASH_DIR_PATH.to_string(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            restore_path: None,
        }
    }

    /// Returns true for the root directory.
    pub fn is_root(&self) -> bool {
        self.id == ROOT_DIR_ID
    }

    /// Returns true for the trash directory itself.
    pub fn is_trash(&self) -> bool {
        self.id == TRASH_DIR_ID
    }

    /// Returns true if this directory sits somewhere inside the trash.
    pub fn is_in_trash(&self) -> bool {
        self.fullpath.starts_with(&format!("{TRASH_DIR_PATH}/"))
    }
}

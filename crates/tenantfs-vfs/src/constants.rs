//! Reserved identifiers and tunables.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Identifier of the root directory of every tenant.
pub const ROOT_DIR_ID: &str = "tenantfs-root-dir";

/// Identifier of the trash directory of every tenant.
pub const TRASH_DIR_ID: &str = "tenantfs-trash-dir";

/// Full path of the trash directory.
pub const TRASH_DIR_PATH: &str = "/.trash";

/// Name of the trash directory (child of the root).
pub const TRASH_DIR_NAME: &str = ".trash";

/// Content type used when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Class for files with the default content type.
pub const DEFAULT_CLASS: &str = "files";

/// Longest accepted name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// How long a download link stays valid.
pub const DOWNLOAD_STORE_TTL: Duration = Duration::from_secs(60 * 60);

/// Interval between download store sweeps.
pub const DOWNLOAD_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Bound on waiting for a tenant tree lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest object an object-storage container accepts in one piece.
pub const OBJECT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Page size used when enumerating index documents.
pub const INDEX_PAGE_SIZE: usize = 256;

/// Conflict-name attempts before giving up on finding a free slot.
pub const CONFLICT_NAME_ATTEMPTS: u64 = 1000;

/// Read buffer size for content streaming.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Page size used when enumerating stored objects.
pub const OBJECT_PAGE_SIZE: usize = 256;

/// Age after which a pending upload or a staged file is reported by fsck.
pub const STALE_UPLOAD_AGE: Duration = Duration::from_secs(24 * 60 * 60);

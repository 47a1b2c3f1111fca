//! VFS error types.
//!
//! Every failure the engine surfaces is a [`VfsError`]. Callers that need a
//! stable, machine-readable code (CLI output, HTTP mapping) use
//! [`VfsError::kind`], which sees through context wrappers.

use std::io;
use thiserror::Error;

/// Machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    NonAbsolutePath,
    FileTooBig,
    ContentLengthMismatch,
    ChecksumMismatch,
    InvalidName,
    ForbiddenMove,
    NotADirectory,
    DirectoryNotEmpty,
    BackendUnavailable,
    InconsistentState,
    Io,
    Other,
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path, identifier or secret does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// A sibling already uses this name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic revision mismatch.
    #[error("revision conflict: {0}")]
    Conflict(String),

    /// A relative path was given where an absolute one is required.
    #[error("path is not absolute: {0}")]
    NonAbsolutePath(String),

    /// Declared or written size exceeds the quota or the backend maximum.
    #[error("file too big")]
    FileTooBig,

    /// Bytes written differ from the declared size.
    #[error("content length mismatch: expected {expected} bytes, got {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },

    /// Stored bytes do not hash to the declared checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Empty or otherwise illegal name.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Move that would put a directory inside itself, or touch a reserved node.
    #[error("forbidden move: {0}")]
    ForbiddenMove(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The index or storage collaborator could not be reached.
    #[error("{backend} unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    /// Divergences detected by the consistency checker.
    #[error("inconsistent state: {findings} finding(s)")]
    InconsistentState { findings: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Error with diagnostic context (path, identifier).
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<VfsError>,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create a Conflict error.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create an InvalidName error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a ForbiddenMove error.
    pub fn forbidden_move(msg: impl Into<String>) -> Self {
        Self::ForbiddenMove(msg.into())
    }

    /// Create a BackendUnavailable error.
    pub fn unavailable(backend: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Wrap this error with diagnostic context.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Machine-readable classification, ignoring context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::Conflict(_) => ErrorKind::Conflict,
            VfsError::NonAbsolutePath(_) => ErrorKind::NonAbsolutePath,
            VfsError::FileTooBig => ErrorKind::FileTooBig,
            VfsError::ContentLengthMismatch { .. } => ErrorKind::ContentLengthMismatch,
            VfsError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            VfsError::InvalidName(_) => ErrorKind::InvalidName,
            VfsError::ForbiddenMove(_) => ErrorKind::ForbiddenMove,
            VfsError::NotADirectory(_) => ErrorKind::NotADirectory,
            VfsError::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            VfsError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            VfsError::InconsistentState { .. } => ErrorKind::InconsistentState,
            VfsError::Io(_) => ErrorKind::Io,
            VfsError::Context { source, .. } => source.kind(),
            VfsError::Other(_) => ErrorKind::Other,
        }
    }

    /// Returns true if this is (or wraps) a NotFound error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<io::Error> for VfsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(e.to_string()),
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(e.to_string()),
            _ => VfsError::Io(e),
        }
    }
}

impl From<rusqlite::Error> for VfsError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                VfsError::AlreadyExists(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::Error::QueryReturnedNoRows => VfsError::NotFound(e.to_string()),
            _ => VfsError::unavailable("index", e),
        }
    }
}

impl From<serde_json::Error> for VfsError {
    fn from(e: serde_json::Error) -> Self {
        VfsError::other(format!("document encoding: {e}"))
    }
}

impl From<zip::result::ZipError> for VfsError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(e) => VfsError::Io(e),
            other => VfsError::other(format!("zip: {other}")),
        }
    }
}

/// Convert VfsError to std::io::Error for callers that speak `io`.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
            ErrorKind::AlreadyExists => io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()),
            ErrorKind::NonAbsolutePath | ErrorKind::InvalidName => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            ErrorKind::NotADirectory => io::Error::new(io::ErrorKind::NotADirectory, e.to_string()),
            ErrorKind::DirectoryNotEmpty => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, e.to_string())
            }
            ErrorKind::FileTooBig => io::Error::new(io::ErrorKind::StorageFull, e.to_string()),
            _ => match e {
                VfsError::Io(inner) => inner,
                other => io::Error::other(other.to_string()),
            },
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

/// Attach context to the error side of a [`VfsResult`].
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> VfsResult<T>;
}

impl<T> ResultExt<T> for VfsResult<T> {
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> VfsResult<T> {
        self.map_err(|e| e.context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sees_through_context() {
        let err = VfsError::not_found("/a/b").context("resolving /a/b/c");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "resolving /a/b/c: not found: /a/b");
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::FileTooBig.to_string(), "file_too_big");
        assert_eq!(ErrorKind::NonAbsolutePath.to_string(), "non_absolute_path");
        let code: &'static str = ErrorKind::BackendUnavailable.into();
        assert_eq!(code, "backend_unavailable");
    }

    #[test]
    fn test_io_not_found_maps() {
        let err: VfsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let back: io::Error = VfsError::FileTooBig.into();
        assert_eq!(back.kind(), io::ErrorKind::StorageFull);
    }
}

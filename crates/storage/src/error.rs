//! Storage error taxonomy.
//!
//! Every variant carries the offending path in its root-relative display form
//! (`/docs/a.txt`), never the absolute location on the medium.

use std::io;

use protocol::{ErrorKind, ErrorMessage};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Traversal attempt, forbidden character or confinement violation.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Nothing exists at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The destination is occupied.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A directory was expected.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file was expected.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The medium refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The destination was written but the source could not be removed.
    #[error("partial move from {from} to {to}: source left in place ({cause})")]
    PartialMove {
        from: String,
        to: String,
        cause: String,
    },

    /// A recursive delete left entries behind.
    #[error("partial delete of {path}: {count} entries left behind", count = .failed.len())]
    PartialDelete { path: String, failed: Vec<String> },

    /// Unclassified medium failure.
    #[error("I/O fault at {path}: {message}")]
    IoFault { path: String, message: String },

    /// The operation was cancelled by the caller.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A single step exceeded the operation timeout.
    #[error("operation timed out: {0}")]
    TimedOut(String),
}

impl StorageError {
    /// Build an `InvalidPath` error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build an `IoFault` error.
    pub fn io_fault(path: impl Into<String>, message: impl ToString) -> Self {
        StorageError::IoFault {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Classify an I/O error raised while touching `path`.
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path),
            io::ErrorKind::NotADirectory => StorageError::NotADirectory(path),
            io::ErrorKind::IsADirectory => StorageError::IsADirectory(path),
            _ => StorageError::IoFault {
                path,
                message: err.to_string(),
            },
        }
    }

    /// The protocol error kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::InvalidPath { .. } => ErrorKind::InvalidPath,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::NotADirectory(_) => ErrorKind::NotADirectory,
            StorageError::IsADirectory(_) => ErrorKind::IsADirectory,
            StorageError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            StorageError::PartialMove { .. } => ErrorKind::PartialMove,
            StorageError::PartialDelete { .. } => ErrorKind::PartialDelete,
            StorageError::IoFault { .. } => ErrorKind::IoFault,
            StorageError::Cancelled(_) => ErrorKind::Cancelled,
            StorageError::TimedOut(_) => ErrorKind::TimedOut,
        }
    }

    /// The root-relative path this error is about.
    ///
    /// For a partial move this is the duplicated source.
    pub fn path(&self) -> &str {
        match self {
            StorageError::InvalidPath { path, .. }
            | StorageError::PartialDelete { path, .. }
            | StorageError::IoFault { path, .. } => path,
            StorageError::PartialMove { from, .. } => from,
            StorageError::NotFound(path)
            | StorageError::AlreadyExists(path)
            | StorageError::NotADirectory(path)
            | StorageError::IsADirectory(path)
            | StorageError::PermissionDenied(path)
            | StorageError::Cancelled(path)
            | StorageError::TimedOut(path) => path,
        }
    }

    /// Whether the operation may succeed if retried.
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }

    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self) -> ErrorMessage {
        let message = ErrorMessage::new(self.kind(), self.to_string(), Some(self.path().to_string()));
        match self {
            StorageError::PartialDelete { failed, .. } => message.with_failed(failed.clone()),
            StorageError::PartialMove { from, .. } => message.with_failed(vec![from.clone()]),
            _ => message,
        }
    }
}

impl From<StorageError> for ErrorMessage {
    fn from(err: StorageError) -> Self {
        err.to_error_message()
    }
}

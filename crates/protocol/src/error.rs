//! Error types for the protocol crate.
//!
//! Two kinds of errors live here: [`ProtocolError`], raised when a message
//! cannot be encoded or decoded, and [`ErrorMessage`], the structured error
//! body every failed storage operation is reported with.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error type covering encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

/// Failure taxonomy shared by every storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Traversal attempt or malformed path; rejected before any I/O.
    InvalidPath,
    /// Request could not be decoded.
    InvalidRequest,
    /// Nothing exists at the path.
    NotFound,
    /// The destination is occupied.
    AlreadyExists,
    /// A directory was expected.
    NotADirectory,
    /// A file was expected.
    IsADirectory,
    /// The medium refused access.
    PermissionDenied,
    /// Destination written, source could not be removed.
    PartialMove,
    /// Recursive delete left some entries behind.
    PartialDelete,
    /// Unclassified medium failure.
    IoFault,
    /// The caller cancelled the operation.
    Cancelled,
    /// A single step exceeded its deadline.
    TimedOut,
}

impl ErrorKind {
    /// Conventional HTTP status for this kind.
    ///
    /// The HTTP layer owns the final mapping; this is the default it starts
    /// from.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidPath | ErrorKind::InvalidRequest => 400,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists | ErrorKind::NotADirectory | ErrorKind::IsADirectory => 409,
            ErrorKind::Cancelled => 503,
            ErrorKind::TimedOut => 504,
            ErrorKind::PartialMove | ErrorKind::PartialDelete | ErrorKind::IoFault => 500,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::IoFault | ErrorKind::Cancelled | ErrorKind::TimedOut | ErrorKind::PartialDelete
        )
    }

    /// Stable snake_case name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotADirectory => "not_a_directory",
            ErrorKind::IsADirectory => "is_a_directory",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::PartialMove => "partial_move",
            ErrorKind::PartialDelete => "partial_delete",
            ErrorKind::IoFault => "io_fault",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// Offending path, relative to the storage root.
    pub path: Option<String>,
    /// Paths left behind by a partial operation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    /// Whether the error is recoverable.
    pub recoverable: bool,
}

impl ErrorMessage {
    /// Create an error body for the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path,
            failed: Vec::new(),
            recoverable: kind.is_recoverable(),
        }
    }

    /// Error body for a request that could not be decoded.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message, None)
    }

    /// Attach the list of paths a partial operation left behind.
    pub fn with_failed(mut self, failed: Vec<String>) -> Self {
        self.failed = failed;
        self
    }
}

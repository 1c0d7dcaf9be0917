//! The narrow object-store API the object backend is written against.

use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::error::StorageError;

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, if the store reported one.
    pub last_modified: Option<SystemTime>,
}

/// One page of a delimited prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects directly under the prefix.
    pub objects: Vec<ObjectMeta>,
    /// Common sub-prefixes (ending with the delimiter).
    pub common_prefixes: Vec<String>,
    /// Token for the next page, `None` when the listing is exhausted.
    pub next_token: Option<String>,
}

/// Errors reported by an object-store client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjectError {
    /// The store refused the credentials or the request.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The store answered with an unexpected status.
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ObjectError {
    /// Classify an HTTP status that is neither success nor not-found.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => ObjectError::AccessDenied(message.into()),
            _ => ObjectError::Status {
                status,
                message: message.into(),
            },
        }
    }

    /// Convert into a storage error about `path`.
    pub fn into_storage(self, path: impl Into<String>) -> StorageError {
        let path = path.into();
        match self {
            ObjectError::AccessDenied(_) => StorageError::PermissionDenied(path),
            other => StorageError::io_fault(path, other),
        }
    }
}

/// Result type for object-store calls.
pub type ObjectResult<T> = Result<T, ObjectError>;

/// Future returned by object-store calls.
pub type ClientFuture<'a, T> = BoxFuture<'a, ObjectResult<T>>;

/// Object-store client.
///
/// Every method is a single request. Missing objects are reported as
/// `Ok(None)` rather than errors; deleting a missing key succeeds.
pub trait ObjectClient: Send + Sync {
    /// Fetch one page of a delimited listing of `prefix`.
    fn list_page<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<&'a str>,
        token: Option<String>,
        max_keys: usize,
    ) -> ClientFuture<'a, ListPage>;

    /// Metadata of an object, `None` if it does not exist.
    fn head<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<ObjectMeta>>;

    /// Contents of an object, `None` if it does not exist.
    fn get<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<Bytes>>;

    /// Create or replace an object.
    fn put<'a>(&'a self, key: &'a str, data: Bytes) -> ClientFuture<'a, ()>;

    /// Server-side copy.
    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> ClientFuture<'a, ()>;

    /// Delete an object. Deleting a missing key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> ClientFuture<'a, ()>;

    /// Whether [`ObjectClient::copy`] is available.
    fn supports_server_side_copy(&self) -> bool {
        true
    }
}

//! Storage backends.
//!
//! This module provides the [`StorageBackend`] capability interface and its
//! two implementations:
//! - [`LocalBackend`] over a directory on the local filesystem
//! - [`ObjectBackend`] over an S3-compatible bucket, with directories
//!   represented by marker objects

pub mod context;
pub mod local;
pub mod object;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use protocol::{DirSummary, Entry};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::path::{PathResolver, RelativePath, ResolvedPath};

pub use context::OpContext;
pub use local::LocalBackend;
pub use object::{MemoryObjectClient, ObjectBackend, ObjectClient, S3Client};

/// Future returned by backend operations.
pub type BackendFuture<'a, T> = BoxFuture<'a, StorageResult<T>>;

/// Which medium a backend stores data on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local filesystem.
    #[default]
    Local,
    /// S3-compatible object storage.
    Object,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Object => f.write_str("object"),
        }
    }
}

/// Capability interface shared by every storage medium.
///
/// Operations accept only [`ResolvedPath`]s produced by this backend's
/// resolver. Implementations hold nothing but their root and a client handle
/// and are shared behind `Arc`.
pub trait StorageBackend: Send + Sync {
    /// The medium this backend stores data on.
    fn kind(&self) -> BackendKind;

    /// The resolver anchored at this backend's root.
    fn resolver(&self) -> &PathResolver;

    /// Canonical phase of path resolution.
    fn resolve<'a>(&'a self, path: &'a RelativePath) -> BackendFuture<'a, ResolvedPath> {
        Box::pin(self.resolver().confine(path))
    }

    /// Canonical phase for operations on the entry itself, without following
    /// a symlink in the last segment.
    fn resolve_entry<'a>(&'a self, path: &'a RelativePath) -> BackendFuture<'a, ResolvedPath> {
        Box::pin(self.resolver().confine_entry(path))
    }

    /// List the immediate children of a directory, in presentation order.
    fn list<'a>(&'a self, ctx: &'a OpContext, dir: &'a ResolvedPath) -> BackendFuture<'a, Vec<Entry>>;

    /// Metadata for a single entry.
    fn stat<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath) -> BackendFuture<'a, Entry>;

    /// Read a whole file.
    fn read<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath) -> BackendFuture<'a, Bytes>;

    /// Create or overwrite a file. The parent directory must exist.
    fn write<'a>(
        &'a self,
        ctx: &'a OpContext,
        path: &'a ResolvedPath,
        data: Bytes,
    ) -> BackendFuture<'a, ()>;

    /// Create a directory. The parent directory must exist.
    fn create_directory<'a>(
        &'a self,
        ctx: &'a OpContext,
        path: &'a ResolvedPath,
    ) -> BackendFuture<'a, ()>;

    /// Move or rename an entry.
    fn move_entry<'a>(
        &'a self,
        ctx: &'a OpContext,
        from: &'a ResolvedPath,
        to: &'a ResolvedPath,
        overwrite: bool,
    ) -> BackendFuture<'a, ()>;

    /// Copy an entry, recursively for directories.
    fn copy<'a>(
        &'a self,
        ctx: &'a OpContext,
        from: &'a ResolvedPath,
        to: &'a ResolvedPath,
        overwrite: bool,
    ) -> BackendFuture<'a, ()>;

    /// Delete an entry, recursively for directories.
    fn delete<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath) -> BackendFuture<'a, ()>;

    /// Totals for a directory subtree.
    fn summarize<'a>(
        &'a self,
        ctx: &'a OpContext,
        dir: &'a ResolvedPath,
    ) -> BackendFuture<'a, DirSummary>;
}

/// Reject transfers that would move or copy an entry into itself, into one
/// of its descendants, onto one of its ancestors, or onto the root.
pub(crate) fn check_transfer(from: &ResolvedPath, to: &ResolvedPath) -> StorageResult<()> {
    if from.is_root() {
        return Err(StorageError::invalid_path(from.display(), "cannot move or copy the root"));
    }
    if to.is_root() {
        return Err(StorageError::invalid_path(to.display(), "destination is the root"));
    }
    if to.relative().starts_with(from.relative()) {
        return Err(StorageError::invalid_path(
            to.display(),
            "destination is inside the source",
        ));
    }
    // Overwriting an ancestor would delete the source first.
    if from.relative().starts_with(to.relative()) {
        return Err(StorageError::invalid_path(
            to.display(),
            "destination contains the source",
        ));
    }
    Ok(())
}

/// Reject deleting the root.
pub(crate) fn check_delete(path: &ResolvedPath) -> StorageResult<()> {
    if path.is_root() {
        return Err(StorageError::invalid_path(path.display(), "cannot delete the root"));
    }
    Ok(())
}

/// Whether `failed` holds `path` itself or anything below it.
pub(crate) fn has_failure_within(failed: &[String], path: &str) -> bool {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    failed.iter().any(|f| f == path || f.starts_with(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn resolved(raw: &str) -> ResolvedPath {
        PathResolver::object("bucket", "").unwrap().resolve(raw).await.unwrap()
    }

    #[tokio::test]
    async fn test_check_transfer_rejects_nesting() {
        let dir = resolved("/a").await;
        assert!(check_transfer(&dir, &resolved("/a").await).is_err());
        assert!(check_transfer(&dir, &resolved("/a/b").await).is_err());
        assert!(check_transfer(&dir, &resolved("/").await).is_err());
        assert!(check_transfer(&resolved("/").await, &resolved("/b").await).is_err());
        assert!(check_transfer(&resolved("/a/b").await, &dir).is_err());
        assert!(check_transfer(&resolved("/a/b/c").await, &dir).is_err());
        assert!(check_transfer(&dir, &resolved("/ab").await).is_ok());
        assert!(check_transfer(&resolved("/ab/c").await, &dir).is_ok());
        assert!(check_transfer(&dir, &resolved("/b/a").await).is_ok());
    }

    #[tokio::test]
    async fn test_check_delete_rejects_root() {
        let err = check_delete(&resolved("").await).unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
        assert!(check_delete(&resolved("/x").await).is_ok());
    }

    #[test]
    fn test_has_failure_within() {
        let failed = vec!["/x/b.txt".to_string(), "/y".to_string()];
        assert!(has_failure_within(&failed, "/x"));
        assert!(has_failure_within(&failed, "/y"));
        assert!(!has_failure_within(&failed, "/x/b"));
        assert!(!has_failure_within(&failed, "/xy"));
    }

    #[test]
    fn test_backend_kind_serde() {
        assert_eq!(serde_json::to_string(&BackendKind::Object).unwrap(), "\"object\"");
        assert_eq!(BackendKind::default(), BackendKind::Local);
        assert_eq!(BackendKind::Local.to_string(), "local");
    }
}

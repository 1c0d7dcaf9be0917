//! File manager facade.
//!
//! [`FileManager`] is what a request handler talks to. It takes raw relative
//! path strings, runs them through the lexical checks of [`PathResolver`]
//! before any backend is involved, confines them through the backend, and
//! then dispatches the operation. Every mutating operation emits exactly one
//! `tracing` event carrying its path(s) and outcome.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use protocol::{DirSummary, Entry, TreeNode};
use tracing::{info, warn};

use crate::backend::{
    BackendKind, LocalBackend, ObjectBackend, OpContext, S3Client, StorageBackend,
};
use crate::config::Config;
use crate::error::{StorageError, StorageResult};
use crate::path::{PathResolver, ResolvedPath};
use crate::tree::{TreeBuilder, DEFAULT_MAX_NODES};

/// Entry point for every storage operation.
pub struct FileManager {
    backend: Arc<dyn StorageBackend>,
    max_tree_depth: Option<usize>,
    max_tree_nodes: usize,
    operation_timeout: Option<std::time::Duration>,
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("max_tree_depth", &self.max_tree_depth)
            .field("max_tree_nodes", &self.max_tree_nodes)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl FileManager {
    /// Wrap a backend with unbounded tree depth and the default node cap.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            max_tree_depth: None,
            max_tree_nodes: DEFAULT_MAX_NODES,
            operation_timeout: None,
        }
    }

    /// Limit the trees this manager builds.
    pub fn with_tree_limits(mut self, max_depth: Option<usize>, max_nodes: usize) -> Self {
        self.max_tree_depth = max_depth;
        self.max_tree_nodes = max_nodes.max(1);
        self
    }

    /// Timeout applied to contexts created by [`FileManager::context`].
    pub fn with_operation_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Build the backend described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn StorageBackend> = match config.storage.backend {
            BackendKind::Local => {
                let root = &config.storage.root;
                Arc::new(LocalBackend::new(root).with_context(|| {
                    format!("Failed to open storage root: {}", root.display())
                })?)
            }
            BackendKind::Object => {
                let client = S3Client::new(&config.object)?;
                let backend =
                    ObjectBackend::new(Arc::new(client), &config.object.bucket, &config.object.prefix)
                        .with_context(|| {
                            format!("Invalid object prefix: {}", config.object.prefix)
                        })?;
                Arc::new(backend.with_page_size(config.limits.max_list_page_size))
            }
        };

        info!(backend = %config.storage.backend, "storage backend ready");
        Ok(Self::new(backend)
            .with_tree_limits(config.tree_depth(), config.limits.max_tree_nodes)
            .with_operation_timeout(config.operation_timeout()))
    }

    /// The backend requests are dispatched to.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// A fresh context carrying the configured timeout.
    pub fn context(&self) -> OpContext {
        OpContext::new().with_timeout(self.operation_timeout)
    }

    async fn resolve(&self, raw: &str) -> StorageResult<ResolvedPath> {
        let relative = PathResolver::parse(raw)?;
        self.backend.resolve(&relative).await
    }

    /// Resolution for operations that act on the named entry itself.
    async fn resolve_entry(&self, raw: &str) -> StorageResult<ResolvedPath> {
        let relative = PathResolver::parse(raw)?;
        self.backend.resolve_entry(&relative).await
    }

    /// List the immediate children of a directory.
    pub async fn list(&self, ctx: &OpContext, path: &str) -> StorageResult<Vec<Entry>> {
        let dir = self.resolve(path).await?;
        self.backend.list(ctx, &dir).await
    }

    /// Metadata for a single entry.
    pub async fn stat(&self, ctx: &OpContext, path: &str) -> StorageResult<Entry> {
        let target = self.resolve(path).await?;
        self.backend.stat(ctx, &target).await
    }

    /// Read a whole file.
    pub async fn read(&self, ctx: &OpContext, path: &str) -> StorageResult<Bytes> {
        let target = self.resolve(path).await?;
        self.backend.read(ctx, &target).await
    }

    /// Create or overwrite a file.
    pub async fn write(&self, ctx: &OpContext, path: &str, data: Bytes) -> StorageResult<()> {
        let result = async {
            let target = self.resolve(path).await?;
            self.backend.write(ctx, &target, data).await
        }
        .await;
        log_outcome("write", path, None, &result);
        result
    }

    /// Create a directory.
    pub async fn create_directory(&self, ctx: &OpContext, path: &str) -> StorageResult<()> {
        let result = async {
            let target = self.resolve(path).await?;
            self.backend.create_directory(ctx, &target).await
        }
        .await;
        log_outcome("create_directory", path, None, &result);
        result
    }

    /// Rename an entry inside its parent directory.
    ///
    /// `new_name` must be exactly one path segment. Returns the new path.
    pub async fn rename(&self, ctx: &OpContext, path: &str, new_name: &str) -> StorageResult<String> {
        let result = async {
            let relative = PathResolver::parse(path)?;
            let Some(parent) = relative.parent() else {
                return Err(StorageError::invalid_path(
                    relative.to_string(),
                    "cannot rename the root",
                ));
            };
            let name = PathResolver::parse_name(new_name)?;
            let renamed = parent.join(&name)?;

            let from = self.backend.resolve_entry(&relative).await?;
            let to = self.backend.resolve_entry(&renamed).await?;
            self.backend.move_entry(ctx, &from, &to, false).await?;
            Ok(to.display())
        }
        .await;
        log_outcome("rename", path, result.as_deref().ok(), &result);
        result
    }

    /// Move an entry.
    pub async fn move_entry(
        &self,
        ctx: &OpContext,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> StorageResult<()> {
        let result = async {
            let from = self.resolve_entry(source).await?;
            let to = self.resolve_entry(destination).await?;
            self.backend.move_entry(ctx, &from, &to, overwrite).await
        }
        .await;
        log_outcome("move", source, Some(destination), &result);
        result
    }

    /// Copy an entry, recursively for directories.
    pub async fn copy(
        &self,
        ctx: &OpContext,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> StorageResult<()> {
        let result = async {
            let from = self.resolve(source).await?;
            let to = self.resolve_entry(destination).await?;
            self.backend.copy(ctx, &from, &to, overwrite).await
        }
        .await;
        log_outcome("copy", source, Some(destination), &result);
        result
    }

    /// Delete an entry, recursively for directories.
    ///
    /// A symlink is removed itself; its target is left alone.
    pub async fn delete(&self, ctx: &OpContext, path: &str) -> StorageResult<()> {
        let result = async {
            let target = self.resolve_entry(path).await?;
            self.backend.delete(ctx, &target).await
        }
        .await;
        log_outcome("delete", path, None, &result);
        result
    }

    /// Build the tree below `path`.
    ///
    /// A requested depth can only tighten the configured limit.
    pub async fn tree(
        &self,
        ctx: &OpContext,
        path: &str,
        max_depth: Option<usize>,
    ) -> StorageResult<TreeNode> {
        let root = self.resolve(path).await?;
        let depth = match (max_depth, self.max_tree_depth) {
            (Some(requested), Some(limit)) => Some(requested.min(limit)),
            (requested, limit) => requested.or(limit),
        };
        TreeBuilder::new(Arc::clone(&self.backend))
            .max_depth(depth)
            .max_nodes(self.max_tree_nodes)
            .build(ctx, &root)
            .await
    }

    /// Totals for a directory subtree.
    pub async fn summarize(&self, ctx: &OpContext, path: &str) -> StorageResult<DirSummary> {
        let dir = self.resolve(path).await?;
        self.backend.summarize(ctx, &dir).await
    }
}

fn log_outcome<T>(
    operation: &'static str,
    path: &str,
    destination: Option<&str>,
    result: &StorageResult<T>,
) {
    match result {
        Ok(_) => info!(operation, path, destination, outcome = "ok", "storage mutation"),
        Err(err) => warn!(
            operation,
            path,
            destination,
            outcome = err.kind().as_str(),
            error = %err,
            "storage mutation failed"
        ),
    }
}

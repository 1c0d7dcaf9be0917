//! Local filesystem backend.
//!
//! All I/O goes through `tokio::fs`. Paths arrive already confined; the
//! backend only has to keep recursive walks from following symlinks out of
//! the root.

use std::fs::Metadata;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use protocol::{sort_entries, DirSummary, Entry};
use tokio::fs;
use tracing::{debug, warn};

use super::{check_delete, check_transfer, has_failure_within, BackendFuture, BackendKind, OpContext, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::path::{is_within, PathResolver, RelativePath, ResolvedPath, Root};

/// Storage backend over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    resolver: PathResolver,
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at an existing directory.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let resolver = PathResolver::local(root)?;
        let root = match resolver.root() {
            Root::Directory(dir) => dir.clone(),
            Root::Prefix { prefix, .. } => {
                return Err(StorageError::invalid_path(prefix.clone(), "not a directory root"))
            }
        };
        Ok(Self { resolver, root })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn list_dir(&self, ctx: &OpContext, dir: &ResolvedPath) -> StorageResult<Vec<Entry>> {
        let shown = dir.display();
        let target = local_path(dir)?;

        let metadata = step(ctx, &shown, fs::metadata(target)).await?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(shown));
        }

        let mut reader = step(ctx, &shown, fs::read_dir(target)).await?;
        let mut entries = Vec::new();
        loop {
            ctx.check(&shown)?;
            let Some(child) = step(ctx, &shown, reader.next_entry()).await? else {
                break;
            };

            let Ok(name) = child.file_name().into_string() else {
                debug!(dir = %shown, "skipping entry with a non UTF-8 name");
                continue;
            };
            let Ok(relative) = dir.relative().join(&name) else {
                warn!(dir = %shown, name = ?name, "skipping entry whose name cannot be addressed");
                continue;
            };

            let file_type = step(ctx, &shown, child.file_type()).await?;
            let metadata = if file_type.is_symlink() {
                match self.follow_link(&child.path()).await {
                    Some(metadata) => metadata,
                    None => {
                        debug!(path = %relative, "omitting symlink that is dangling or leaves the root");
                        continue;
                    }
                }
            } else {
                match child.metadata().await {
                    Ok(metadata) => metadata,
                    // Removed between read_dir and metadata.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(StorageError::from_io(e, relative.to_string())),
                }
            };
            entries.push(entry_from_metadata(&relative, &metadata));
        }

        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Metadata of a symlink target, if the target exists inside the root.
    async fn follow_link(&self, link: &Path) -> Option<Metadata> {
        let target = fs::canonicalize(link).await.ok()?;
        if !is_within(&self.root, &target) {
            return None;
        }
        fs::metadata(&target).await.ok()
    }

    async fn stat_entry(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<Entry> {
        let shown = path.display();
        let metadata = step(ctx, &shown, fs::metadata(local_path(path)?)).await?;
        Ok(entry_from_metadata(path.relative(), &metadata))
    }

    async fn read_file(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<Bytes> {
        let shown = path.display();
        let target = local_path(path)?;
        let metadata = step(ctx, &shown, fs::metadata(target)).await?;
        if metadata.is_dir() {
            return Err(StorageError::IsADirectory(shown));
        }
        let data = step(ctx, &shown, fs::read(target)).await?;
        Ok(Bytes::from(data))
    }

    /// Write to a temporary sibling, then rename it over the target.
    async fn write_file(&self, ctx: &OpContext, path: &ResolvedPath, data: Bytes) -> StorageResult<()> {
        let shown = path.display();
        let (Some(parent), Some(name)) = (path.relative().parent(), path.relative().file_name()) else {
            return Err(StorageError::IsADirectory(shown));
        };
        let target = local_path(path)?;
        let parent_dir = target
            .parent()
            .ok_or_else(|| StorageError::IsADirectory(shown.clone()))?;

        let parent_shown = parent.to_string();
        let parent_meta = step(ctx, &parent_shown, fs::metadata(parent_dir)).await?;
        if !parent_meta.is_dir() {
            return Err(StorageError::NotADirectory(parent_shown));
        }
        match fs::symlink_metadata(target).await {
            Ok(existing) if existing.is_dir() => return Err(StorageError::IsADirectory(shown)),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::from_io(e, shown)),
        }

        // The blocking pool finishes a write even when its future is dropped,
        // so these two calls run to completion and cleanup sees the temp file.
        ctx.check(&shown)?;
        let temp_path = parent_dir.join(format!(".{}.{:08x}.tmp", name, rand::random::<u32>()));
        let result = match fs::write(&temp_path, &data).await {
            Ok(()) => fs::rename(&temp_path, target).await,
            Err(e) => Err(e),
        }
        .map_err(|e| StorageError::from_io(e, shown.clone()));

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = ?temp_path, error = %e, "Failed to cleanup temp file after write failure");
                }
            }
        }
        result
    }

    async fn make_dir(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<()> {
        let shown = path.display();
        if path.is_root() {
            return Err(StorageError::AlreadyExists(shown));
        }
        let target = local_path(path)?;
        match step(ctx, &shown, fs::create_dir(target)).await {
            Err(StorageError::NotFound(_)) => {
                let parent = path.relative().parent().unwrap_or_default();
                Err(StorageError::NotFound(parent.to_string()))
            }
            other => other,
        }
    }

    async fn move_path(
        &self,
        ctx: &OpContext,
        from: &ResolvedPath,
        to: &ResolvedPath,
        overwrite: bool,
    ) -> StorageResult<()> {
        check_transfer(from, to)?;
        let source = local_path(from)?;
        let destination = local_path(to)?;
        check_nesting(to, source, destination)?;

        step(ctx, &from.display(), fs::symlink_metadata(source)).await?;
        self.clear_destination(ctx, to, destination, overwrite).await?;
        step(ctx, &to.display(), fs::rename(source, destination)).await
    }

    async fn copy_path(
        &self,
        ctx: &OpContext,
        from: &ResolvedPath,
        to: &ResolvedPath,
        overwrite: bool,
    ) -> StorageResult<()> {
        check_transfer(from, to)?;
        let source = local_path(from)?;
        let destination = local_path(to)?;
        check_nesting(to, source, destination)?;

        let metadata = step(ctx, &from.display(), fs::metadata(source)).await?;
        self.clear_destination(ctx, to, destination, overwrite).await?;

        if metadata.is_dir() {
            self.copy_tree(ctx, from.relative(), source, to.relative(), destination)
                .await
        } else {
            step(ctx, &to.display(), fs::copy(source, destination)).await?;
            Ok(())
        }
    }

    /// Fail with `AlreadyExists` when the destination is occupied, or remove
    /// it when overwriting.
    async fn clear_destination(
        &self,
        ctx: &OpContext,
        to: &ResolvedPath,
        destination: &Path,
        overwrite: bool,
    ) -> StorageResult<()> {
        let shown = to.display();
        let existing = match fs::symlink_metadata(destination).await {
            Ok(existing) => existing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::from_io(e, shown)),
        };
        if !overwrite {
            return Err(StorageError::AlreadyExists(shown));
        }
        if existing.is_dir() {
            self.remove_tree(ctx, to.relative(), destination).await
        } else {
            step(ctx, &shown, fs::remove_file(destination)).await
        }
    }

    /// Copy a directory tree. Symlinks inside the tree are not copied.
    async fn copy_tree(
        &self,
        ctx: &OpContext,
        from: &RelativePath,
        source: &Path,
        to: &RelativePath,
        destination: &Path,
    ) -> StorageResult<()> {
        let mut pending = vec![(source.to_path_buf(), destination.to_path_buf(), to.to_string())];
        while let Some((src_dir, dst_dir, shown)) = pending.pop() {
            ctx.check(&from.to_string())?;
            step(ctx, &shown, fs::create_dir(&dst_dir)).await?;

            let mut reader = step(ctx, &shown, fs::read_dir(&src_dir)).await?;
            while let Some(child) = step(ctx, &shown, reader.next_entry()).await? {
                ctx.check(&shown)?;
                let name = child.file_name();
                let child_shown = format!("{}/{}", shown, name.to_string_lossy());
                let file_type = step(ctx, &child_shown, child.file_type()).await?;
                if file_type.is_dir() {
                    pending.push((child.path(), dst_dir.join(&name), child_shown));
                } else if file_type.is_file() {
                    step(ctx, &child_shown, fs::copy(child.path(), dst_dir.join(&name))).await?;
                } else {
                    debug!(path = %child_shown, "not copying special file or symlink");
                }
            }
        }
        Ok(())
    }

    async fn delete_path(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<()> {
        check_delete(path)?;
        let shown = path.display();
        let target = local_path(path)?;
        let metadata = step(ctx, &shown, fs::symlink_metadata(target)).await?;
        if metadata.is_dir() {
            self.remove_tree(ctx, path.relative(), target).await
        } else {
            step(ctx, &shown, fs::remove_file(target)).await
        }
    }

    /// Post-order removal that keeps going past failures and reports every
    /// entry left behind. Cancellation aborts the walk.
    async fn remove_tree(&self, ctx: &OpContext, relative: &RelativePath, dir: &Path) -> StorageResult<()> {
        enum Visit {
            Enter(PathBuf, String),
            Leave(PathBuf, String),
        }

        let top = relative.to_string();
        let mut failed: Vec<String> = Vec::new();
        let mut stack = vec![Visit::Enter(dir.to_path_buf(), top.clone())];

        while let Some(visit) = stack.pop() {
            ctx.check(&top)?;
            match visit {
                Visit::Enter(path, shown) => {
                    stack.push(Visit::Leave(path.clone(), shown.clone()));
                    let mut reader = match step(ctx, &shown, fs::read_dir(&path)).await {
                        Ok(reader) => reader,
                        Err(e) => {
                            record_failure(&mut failed, shown, e)?;
                            continue;
                        }
                    };
                    loop {
                        ctx.check(&top)?;
                        let child = match step(ctx, &shown, reader.next_entry()).await {
                            Ok(Some(child)) => child,
                            Ok(None) => break,
                            Err(e) => {
                                record_failure(&mut failed, shown.clone(), e)?;
                                break;
                            }
                        };
                        let child_shown = format!("{}/{}", shown, child.file_name().to_string_lossy());
                        let is_dir = match child.file_type().await {
                            Ok(file_type) => file_type.is_dir(),
                            Err(e) => {
                                record_failure(&mut failed, child_shown.clone(), StorageError::from_io(e, child_shown))?;
                                continue;
                            }
                        };
                        if is_dir {
                            stack.push(Visit::Enter(child.path(), child_shown));
                        } else if let Err(e) = step(ctx, &child_shown, fs::remove_file(child.path())).await {
                            record_failure(&mut failed, child_shown, e)?;
                        }
                    }
                }
                Visit::Leave(path, shown) => {
                    if has_failure_within(&failed, &shown) {
                        continue;
                    }
                    if let Err(e) = step(ctx, &shown, fs::remove_dir(&path)).await {
                        record_failure(&mut failed, shown, e)?;
                    }
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            warn!(path = %top, failed = failed.len(), "recursive delete left entries behind");
            Err(StorageError::PartialDelete { path: top, failed })
        }
    }

    async fn summarize_dir(&self, ctx: &OpContext, dir: &ResolvedPath) -> StorageResult<DirSummary> {
        let shown = dir.display();
        let target = local_path(dir)?;
        let metadata = step(ctx, &shown, fs::metadata(target)).await?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(shown));
        }

        let mut summary = DirSummary::default();
        let mut pending = vec![target.to_path_buf()];
        while let Some(current) = pending.pop() {
            ctx.check(&shown)?;
            let mut reader = step(ctx, &shown, fs::read_dir(&current)).await?;
            while let Some(child) = step(ctx, &shown, reader.next_entry()).await? {
                ctx.check(&shown)?;
                let file_type = step(ctx, &shown, child.file_type()).await?;
                if file_type.is_dir() {
                    summary.folders += 1;
                    pending.push(child.path());
                } else if file_type.is_file() {
                    let metadata = step(ctx, &shown, child.metadata()).await?;
                    summary.files += 1;
                    summary.size += metadata.len();
                }
            }
        }
        Ok(summary)
    }
}

impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    fn list<'a>(&'a self, ctx: &'a OpContext, dir: &'a ResolvedPath) -> BackendFuture<'a, Vec<Entry>> {
        Box::pin(self.list_dir(ctx, dir))
    }

    fn stat<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath) -> BackendFuture<'a, Entry> {
        Box::pin(self.stat_entry(ctx, path))
    }

    fn read<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath) -> BackendFuture<'a, Bytes> {
        Box::pin(self.read_file(ctx, path))
    }

    fn write<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath, data: Bytes) -> BackendFuture<'a, ()> {
        Box::pin(self.write_file(ctx, path, data))
    }

    fn create_directory<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath) -> BackendFuture<'a, ()> {
        Box::pin(self.make_dir(ctx, path))
    }

    fn move_entry<'a>(
        &'a self,
        ctx: &'a OpContext,
        from: &'a ResolvedPath,
        to: &'a ResolvedPath,
        overwrite: bool,
    ) -> BackendFuture<'a, ()> {
        Box::pin(self.move_path(ctx, from, to, overwrite))
    }

    fn copy<'a>(
        &'a self,
        ctx: &'a OpContext,
        from: &'a ResolvedPath,
        to: &'a ResolvedPath,
        overwrite: bool,
    ) -> BackendFuture<'a, ()> {
        Box::pin(self.copy_path(ctx, from, to, overwrite))
    }

    fn delete<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath) -> BackendFuture<'a, ()> {
        Box::pin(self.delete_path(ctx, path))
    }

    fn summarize<'a>(&'a self, ctx: &'a OpContext, dir: &'a ResolvedPath) -> BackendFuture<'a, DirSummary> {
        Box::pin(self.summarize_dir(ctx, dir))
    }
}

/// Run one filesystem call under the context, classifying its error.
async fn step<T, F>(ctx: &OpContext, shown: &str, call: F) -> StorageResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    ctx.run(shown, async { call.await.map_err(|e| StorageError::from_io(e, shown)) })
        .await
}

fn local_path(path: &ResolvedPath) -> StorageResult<&Path> {
    path.fs_path()
        .ok_or_else(|| StorageError::invalid_path(path.display(), "not resolved against a local root"))
}

/// Nesting check on the resolved locations, which catches source and
/// destination that only overlap through a symlinked parent.
fn check_nesting(to: &ResolvedPath, source: &Path, destination: &Path) -> StorageResult<()> {
    if is_within(source, destination) {
        return Err(StorageError::invalid_path(to.display(), "destination is inside the source"));
    }
    if is_within(destination, source) {
        return Err(StorageError::invalid_path(to.display(), "destination contains the source"));
    }
    Ok(())
}

fn entry_from_metadata(relative: &RelativePath, metadata: &Metadata) -> Entry {
    let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
    if metadata.is_dir() {
        Entry::directory(relative.to_string(), modified)
    } else {
        Entry::file(relative.to_string(), metadata.len(), modified)
    }
}

/// Remember a failed entry; cancellation is not a per-entry failure.
fn record_failure(failed: &mut Vec<String>, shown: String, err: StorageError) -> StorageResult<()> {
    if let StorageError::Cancelled(_) = err {
        return Err(err);
    }
    debug!(path = %shown, error = %err, "delete failed");
    failed.push(shown);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::EntryKind;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn setup() -> (TempDir, LocalBackend) {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();
        (temp, backend)
    }

    async fn resolve(backend: &LocalBackend, raw: &str) -> ResolvedPath {
        backend.resolver().resolve(raw).await.unwrap()
    }

    async fn resolve_entry(backend: &LocalBackend, raw: &str) -> ResolvedPath {
        backend.resolver().resolve_entry(raw).await.unwrap()
    }

    #[tokio::test]
    async fn test_list_sorted_directories_first() {
        let (temp, backend) = setup();
        std::fs::write(temp.path().join("b.txt"), b"b").unwrap();
        std::fs::create_dir(temp.path().join("A")).unwrap();
        let ctx = OpContext::new();

        let entries = backend.list(&ctx, &resolve(&backend, "/").await).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "b.txt"]);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].path, "/A");
        assert_eq!(entries[1].size, 1);
    }

    #[tokio::test]
    async fn test_list_errors() {
        let (temp, backend) = setup();
        std::fs::write(temp.path().join("file"), b"x").unwrap();
        let ctx = OpContext::new();

        let err = backend.list(&ctx, &resolve(&backend, "missing").await).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        let err = backend.list(&ctx, &resolve(&backend, "file").await).await.unwrap_err();
        assert_eq!(err, StorageError::NotADirectory("/file".to_string()));
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (_temp, backend) = setup();
        let ctx = OpContext::new();

        for (name, payload) in [("empty.bin", Vec::new()), ("data.bin", vec![0u8, 1, 2, 255])] {
            let path = resolve(&backend, name).await;
            backend.write(&ctx, &path, Bytes::from(payload.clone())).await.unwrap();
            let data = backend.read(&ctx, &path).await.unwrap();
            assert_eq!(data.as_ref(), payload.as_slice());
        }
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let (temp, backend) = setup();
        let ctx = OpContext::new();
        let path = resolve(&backend, "a.txt").await;

        backend.write(&ctx, &path, Bytes::from_static(b"one")).await.unwrap();
        backend.write(&ctx, &path, Bytes::from_static(b"two")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
        assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_write_errors() {
        let (temp, backend) = setup();
        std::fs::create_dir(temp.path().join("dir")).unwrap();
        let ctx = OpContext::new();

        let err = backend
            .write(&ctx, &resolve(&backend, "missing/a.txt").await, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("/missing".to_string()));

        let err = backend
            .write(&ctx, &resolve(&backend, "dir").await, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::IsADirectory("/dir".to_string()));

        let err = backend.read(&ctx, &resolve(&backend, "dir").await).await.unwrap_err();
        assert_eq!(err, StorageError::IsADirectory("/dir".to_string()));
    }

    #[tokio::test]
    async fn test_create_directory_twice() {
        let (temp, backend) = setup();
        let ctx = OpContext::new();
        let path = resolve(&backend, "photos").await;

        backend.create_directory(&ctx, &path).await.unwrap();
        std::fs::write(temp.path().join("photos/keep.jpg"), b"jpg").unwrap();

        let err = backend.create_directory(&ctx, &path).await.unwrap_err();
        assert_eq!(err, StorageError::AlreadyExists("/photos".to_string()));
        assert!(temp.path().join("photos/keep.jpg").exists());

        let err = backend
            .create_directory(&ctx, &resolve(&backend, "nope/inner").await)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("/nope".to_string()));
    }

    #[tokio::test]
    async fn test_move_without_overwrite_keeps_both() {
        let (temp, backend) = setup();
        std::fs::write(temp.path().join("src.txt"), b"src").unwrap();
        std::fs::write(temp.path().join("dst.txt"), b"dst").unwrap();
        let ctx = OpContext::new();

        let from = resolve(&backend, "src.txt").await;
        let to = resolve(&backend, "dst.txt").await;
        let err = backend.move_entry(&ctx, &from, &to, false).await.unwrap_err();
        assert_eq!(err, StorageError::AlreadyExists("/dst.txt".to_string()));
        assert_eq!(std::fs::read(temp.path().join("src.txt")).unwrap(), b"src");
        assert_eq!(std::fs::read(temp.path().join("dst.txt")).unwrap(), b"dst");

        backend.move_entry(&ctx, &from, &to, true).await.unwrap();
        assert!(!temp.path().join("src.txt").exists());
        assert_eq!(std::fs::read(temp.path().join("dst.txt")).unwrap(), b"src");
    }

    #[tokio::test]
    async fn test_move_into_own_descendant() {
        let (temp, backend) = setup();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
        let ctx = OpContext::new();

        let err = backend
            .move_entry(&ctx, &resolve(&backend, "a").await, &resolve(&backend, "a/b/c").await, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
        assert!(temp.path().join("a/b").is_dir());
    }

    #[tokio::test]
    async fn test_transfer_onto_ancestor_keeps_source() {
        let (temp, backend) = setup();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
        std::fs::write(temp.path().join("a/b/f.txt"), b"f").unwrap();
        let ctx = OpContext::new();
        let from = resolve_entry(&backend, "a/b").await;
        let to = resolve_entry(&backend, "a").await;

        let err = backend.move_entry(&ctx, &from, &to, true).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
        let err = backend.copy(&ctx, &from, &to, true).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
        assert_eq!(std::fs::read(temp.path().join("a/b/f.txt")).unwrap(), b"f");
    }

    #[tokio::test]
    async fn test_copy_directory_recursively() {
        let (temp, backend) = setup();
        std::fs::create_dir_all(temp.path().join("src/nested")).unwrap();
        std::fs::write(temp.path().join("src/a.txt"), b"a").unwrap();
        std::fs::write(temp.path().join("src/nested/b.txt"), b"bb").unwrap();
        let ctx = OpContext::new();

        backend
            .copy(&ctx, &resolve(&backend, "src").await, &resolve(&backend, "dst").await, false)
            .await
            .unwrap();
        assert_eq!(std::fs::read(temp.path().join("dst/a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(temp.path().join("dst/nested/b.txt")).unwrap(), b"bb");
        assert!(temp.path().join("src/a.txt").exists());

        let err = backend
            .copy(&ctx, &resolve(&backend, "missing").await, &resolve(&backend, "x").await, false)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("/missing".to_string()));
    }

    #[tokio::test]
    async fn test_delete_recursive() {
        let (temp, backend) = setup();
        std::fs::create_dir_all(temp.path().join("x/y")).unwrap();
        std::fs::write(temp.path().join("x/a.txt"), b"a").unwrap();
        std::fs::write(temp.path().join("x/y/b.txt"), b"b").unwrap();
        let ctx = OpContext::new();

        backend.delete(&ctx, &resolve(&backend, "x").await).await.unwrap();
        assert!(!temp.path().join("x").exists());

        let err = backend.delete(&ctx, &resolve(&backend, "x").await).await.unwrap_err();
        assert_eq!(err, StorageError::NotFound("/x".to_string()));

        let err = backend.delete(&ctx, &resolve(&backend, "/").await).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_delete_cancelled() {
        let (temp, backend) = setup();
        std::fs::create_dir_all(temp.path().join("x")).unwrap();
        std::fs::write(temp.path().join("x/a.txt"), b"a").unwrap();
        let token = CancellationToken::new();
        let ctx = OpContext::new().with_cancellation(token.clone());
        let path = resolve(&backend, "x").await;
        token.cancel();

        let err = backend.delete(&ctx, &path).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled(_)));
        assert!(temp.path().join("x/a.txt").exists());
    }

    #[tokio::test]
    async fn test_summarize() {
        let (temp, backend) = setup();
        std::fs::create_dir_all(temp.path().join("docs/old")).unwrap();
        std::fs::write(temp.path().join("docs/a.txt"), b"12345").unwrap();
        std::fs::write(temp.path().join("docs/old/b.txt"), b"678").unwrap();
        std::fs::write(temp.path().join("top.txt"), b"9").unwrap();
        let ctx = OpContext::new();

        let summary = backend.summarize(&ctx, &resolve(&backend, "/").await).await.unwrap();
        assert_eq!(
            summary,
            DirSummary {
                size: 9,
                files: 3,
                folders: 2
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_omits_escaping_symlinks() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"s").unwrap();
        let (temp, backend) = setup();
        std::fs::write(temp.path().join("inside.txt"), b"i").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("inside.txt"), temp.path().join("alias.txt")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), temp.path().join("dangling")).unwrap();
        let ctx = OpContext::new();

        let entries = backend.list(&ctx, &resolve(&backend, "/").await).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alias.txt", "inside.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_symlink_removes_link_only() {
        let (temp, backend) = setup();
        std::fs::write(temp.path().join("inside.txt"), b"i").unwrap();
        std::fs::create_dir(temp.path().join("real")).unwrap();
        std::fs::write(temp.path().join("real/keep.txt"), b"k").unwrap();
        std::os::unix::fs::symlink(temp.path().join("inside.txt"), temp.path().join("alias.txt")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("linkdir")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), temp.path().join("dangling")).unwrap();
        let ctx = OpContext::new();

        for name in ["alias.txt", "linkdir", "dangling"] {
            backend.delete(&ctx, &resolve_entry(&backend, name).await).await.unwrap();
            assert!(std::fs::symlink_metadata(temp.path().join(name)).is_err(), "{name}");
        }
        assert_eq!(std::fs::read(temp.path().join("inside.txt")).unwrap(), b"i");
        assert_eq!(std::fs::read(temp.path().join("real/keep.txt")).unwrap(), b"k");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_move_symlink_moves_link_only() {
        let (temp, backend) = setup();
        std::fs::create_dir(temp.path().join("real")).unwrap();
        std::fs::write(temp.path().join("real/keep.txt"), b"k").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("linkdir")).unwrap();
        let ctx = OpContext::new();

        let from = resolve_entry(&backend, "linkdir").await;
        let to = resolve_entry(&backend, "renamed").await;
        backend.move_entry(&ctx, &from, &to, false).await.unwrap();

        assert!(std::fs::symlink_metadata(temp.path().join("renamed")).unwrap().file_type().is_symlink());
        assert!(!temp.path().join("linkdir").exists());
        assert_eq!(std::fs::read(temp.path().join("real/keep.txt")).unwrap(), b"k");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overwrite_symlink_destination_keeps_target() {
        let (temp, backend) = setup();
        std::fs::write(temp.path().join("inside.txt"), b"i").unwrap();
        std::fs::write(temp.path().join("new.txt"), b"n").unwrap();
        std::os::unix::fs::symlink(temp.path().join("inside.txt"), temp.path().join("alias.txt")).unwrap();
        let ctx = OpContext::new();

        let from = resolve_entry(&backend, "new.txt").await;
        let to = resolve_entry(&backend, "alias.txt").await;
        backend.move_entry(&ctx, &from, &to, true).await.unwrap();

        assert_eq!(std::fs::read(temp.path().join("alias.txt")).unwrap(), b"n");
        assert!(!std::fs::symlink_metadata(temp.path().join("alias.txt")).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read(temp.path().join("inside.txt")).unwrap(), b"i");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transfer_nesting_through_symlinked_parent() {
        let (temp, backend) = setup();
        std::fs::create_dir_all(temp.path().join("real/b")).unwrap();
        std::fs::write(temp.path().join("real/b/f.txt"), b"f").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("linkdir")).unwrap();
        let ctx = OpContext::new();

        let real = resolve_entry(&backend, "real").await;
        let into_self = resolve_entry(&backend, "linkdir/x").await;
        let err = backend.copy(&ctx, &real, &into_self, false).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));

        let inner = resolve_entry(&backend, "linkdir/b").await;
        let err = backend.move_entry(&ctx, &inner, &real, true).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
        assert_eq!(std::fs::read(temp.path().join("real/b/f.txt")).unwrap(), b"f");
        assert!(!temp.path().join("real/x").exists());
    }

    #[tokio::test]
    async fn test_write_with_expired_timeout_leaves_no_temp_files() {
        let (temp, backend) = setup();
        let path = resolve(&backend, "a.txt").await;
        let ctx = OpContext::new().with_timeout(Some(std::time::Duration::from_nanos(1)));

        let _ = backend.write(&ctx, &path, Bytes::from(vec![7u8; 1 << 20])).await;

        let leftovers: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}

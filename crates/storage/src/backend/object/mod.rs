//! Object-store backend.
//!
//! Keys are the root prefix followed by the path segments joined by `/`.
//! A directory is a zero-byte marker object at `key + "/"`; a non-root
//! directory exists only while its marker does. The root always exists.

pub mod client;
pub mod memory;
pub mod s3;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use protocol::{sort_entries, DirSummary, Entry};
use tracing::{debug, warn};

use super::{check_delete, check_transfer, has_failure_within, BackendFuture, BackendKind, OpContext, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::path::{PathResolver, RelativePath, ResolvedPath, Root};

pub use client::{ListPage, ObjectClient, ObjectError, ObjectMeta, ObjectResult};
pub use memory::MemoryObjectClient;
pub use s3::S3Client;

/// Largest page a listing request may ask for.
pub const MAX_LIST_PAGE_SIZE: usize = 1000;

const DELIMITER: &str = "/";

/// What lives at a path.
enum Probe {
    File(ObjectMeta),
    Directory,
    Missing,
}

/// Storage backend over an S3-compatible bucket.
pub struct ObjectBackend {
    client: Arc<dyn ObjectClient>,
    resolver: PathResolver,
    prefix: String,
    page_size: usize,
}

impl std::fmt::Debug for ObjectBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBackend")
            .field("root", self.resolver.root())
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl ObjectBackend {
    /// Create a backend for `bucket`, rooted at `prefix`.
    pub fn new(client: Arc<dyn ObjectClient>, bucket: &str, prefix: &str) -> StorageResult<Self> {
        let resolver = PathResolver::object(bucket, prefix)?;
        let prefix = match resolver.root() {
            Root::Prefix { prefix, .. } => prefix.clone(),
            Root::Directory(dir) => {
                return Err(StorageError::invalid_path(dir.display().to_string(), "not a key prefix"))
            }
        };
        Ok(Self {
            client,
            resolver,
            prefix,
            page_size: MAX_LIST_PAGE_SIZE,
        })
    }

    /// Set the listing page size, clamped to `1..=1000`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_LIST_PAGE_SIZE);
        self
    }

    /// The listing page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    fn file_key(&self, relative: &RelativePath) -> String {
        format!("{}{}", self.prefix, relative.as_key())
    }

    /// Marker key of a directory; the prefix itself for the root.
    fn dir_key(&self, relative: &RelativePath) -> String {
        if relative.is_root() {
            self.prefix.clone()
        } else {
            format!("{}{}/", self.prefix, relative.as_key())
        }
    }

    /// Root-relative display form of a key.
    fn display_key(&self, key: &str) -> String {
        let relative = key.strip_prefix(self.prefix.as_str()).unwrap_or(key);
        format!("/{}", relative.trim_end_matches('/'))
    }

    /// Run one client call under the context.
    async fn call<T>(
        &self,
        ctx: &OpContext,
        shown: &str,
        request: client::ClientFuture<'_, T>,
    ) -> StorageResult<T> {
        ctx.run(shown, async { request.await.map_err(|e| e.into_storage(shown)) })
            .await
    }

    async fn probe(&self, ctx: &OpContext, relative: &RelativePath) -> StorageResult<Probe> {
        if relative.is_root() {
            return Ok(Probe::Directory);
        }
        let shown = relative.to_string();
        let key = self.file_key(relative);
        if let Some(meta) = self.call(ctx, &shown, self.client.head(&key)).await? {
            return Ok(Probe::File(meta));
        }
        let marker = self.dir_key(relative);
        if self.call(ctx, &shown, self.client.head(&marker)).await?.is_some() {
            return Ok(Probe::Directory);
        }
        Ok(Probe::Missing)
    }

    /// Follow continuation tokens until the listing is exhausted.
    async fn list_all(
        &self,
        ctx: &OpContext,
        shown: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> StorageResult<(Vec<ObjectMeta>, Vec<String>)> {
        let mut objects = Vec::new();
        let mut common_prefixes = Vec::new();
        let mut token: Option<String> = None;
        loop {
            ctx.check(shown)?;
            let page = self
                .call(
                    ctx,
                    shown,
                    self.client
                        .list_page(prefix, delimiter, token.clone(), self.page_size),
                )
                .await?;
            objects.extend(page.objects);
            common_prefixes.extend(page.common_prefixes);
            match page.next_token {
                None => break,
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(StorageError::io_fault(shown, "listing continuation token did not advance"));
                }
                Some(next) => token = Some(next),
            }
        }
        Ok((objects, common_prefixes))
    }

    /// Fail unless the parent directory of `relative` exists.
    async fn ensure_parent(&self, ctx: &OpContext, relative: &RelativePath) -> StorageResult<()> {
        let Some(parent) = relative.parent() else {
            return Ok(());
        };
        match self.probe(ctx, &parent).await? {
            Probe::Directory => Ok(()),
            Probe::File(_) => Err(StorageError::NotADirectory(parent.to_string())),
            Probe::Missing => Err(StorageError::NotFound(parent.to_string())),
        }
    }

    async fn list_dir(&self, ctx: &OpContext, dir: &ResolvedPath) -> StorageResult<Vec<Entry>> {
        let shown = dir.display();
        match self.probe(ctx, dir.relative()).await? {
            Probe::Directory => {}
            Probe::File(_) => return Err(StorageError::NotADirectory(shown)),
            Probe::Missing => return Err(StorageError::NotFound(shown)),
        }

        let dir_key = self.dir_key(dir.relative());
        let (objects, common_prefixes) = self
            .list_all(ctx, &shown, &dir_key, Some(DELIMITER))
            .await?;

        let mut entries = Vec::new();
        let mut seen_dirs = HashSet::new();
        for common in &common_prefixes {
            let name = common[dir_key.len()..].trim_end_matches('/');
            if name.is_empty() || !seen_dirs.insert(name.to_string()) {
                continue;
            }
            match dir.relative().join(name) {
                Ok(relative) => entries.push(Entry::synthesized_directory(relative.to_string())),
                Err(_) => debug!(dir = %shown, prefix = %common, "skipping prefix with an unsupported name"),
            }
        }

        let mut seen_files = HashSet::new();
        for object in &objects {
            let name = &object.key[dir_key.len()..];
            // Own marker, or a key that would have been grouped.
            if name.is_empty() || name.contains('/') || !seen_files.insert(name.to_string()) {
                continue;
            }
            match dir.relative().join(name) {
                Ok(relative) => entries.push(Entry::file(
                    relative.to_string(),
                    object.size,
                    object.last_modified.unwrap_or(UNIX_EPOCH),
                )),
                Err(_) => debug!(dir = %shown, key = %object.key, "skipping key with an unsupported name"),
            }
        }

        sort_entries(&mut entries);
        Ok(entries)
    }

    async fn stat_entry(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<Entry> {
        let shown = path.display();
        match self.probe(ctx, path.relative()).await? {
            Probe::File(meta) => Ok(Entry::file(
                shown,
                meta.size,
                meta.last_modified.unwrap_or(UNIX_EPOCH),
            )),
            Probe::Directory => Ok(Entry::synthesized_directory(shown)),
            Probe::Missing => Err(StorageError::NotFound(shown)),
        }
    }

    async fn read_object(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<Bytes> {
        let shown = path.display();
        if path.is_root() {
            return Err(StorageError::IsADirectory(shown));
        }
        let key = self.file_key(path.relative());
        if let Some(data) = self.call(ctx, &shown, self.client.get(&key)).await? {
            return Ok(data);
        }
        match self.probe(ctx, path.relative()).await? {
            Probe::Directory => Err(StorageError::IsADirectory(shown)),
            _ => Err(StorageError::NotFound(shown)),
        }
    }

    async fn write_object(&self, ctx: &OpContext, path: &ResolvedPath, data: Bytes) -> StorageResult<()> {
        let shown = path.display();
        if path.is_root() {
            return Err(StorageError::IsADirectory(shown));
        }
        self.ensure_parent(ctx, path.relative()).await?;
        let marker = self.dir_key(path.relative());
        if self.call(ctx, &shown, self.client.head(&marker)).await?.is_some() {
            return Err(StorageError::IsADirectory(shown));
        }
        let key = self.file_key(path.relative());
        self.call(ctx, &shown, self.client.put(&key, data)).await
    }

    async fn make_dir(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<()> {
        let shown = path.display();
        if !matches!(self.probe(ctx, path.relative()).await?, Probe::Missing) {
            return Err(StorageError::AlreadyExists(shown));
        }
        self.ensure_parent(ctx, path.relative()).await?;
        let marker = self.dir_key(path.relative());
        self.call(ctx, &shown, self.client.put(&marker, Bytes::new())).await
    }

    async fn copy_path(
        &self,
        ctx: &OpContext,
        from: &ResolvedPath,
        to: &ResolvedPath,
        overwrite: bool,
    ) -> StorageResult<()> {
        check_transfer(from, to)?;
        let source = self.probe(ctx, from.relative()).await?;
        if let Probe::Missing = source {
            return Err(StorageError::NotFound(from.display()));
        }

        if !matches!(self.probe(ctx, to.relative()).await?, Probe::Missing) {
            if !overwrite {
                return Err(StorageError::AlreadyExists(to.display()));
            }
            self.delete_path(ctx, to).await?;
        }
        self.ensure_parent(ctx, to.relative()).await?;

        match source {
            Probe::File(_) => {
                let from_key = self.file_key(from.relative());
                let to_key = self.file_key(to.relative());
                self.copy_object(ctx, &from_key, &to_key).await
            }
            _ => {
                let shown = from.display();
                let from_dir = self.dir_key(from.relative());
                let to_dir = self.dir_key(to.relative());
                let (objects, _) = self.list_all(ctx, &shown, &from_dir, None).await?;
                for object in &objects {
                    ctx.check(&shown)?;
                    let target = format!("{}{}", to_dir, &object.key[from_dir.len()..]);
                    self.copy_object(ctx, &object.key, &target).await?;
                }
                Ok(())
            }
        }
    }

    /// Server-side copy when available, otherwise download and upload.
    async fn copy_object(&self, ctx: &OpContext, from_key: &str, to_key: &str) -> StorageResult<()> {
        let shown = self.display_key(to_key);
        if self.client.supports_server_side_copy() {
            return self.call(ctx, &shown, self.client.copy(from_key, to_key)).await;
        }
        let data = self
            .call(ctx, &shown, self.client.get(from_key))
            .await?
            .ok_or_else(|| StorageError::NotFound(self.display_key(from_key)))?;
        self.call(ctx, &shown, self.client.put(to_key, data)).await
    }

    /// Copy, then delete the source.
    async fn move_path(
        &self,
        ctx: &OpContext,
        from: &ResolvedPath,
        to: &ResolvedPath,
        overwrite: bool,
    ) -> StorageResult<()> {
        self.copy_path(ctx, from, to, overwrite).await?;
        match self.delete_path(ctx, from).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(from = %from.display(), to = %to.display(), error = %err, "move left the source in place");
                Err(StorageError::PartialMove {
                    from: from.display(),
                    to: to.display(),
                    cause: err.to_string(),
                })
            }
        }
    }

    async fn delete_path(&self, ctx: &OpContext, path: &ResolvedPath) -> StorageResult<()> {
        check_delete(path)?;
        let shown = path.display();
        match self.probe(ctx, path.relative()).await? {
            Probe::Missing => Err(StorageError::NotFound(shown)),
            Probe::File(_) => {
                let key = self.file_key(path.relative());
                self.call(ctx, &shown, self.client.delete(&key)).await
            }
            Probe::Directory => self.delete_tree(ctx, path.relative()).await,
        }
    }

    /// Delete every key under a directory, deepest first, and its marker
    /// last. Markers of subtrees with failures are kept.
    async fn delete_tree(&self, ctx: &OpContext, relative: &RelativePath) -> StorageResult<()> {
        let shown = relative.to_string();
        let dir_key = self.dir_key(relative);
        let (objects, _) = self.list_all(ctx, &shown, &dir_key, None).await?;

        let mut keys: Vec<String> = objects.into_iter().map(|object| object.key).collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));

        let mut failed: Vec<String> = Vec::new();
        for key in &keys {
            ctx.check(&shown)?;
            let key_shown = self.display_key(key);
            if key.ends_with('/') && has_failure_within(&failed, &key_shown) {
                continue;
            }
            match self.call(ctx, &key_shown, self.client.delete(key)).await {
                Ok(()) => {}
                Err(err @ StorageError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    debug!(key = %key, error = %err, "delete failed");
                    failed.push(key_shown);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            failed.reverse();
            warn!(path = %shown, failed = failed.len(), "recursive delete left entries behind");
            Err(StorageError::PartialDelete { path: shown, failed })
        }
    }

    async fn summarize_dir(&self, ctx: &OpContext, dir: &ResolvedPath) -> StorageResult<DirSummary> {
        let shown = dir.display();
        match self.probe(ctx, dir.relative()).await? {
            Probe::Directory => {}
            Probe::File(_) => return Err(StorageError::NotADirectory(shown)),
            Probe::Missing => return Err(StorageError::NotFound(shown)),
        }

        let dir_key = self.dir_key(dir.relative());
        let (objects, _) = self.list_all(ctx, &shown, &dir_key, None).await?;
        let mut summary = DirSummary::default();
        for object in objects.iter().filter(|object| object.key != dir_key) {
            if object.key.ends_with('/') {
                summary.folders += 1;
            } else {
                summary.files += 1;
                summary.size += object.size;
            }
        }
        Ok(summary)
    }
}

impl StorageBackend for ObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Object
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
        Box::pin(self.read_object(ctx, path))
    }

    fn write<'a>(&'a self, ctx: &'a OpContext, path: &'a ResolvedPath, data: Bytes) -> BackendFuture<'a, ()> {
        Box::pin(self.write_object(ctx, path, data))
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

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::EntryKind;
    use tokio_util::sync::CancellationToken;

    fn setup(keys: &[&str]) -> (Arc<MemoryObjectClient>, ObjectBackend) {
        let client = Arc::new(MemoryObjectClient::new());
        for key in keys {
            client.insert(*key, Bytes::from_static(b"data"));
        }
        let backend = ObjectBackend::new(client.clone(), "bucket", "root").unwrap();
        (client, backend)
    }

    async fn resolve(backend: &ObjectBackend, raw: &str) -> ResolvedPath {
        backend.resolver().resolve(raw).await.unwrap()
    }

    #[tokio::test]
    async fn test_list_groups_and_sorts() {
        let (_client, backend) = setup(&["root/b.txt", "root/A/", "root/A/inner.txt", "root/A/deep/x"]);
        let ctx = OpContext::new();

        let entries = backend.list(&ctx, &resolve(&backend, "/").await).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "b.txt"]);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].size, protocol::DIRECTORY_SIZE_SENTINEL);
        assert_eq!(entries[0].modified, protocol::MODIFIED_SENTINEL);
        assert_eq!(entries[1].size, 4);

        let entries = backend.list(&ctx, &resolve(&backend, "A").await).await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/A/deep", "/A/inner.txt"]);
    }

    #[tokio::test]
    async fn test_list_requires_marker() {
        let (_client, backend) = setup(&["root/implicit/file.txt", "root/plain"]);
        let ctx = OpContext::new();

        let err = backend.list(&ctx, &resolve(&backend, "implicit").await).await.unwrap_err();
        assert_eq!(err, StorageError::NotFound("/implicit".to_string()));
        let err = backend.list(&ctx, &resolve(&backend, "plain").await).await.unwrap_err();
        assert_eq!(err, StorageError::NotADirectory("/plain".to_string()));
    }

    #[tokio::test]
    async fn test_list_follows_continuation_tokens() {
        let client = Arc::new(MemoryObjectClient::new().with_page_cap(2));
        for key in ["root/d1/", "root/d1/x", "root/d2/y", "root/f1", "root/f2", "root/f3"] {
            client.insert(key, Bytes::from_static(b"1"));
        }
        let backend = ObjectBackend::new(client.clone(), "bucket", "root").unwrap();
        let ctx = OpContext::new();

        let entries = backend.list(&ctx, &resolve(&backend, "").await).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["d1", "d2", "f1", "f2", "f3"]);
    }

    #[tokio::test]
    async fn test_stat_and_read() {
        let (_client, backend) = setup(&["root/dir/", "root/dir/a.txt"]);
        let ctx = OpContext::new();

        let entry = backend.stat(&ctx, &resolve(&backend, "dir").await).await.unwrap();
        assert_eq!(entry.kind, EntryKind::Directory);
        let entry = backend.stat(&ctx, &resolve(&backend, "dir/a.txt").await).await.unwrap();
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, 4);

        let err = backend.read(&ctx, &resolve(&backend, "dir").await).await.unwrap_err();
        assert_eq!(err, StorageError::IsADirectory("/dir".to_string()));
        let err = backend.stat(&ctx, &resolve(&backend, "nope").await).await.unwrap_err();
        assert_eq!(err, StorageError::NotFound("/nope".to_string()));
    }

    #[tokio::test]
    async fn test_write_requires_parent_marker() {
        let (client, backend) = setup(&[]);
        let ctx = OpContext::new();

        let err = backend
            .write(&ctx, &resolve(&backend, "x/a.txt").await, Bytes::from_static(b"a"))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("/x".to_string()));

        backend.create_directory(&ctx, &resolve(&backend, "x").await).await.unwrap();
        backend
            .write(&ctx, &resolve(&backend, "x/a.txt").await, Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert_eq!(client.keys(), vec!["root/x/".to_string(), "root/x/a.txt".to_string()]);

        let err = backend
            .write(&ctx, &resolve(&backend, "x").await, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::IsADirectory("/x".to_string()));
    }

    #[tokio::test]
    async fn test_create_directory_twice() {
        let (client, backend) = setup(&["root/x/", "root/x/keep.txt"]);
        let ctx = OpContext::new();

        let err = backend
            .create_directory(&ctx, &resolve(&backend, "x").await)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::AlreadyExists("/x".to_string()));
        assert!(client.contains("root/x/keep.txt"));
    }

    #[tokio::test]
    async fn test_delete_directory() {
        let (client, backend) = setup(&["root/x/", "root/x/a.txt", "root/x/b.txt", "root/y.txt"]);
        let ctx = OpContext::new();

        backend.delete(&ctx, &resolve(&backend, "x").await).await.unwrap();
        assert_eq!(client.keys(), vec!["root/y.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_partial_keeps_marker() {
        let (client, backend) = setup(&["root/x/", "root/x/a.txt", "root/x/b.txt"]);
        client.fail_delete("root/x/b.txt");
        let ctx = OpContext::new();

        let err = backend.delete(&ctx, &resolve(&backend, "x").await).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::PartialDelete {
                path: "/x".to_string(),
                failed: vec!["/x/b.txt".to_string()],
            }
        );
        assert!(!client.contains("root/x/a.txt"));
        assert!(client.contains("root/x/b.txt"));
        assert!(client.contains("root/x/"));
    }

    #[tokio::test]
    async fn test_delete_cancelled_midway() {
        let (client, backend) = setup(&["root/x/", "root/x/a.txt"]);
        let token = CancellationToken::new();
        let ctx = OpContext::new().with_cancellation(token.clone());
        let path = resolve(&backend, "x").await;
        token.cancel();

        let err = backend.delete(&ctx, &path).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled(_)));
        assert!(client.contains("root/x/a.txt"));
    }

    #[tokio::test]
    async fn test_copy_directory_without_server_side_copy() {
        let client = Arc::new(MemoryObjectClient::new().without_server_side_copy());
        for key in ["root/src/", "root/src/a.txt", "root/src/sub/", "root/src/sub/b.txt"] {
            client.insert(key, Bytes::from_static(b"z"));
        }
        let backend = ObjectBackend::new(client.clone(), "bucket", "root").unwrap();
        let ctx = OpContext::new();

        backend
            .copy(&ctx, &resolve(&backend, "src").await, &resolve(&backend, "dst").await, false)
            .await
            .unwrap();
        for key in ["root/dst/", "root/dst/a.txt", "root/dst/sub/", "root/dst/sub/b.txt"] {
            assert!(client.contains(key), "{}", key);
        }
        assert!(client.contains("root/src/a.txt"));
    }

    #[tokio::test]
    async fn test_move_existing_destination() {
        let (client, backend) = setup(&["root/a.txt", "root/b.txt"]);
        client.insert("root/b.txt", Bytes::from_static(b"bbb"));
        let ctx = OpContext::new();
        let from = resolve(&backend, "a.txt").await;
        let to = resolve(&backend, "b.txt").await;

        let err = backend.move_entry(&ctx, &from, &to, false).await.unwrap_err();
        assert_eq!(err, StorageError::AlreadyExists("/b.txt".to_string()));
        assert!(client.contains("root/a.txt"));

        backend.move_entry(&ctx, &from, &to, true).await.unwrap();
        assert_eq!(client.keys(), vec!["root/b.txt".to_string()]);
        let data = backend.read(&ctx, &to).await.unwrap();
        assert_eq!(data.as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_transfer_onto_ancestor_keeps_source() {
        let (client, backend) = setup(&["root/a/", "root/a/b/", "root/a/b/f.txt"]);
        let ctx = OpContext::new();
        let from = resolve(&backend, "a/b").await;
        let to = resolve(&backend, "a").await;

        let err = backend.move_entry(&ctx, &from, &to, true).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
        let err = backend.copy(&ctx, &from, &to, true).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
        assert_eq!(client.keys().len(), 3);
        assert!(client.contains("root/a/b/f.txt"));
    }

    #[tokio::test]
    async fn test_move_partial_when_source_delete_fails() {
        let (client, backend) = setup(&["root/a.txt"]);
        client.fail_delete("root/a.txt");
        let ctx = OpContext::new();

        let err = backend
            .move_entry(&ctx, &resolve(&backend, "a.txt").await, &resolve(&backend, "b.txt").await, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PartialMove { ref from, .. } if from == "/a.txt"));
        assert!(client.contains("root/a.txt"));
        assert!(client.contains("root/b.txt"));
    }

    #[tokio::test]
    async fn test_summarize() {
        let (_client, backend) = setup(&["root/a.txt", "root/d/", "root/d/b.txt", "root/d/e/"]);
        let ctx = OpContext::new();

        let summary = backend.summarize(&ctx, &resolve(&backend, "").await).await.unwrap();
        assert_eq!(
            summary,
            DirSummary {
                size: 8,
                files: 2,
                folders: 2
            }
        );
    }

    #[test]
    fn test_page_size_is_clamped() {
        let (_client, backend) = setup(&[]);
        assert_eq!(backend.with_page_size(5000).page_size(), MAX_LIST_PAGE_SIZE);
        let (_client, backend) = setup(&[]);
        assert_eq!(backend.with_page_size(0).page_size(), 1);
    }
}

//! Path confinement.
//!
//! Every caller-supplied path goes through two phases before any backend
//! operation sees it:
//!
//! 1. A lexical parse ([`PathResolver::parse`]) that splits on `/`, drops
//!    empty and `.` segments and rejects `..`, NUL, backslash and control
//!    characters. Nothing is touched on the medium.
//! 2. A canonical phase ([`PathResolver::confine`]) that anchors the segments
//!    to the configured root. On a filesystem every existing prefix is
//!    inspected and symlinks are resolved; the result must stay at or below
//!    the root. [`PathResolver::confine_entry`] is the variant for operations
//!    that act on the named entry itself: it resolves the parent the same way
//!    but never follows a symlink in the last segment.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// Characters rejected in any path segment, on every backend.
pub const FORBIDDEN_CHARS: &[char] = &['\0', '\\'];

/// A validated, root-relative path.
///
/// Holds only plain segments: no empty segments, no `.` and never `..`.
/// The root is the empty segment list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePath {
    segments: Vec<String>,
}

impl RelativePath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// The path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true for the root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments joined by `/` with no leading slash (`a/b/c`, empty for root).
    pub fn as_key(&self) -> String {
        self.segments.join("/")
    }

    /// Append one validated segment.
    pub fn join(&self, name: &str) -> StorageResult<Self> {
        let name = PathResolver::parse_name(name)?;
        let mut segments = self.segments.clone();
        segments.push(name);
        Ok(Self { segments })
    }

    /// The parent path, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.to_vec(),
        })
    }

    /// The last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether `other` is this path or one of its ancestors.
    pub fn starts_with(&self, other: &RelativePath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Backend-specific anchor, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// Canonical filesystem directory.
    Directory(PathBuf),
    /// Bucket plus normalized key prefix (empty, or ending with `/`).
    Prefix { bucket: String, prefix: String },
}

/// Where a resolved path lives on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Canonical filesystem path.
    Fs(PathBuf),
    /// Object key, without a trailing `/`.
    Key(String),
}

/// A path that passed confinement.
///
/// Only [`PathResolver`] creates these; backend operations accept nothing
/// else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    relative: RelativePath,
    location: Location,
}

impl ResolvedPath {
    pub(crate) fn new(relative: RelativePath, location: Location) -> Self {
        Self { relative, location }
    }

    /// The root-relative form used in entries and errors.
    pub fn relative(&self) -> &RelativePath {
        &self.relative
    }

    /// The location on the medium.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The filesystem path, if this was resolved by a local backend.
    pub fn fs_path(&self) -> Option<&Path> {
        match &self.location {
            Location::Fs(path) => Some(path),
            Location::Key(_) => None,
        }
    }

    /// The object key, if this was resolved by an object backend.
    pub fn key(&self) -> Option<&str> {
        match &self.location {
            Location::Key(key) => Some(key),
            Location::Fs(_) => None,
        }
    }

    /// Returns true for the root.
    pub fn is_root(&self) -> bool {
        self.relative.is_root()
    }

    /// Display form of the relative path (`/a/b`, `/` for the root).
    pub fn display(&self) -> String {
        self.relative.to_string()
    }
}

/// Resolves untrusted relative paths against a root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: Root,
}

impl PathResolver {
    /// Create a resolver for a filesystem root.
    ///
    /// The root is canonicalized once here and must be an existing directory.
    pub fn local(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        let shown = root.display().to_string();
        let canonical = std::fs::canonicalize(root).map_err(|e| StorageError::from_io(e, shown.clone()))?;
        let metadata = std::fs::metadata(&canonical).map_err(|e| StorageError::from_io(e, shown.clone()))?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(shown));
        }
        Ok(Self {
            root: Root::Directory(canonical),
        })
    }

    /// Create a resolver for a bucket and key prefix.
    ///
    /// The prefix is parsed like any relative path, so `data`, `/data/` and
    /// `data//` all anchor at `data/`.
    pub fn object(bucket: impl Into<String>, prefix: &str) -> StorageResult<Self> {
        let parsed = Self::parse(prefix)?;
        let prefix = if parsed.is_root() {
            String::new()
        } else {
            format!("{}/", parsed.as_key())
        };
        Ok(Self {
            root: Root::Prefix {
                bucket: bucket.into(),
                prefix,
            },
        })
    }

    /// The configured root.
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Lexical phase: parse and validate a caller-supplied path.
    ///
    /// The input is examined as given. Empty, `.` and `/` all denote the
    /// root.
    pub fn parse(raw: &str) -> StorageResult<RelativePath> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            validate_segment(raw, segment)?;
            segments.push(segment.to_string());
        }
        Ok(RelativePath { segments })
    }

    /// Validate a single entry name, as used by rename.
    pub fn parse_name(name: &str) -> StorageResult<String> {
        if name.is_empty() || name == "." {
            return Err(StorageError::invalid_path(name, "empty name"));
        }
        if name.contains('/') {
            return Err(StorageError::invalid_path(name, "name contains a path separator"));
        }
        validate_segment(name, name)?;
        Ok(name.to_string())
    }

    /// Canonical phase: anchor a parsed path to the root.
    pub async fn confine(&self, relative: &RelativePath) -> StorageResult<ResolvedPath> {
        match &self.root {
            Root::Directory(root) => {
                let path = confine_fs(root, relative).await?;
                Ok(ResolvedPath::new(relative.clone(), Location::Fs(path)))
            }
            Root::Prefix { prefix, .. } => {
                let key = format!("{}{}", prefix, relative.as_key());
                let key = key.trim_end_matches('/').to_string();
                if !key_is_within(prefix, &key) {
                    return Err(StorageError::invalid_path(relative.to_string(), "key escapes prefix"));
                }
                Ok(ResolvedPath::new(relative.clone(), Location::Key(key)))
            }
        }
    }

    /// Canonical phase for delete, move and rename.
    ///
    /// Parent segments are resolved like [`confine`](Self::confine). A symlink
    /// in the last segment is not followed, so the operation affects the link
    /// and not its target. Dangling and escaping links resolve too, which
    /// keeps them removable.
    pub async fn confine_entry(&self, relative: &RelativePath) -> StorageResult<ResolvedPath> {
        match (&self.root, relative.parent(), relative.file_name()) {
            (Root::Directory(root), Some(parent), Some(name)) => {
                let dir = confine_fs(root, &parent).await?;
                Ok(ResolvedPath::new(relative.clone(), Location::Fs(dir.join(name))))
            }
            _ => self.confine(relative).await,
        }
    }

    /// Both phases in one call.
    pub async fn resolve(&self, raw: &str) -> StorageResult<ResolvedPath> {
        let relative = Self::parse(raw)?;
        self.confine(&relative).await
    }

    /// Both phases in one call, without following a final symlink.
    pub async fn resolve_entry(&self, raw: &str) -> StorageResult<ResolvedPath> {
        let relative = Self::parse(raw)?;
        self.confine_entry(&relative).await
    }
}

fn validate_segment(raw: &str, segment: &str) -> StorageResult<()> {
    if segment == ".." {
        return Err(StorageError::invalid_path(raw, "parent directory segment"));
    }
    if segment.contains('\0') {
        return Err(StorageError::invalid_path(raw, "NUL character"));
    }
    if segment.contains(FORBIDDEN_CHARS) {
        return Err(StorageError::invalid_path(raw, "forbidden character"));
    }
    if segment.chars().any(char::is_control) {
        return Err(StorageError::invalid_path(raw, "control character"));
    }
    Ok(())
}

/// Walk the segments below `root`, resolving symlinks of every existing
/// prefix. Segments past the first missing component are appended as-is.
async fn confine_fs(root: &Path, relative: &RelativePath) -> StorageResult<PathBuf> {
    let shown = relative.to_string();
    let segments = relative.segments();
    let mut current = root.to_path_buf();

    for (index, segment) in segments.iter().enumerate() {
        let candidate = current.join(segment);
        match tokio::fs::symlink_metadata(&candidate).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                let target = match tokio::fs::canonicalize(&candidate).await {
                    Ok(target) => target,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(StorageError::invalid_path(shown, "dangling symlink"));
                    }
                    Err(e) => return Err(StorageError::from_io(e, shown)),
                };
                if !is_within(root, &target) {
                    tracing::debug!(path = %shown, "symlink escapes root");
                    return Err(StorageError::invalid_path(shown, "symlink escapes root"));
                }
                current = target;
            }
            Ok(_) => current = candidate,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                current = candidate;
                current.extend(&segments[index + 1..]);
                break;
            }
            Err(e) => return Err(StorageError::from_io(e, shown)),
        }
    }

    if !is_within(root, &current) {
        return Err(StorageError::invalid_path(shown, "path escapes root"));
    }
    Ok(current)
}

/// Whether `candidate` is `root` or lies below it.
///
/// Compares raw bytes on a separator boundary, so `/root-evil` is not inside
/// `/root`.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    let root = root.as_os_str().as_encoded_bytes();
    let candidate = candidate.as_os_str().as_encoded_bytes();
    if !candidate.starts_with(root) {
        return false;
    }
    if candidate.len() == root.len() {
        return true;
    }
    let separator = std::path::MAIN_SEPARATOR as u8;
    root.last() == Some(&separator) || candidate[root.len()] == separator
}

/// Whether `key` is the prefix itself or a key below it.
pub fn key_is_within(prefix: &str, key: &str) -> bool {
    if prefix.is_empty() {
        return !key.starts_with('/');
    }
    key == prefix.trim_end_matches('/') || key.starts_with(prefix)
}

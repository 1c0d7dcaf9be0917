//! Protocol message definitions for the file manager.
//!
//! This module defines the storage data model (entries, tree nodes,
//! summaries) and the request/response pairs an HTTP or IPC front end
//! exchanges with the storage layer. All messages are JSON; binary file
//! contents travel as base64.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorMessage, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size reported for directories, which have no intrinsic size.
pub const DIRECTORY_SIZE_SENTINEL: u64 = 0;

/// Modification time (Unix epoch seconds) reported when the medium has none,
/// e.g. directories synthesized from object-store prefixes.
pub const MODIFIED_SENTINEL: u64 = 0;

// ============================================================================
// Data model
// ============================================================================

/// Type of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// A single file or directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry name (last path segment, `/` for the root).
    pub name: String,
    /// Path relative to the storage root, always starting with `/`.
    pub path: String,
    /// Entry type.
    pub kind: EntryKind,
    /// Size in bytes ([`DIRECTORY_SIZE_SENTINEL`] for directories).
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: u64,
}

impl Entry {
    /// Create a file entry.
    pub fn file(path: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        let path = path.into();
        Self {
            name: name_of(&path),
            path,
            kind: EntryKind::File,
            size,
            modified: epoch_secs(modified),
        }
    }

    /// Create a directory entry.
    pub fn directory(path: impl Into<String>, modified: SystemTime) -> Self {
        let path = path.into();
        Self {
            name: name_of(&path),
            path,
            kind: EntryKind::Directory,
            size: DIRECTORY_SIZE_SENTINEL,
            modified: epoch_secs(modified),
        }
    }

    /// Create a directory entry with no known modification time.
    pub fn synthesized_directory(path: impl Into<String>) -> Self {
        Self::directory(path, UNIX_EPOCH)
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

fn name_of(path: &str) -> String {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("/")
        .to_string()
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(MODIFIED_SENTINEL)
}

/// Presentation order: directories first, then case-insensitive by name.
///
/// Names that differ only in case fall back to a byte-wise comparison so the
/// order stays deterministic.
pub fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    match (a.is_dir(), b.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    }
}

/// Sort entries in presentation order.
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(compare_entries);
}

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Directory whose listing failed; see [`TreeNode::error`].
    Error,
}

/// A node in a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// The entry this node describes.
    pub entry: Entry,
    /// Node kind.
    pub kind: NodeKind,
    /// Children in presentation order. `None` when the node was not
    /// expanded (files, depth limit, node cap).
    pub children: Option<Vec<TreeNode>>,
    /// Cause of the failure for [`NodeKind::Error`] nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMessage>,
    /// Set when the node cap stopped this node from being fully expanded.
    #[serde(default)]
    pub truncated: bool,
}

impl TreeNode {
    /// Create an unexpanded node for an entry.
    pub fn new(entry: Entry) -> Self {
        let kind = match entry.kind {
            EntryKind::File => NodeKind::File,
            EntryKind::Directory => NodeKind::Directory,
        };
        Self {
            entry,
            kind,
            children: None,
            error: None,
            truncated: false,
        }
    }

    /// Turn this node into an error node.
    pub fn mark_failed(&mut self, error: ErrorMessage) {
        self.kind = NodeKind::Error;
        self.children = None;
        self.error = Some(error);
    }

    /// Total number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            if let Some(children) = &node.children {
                stack.extend(children.iter());
            }
        }
        count
    }

    /// Find a node by its path.
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.entry.path == path {
                return Some(node);
            }
            if let Some(children) = &node.children {
                stack.extend(children.iter());
            }
        }
        None
    }
}

/// Totals for a directory subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirSummary {
    /// Sum of file sizes in bytes.
    pub size: u64,
    /// Number of files.
    pub files: u64,
    /// Number of directories, excluding the summarized one.
    pub folders: u64,
}

// ============================================================================
// Requests
// ============================================================================

/// A storage request. Each variant maps to exactly one storage operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// List the immediate children of a directory.
    List {
        /// Directory path.
        path: String,
    },
    /// Return metadata for a single entry.
    Stat {
        /// Entry path.
        path: String,
    },
    /// Read a whole file.
    Read {
        /// File path.
        path: String,
    },
    /// Create or overwrite a file.
    Write {
        /// File path.
        path: String,
        /// New file contents.
        #[serde(with = "base64_bytes")]
        content: Vec<u8>,
    },
    /// Create a directory.
    CreateDirectory {
        /// Directory path.
        path: String,
    },
    /// Rename an entry inside its parent directory.
    Rename {
        /// Entry path.
        path: String,
        /// New last segment.
        new_name: String,
    },
    /// Move an entry.
    Move {
        /// Source path.
        source: String,
        /// Destination path.
        destination: String,
        /// Replace an existing destination.
        #[serde(default)]
        overwrite: bool,
    },
    /// Copy an entry.
    Copy {
        /// Source path.
        source: String,
        /// Destination path.
        destination: String,
        /// Replace an existing destination.
        #[serde(default)]
        overwrite: bool,
    },
    /// Delete an entry, recursively for directories.
    Delete {
        /// Entry path.
        path: String,
    },
    /// Build a directory tree.
    Tree {
        /// Tree root.
        path: String,
        /// Maximum depth; the configured limit applies when omitted.
        #[serde(default)]
        max_depth: Option<usize>,
    },
    /// Summarize a directory subtree.
    Summarize {
        /// Directory path.
        path: String,
    },
}

impl Request {
    /// Whether the request mutates storage.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::Write { .. }
                | Request::CreateDirectory { .. }
                | Request::Rename { .. }
                | Request::Move { .. }
                | Request::Copy { .. }
                | Request::Delete { .. }
        )
    }

    /// Parse a request from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the request to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// File contents returned by a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// File path.
    pub path: String,
    /// File bytes.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Acknowledgement of a mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Done {
    /// Path that was changed (the destination for move and copy).
    pub path: String,
}

/// Response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Response {
    /// Directory listing.
    Entries(Vec<Entry>),
    /// Single entry metadata.
    Entry(Entry),
    /// File contents.
    Content(Content),
    /// Directory tree.
    Tree(TreeNode),
    /// Subtree totals.
    Summary(DirSummary),
    /// Mutation succeeded.
    Done(Done),
    /// Operation failed.
    Error(ErrorMessage),
}

impl Response {
    /// Returns true for error responses.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Parse a response from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the response to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

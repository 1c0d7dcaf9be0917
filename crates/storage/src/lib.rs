//! # Filemanager Storage Library
//!
//! This crate provides the storage layer behind the file manager: every file
//! operation a client can request, confined to a configured root on either
//! the local filesystem or an S3-compatible bucket.
//!
//! ## Overview
//!
//! - **Path Confinement**: Every caller-supplied path is checked lexically
//!   and then anchored to the root before any I/O happens
//! - **Backends**: A single [`StorageBackend`] capability interface with a
//!   local filesystem and an object-store implementation
//! - **Trees and Summaries**: Breadth-first directory trees with depth and
//!   node limits, and size/file/folder totals for a subtree
//! - **Request Routing**: Protocol requests mapped 1:1 onto operations, with
//!   structured error bodies for every failure
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Router (protocol::Request)               │
//! ├──────────────────────────────────────────────────────────┤
//! │                       FileManager                        │
//! │   PathResolver::parse ─► backend.resolve ─► operation    │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   ┌──────────────────────────────┐ │
//! │  │   LocalBackend   │   │        ObjectBackend         │ │
//! │  │    (tokio::fs)   │   │  ObjectClient: S3 / memory   │ │
//! │  └──────────────────┘   └──────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use storage::{FileManager, LocalBackend, OpContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = LocalBackend::new("/srv/files")?;
//!     let manager = FileManager::new(Arc::new(backend));
//!
//!     let ctx = OpContext::new();
//!     manager.create_directory(&ctx, "reports").await?;
//!     manager.write(&ctx, "reports/q1.txt", "revenue".into()).await?;
//!
//!     for entry in manager.list(&ctx, "reports").await? {
//!         println!("{} {}", entry.path, entry.size);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`backend`]: The backend interface, both implementations and the
//!   operation context
//! - [`config`]: Configuration loading and defaults
//! - [`error`]: Storage error taxonomy
//! - [`manager`]: The file manager facade
//! - [`path`]: Path parsing and confinement
//! - [`router`]: Request routing
//! - [`tree`]: Directory tree construction

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod path;
pub mod router;
pub mod tree;

pub use backend::{
    BackendKind, LocalBackend, MemoryObjectClient, ObjectBackend, ObjectClient, OpContext,
    S3Client, StorageBackend,
};
pub use config::Config;
pub use error::{StorageError, StorageResult};
pub use manager::FileManager;
pub use path::{PathResolver, RelativePath, ResolvedPath};
pub use router::Router;
pub use tree::TreeBuilder;

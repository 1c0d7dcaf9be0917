//! # Filemanager Protocol Library
//!
//! This crate provides the data model and message definitions shared by the
//! storage layer and whatever front end drives it (HTTP handlers, IPC, the
//! `filemanager stdio` loop).
//!
//! ## Overview
//!
//! - **Data model**: [`Entry`], [`TreeNode`] and [`DirSummary`], the values
//!   every storage backend reports regardless of medium
//! - **Messages**: [`Request`] and [`Response`], one request variant per
//!   storage operation
//! - **Errors**: [`ErrorKind`], the shared failure taxonomy, and
//!   [`ErrorMessage`], the structured error body
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Request, Response, Entry};
//! use std::time::SystemTime;
//!
//! let request = Request::from_json(r#"{"action":"list","path":"/docs"}"#).unwrap();
//! assert_eq!(request, Request::List { path: "/docs".to_string() });
//!
//! let response = Response::Entries(vec![Entry::file("/docs/a.txt", 3, SystemTime::now())]);
//! let json = response.to_json().unwrap();
//! assert!(json.contains("\"Entries\""));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Data model and request/response definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ErrorKind, ErrorMessage, ProtocolError, Result};
pub use messages::{
    compare_entries, sort_entries, Content, DirSummary, Done, Entry, EntryKind, NodeKind, Request,
    Response, TreeNode, DIRECTORY_SIZE_SENTINEL, MODIFIED_SENTINEL, PROTOCOL_VERSION,
};

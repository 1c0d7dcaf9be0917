//! Request router for dispatching protocol requests to the file manager.
//!
//! This module provides the [`Router`] struct that receives [`Request`]s and
//! maps each one onto exactly one [`FileManager`] operation. Failures never
//! escape as Rust errors: every outcome, good or bad, is a [`Response`].

use std::sync::Arc;

use bytes::Bytes;
use protocol::{Content, Done, ErrorMessage, Request, Response};
use tracing::{debug, error};

use crate::backend::OpContext;
use crate::error::StorageResult;
use crate::manager::FileManager;

/// Dispatches requests to a shared [`FileManager`].
#[derive(Clone)]
pub struct Router {
    manager: Arc<FileManager>,
}

impl Router {
    /// Create a router on top of `manager`.
    pub fn new(manager: Arc<FileManager>) -> Self {
        Self { manager }
    }

    /// The manager requests are dispatched to.
    pub fn manager(&self) -> &Arc<FileManager> {
        &self.manager
    }

    /// Handle a decoded request.
    pub async fn handle(&self, ctx: &OpContext, request: Request) -> Response {
        debug!(?request, "Routing request");

        match self.dispatch(ctx, request).await {
            Ok(response) => response,
            Err(err) => Response::Error(err.to_error_message()),
        }
    }

    /// Handle one JSON-encoded request and return the JSON-encoded response.
    pub async fn handle_json(&self, ctx: &OpContext, json: &str) -> String {
        let response = match Request::from_json(json) {
            Ok(request) => self.handle(ctx, request).await,
            Err(err) => {
                debug!(error = %err, "Rejecting undecodable request");
                Response::Error(ErrorMessage::invalid_request(err.to_string()))
            }
        };

        match response.to_json() {
            Ok(json) => json,
            Err(err) => {
                error!(error = %err, "Failed to encode response");
                serde_json::json!({
                    "type": "error",
                    "data": {
                        "kind": "io_fault",
                        "message": format!("failed to encode response: {}", err),
                        "path": null,
                        "recoverable": true,
                    }
                })
                .to_string()
            }
        }
    }

    async fn dispatch(&self, ctx: &OpContext, request: Request) -> StorageResult<Response> {
        let manager = &self.manager;
        let response = match request {
            Request::List { path } => Response::Entries(manager.list(ctx, &path).await?),
            Request::Stat { path } => Response::Entry(manager.stat(ctx, &path).await?),
            Request::Read { path } => {
                let data = manager.read(ctx, &path).await?;
                Response::Content(Content {
                    path,
                    data: data.to_vec(),
                })
            }
            Request::Write { path, content } => {
                manager.write(ctx, &path, Bytes::from(content)).await?;
                Response::Done(Done { path })
            }
            Request::CreateDirectory { path } => {
                manager.create_directory(ctx, &path).await?;
                Response::Done(Done { path })
            }
            Request::Rename { path, new_name } => {
                let path = manager.rename(ctx, &path, &new_name).await?;
                Response::Done(Done { path })
            }
            Request::Move {
                source,
                destination,
                overwrite,
            } => {
                manager
                    .move_entry(ctx, &source, &destination, overwrite)
                    .await?;
                Response::Done(Done { path: destination })
            }
            Request::Copy {
                source,
                destination,
                overwrite,
            } => {
                manager.copy(ctx, &source, &destination, overwrite).await?;
                Response::Done(Done { path: destination })
            }
            Request::Delete { path } => {
                manager.delete(ctx, &path).await?;
                Response::Done(Done { path })
            }
            Request::Tree { path, max_depth } => {
                Response::Tree(manager.tree(ctx, &path, max_depth).await?)
            }
            Request::Summarize { path } => Response::Summary(manager.summarize(ctx, &path).await?),
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryObjectClient, ObjectBackend};
    use protocol::{DirSummary, EntryKind, ErrorKind};

    fn router_with(keys: &[&str]) -> (Arc<MemoryObjectClient>, Router) {
        let client = Arc::new(MemoryObjectClient::new());
        for key in keys {
            client.insert(*key, Bytes::from_static(b"data"));
        }
        let backend = ObjectBackend::new(client.clone(), "bucket", "").unwrap();
        let manager = FileManager::new(Arc::new(backend));
        (client, Router::new(Arc::new(manager)))
    }

    #[tokio::test]
    async fn test_list_request() {
        let (_client, router) = router_with(&["A/", "b.txt"]);
        let response = router
            .handle(&OpContext::new(), Request::List { path: "/".into() })
            .await;

        match response {
            Response::Entries(entries) => {
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                assert_eq!(names, vec!["A", "b.txt"]);
                assert_eq!(entries[0].kind, EntryKind::Directory);
            }
            other => panic!("Expected Entries, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_client, router) = router_with(&[]);
        let ctx = OpContext::new();

        let response = router
            .handle(
                &ctx,
                Request::Write {
                    path: "note.txt".into(),
                    content: b"hello".to_vec(),
                },
            )
            .await;
        assert_eq!(
            response,
            Response::Done(Done {
                path: "note.txt".into()
            })
        );

        let response = router
            .handle(&ctx, Request::Read { path: "note.txt".into() })
            .await;
        match response {
            Response::Content(content) => assert_eq!(content.data, b"hello"),
            other => panic!("Expected Content, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rename_reports_new_path() {
        let (client, router) = router_with(&["dir/", "dir/old.txt"]);
        let response = router
            .handle(
                &OpContext::new(),
                Request::Rename {
                    path: "dir/old.txt".into(),
                    new_name: "new.txt".into(),
                },
            )
            .await;

        assert_eq!(
            response,
            Response::Done(Done {
                path: "/dir/new.txt".into()
            })
        );
        assert!(client.contains("dir/new.txt"));
        assert!(!client.contains("dir/old.txt"));
    }

    #[tokio::test]
    async fn test_partial_delete_response() {
        let (client, router) = router_with(&["x/", "x/a.txt", "x/b.txt"]);
        client.fail_delete("x/b.txt");

        let response = router
            .handle(&OpContext::new(), Request::Delete { path: "x".into() })
            .await;

        match response {
            Response::Error(err) => {
                assert_eq!(err.kind, ErrorKind::PartialDelete);
                assert_eq!(err.failed, vec!["/x/b.txt".to_string()]);
                assert!(err.recoverable);
            }
            other => panic!("Expected Error, got {:?}", other),
        }
        assert!(!client.contains("x/a.txt"));
        assert!(client.contains("x/"));
    }

    #[tokio::test]
    async fn test_traversal_is_an_error_response() {
        let (client, router) = router_with(&["a.txt"]);
        let response = router
            .handle(
                &OpContext::new(),
                Request::Stat {
                    path: "../etc/passwd".into(),
                },
            )
            .await;

        match response {
            Response::Error(err) => {
                assert_eq!(err.kind, ErrorKind::InvalidPath);
                assert!(!err.recoverable);
            }
            other => panic!("Expected Error, got {:?}", other),
        }
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_tree_and_summary() {
        let (_client, router) = router_with(&["a/", "a/one.txt", "two.txt"]);
        let ctx = OpContext::new();

        let response = router
            .handle(
                &ctx,
                Request::Tree {
                    path: "/".into(),
                    max_depth: None,
                },
            )
            .await;
        match response {
            Response::Tree(tree) => assert_eq!(tree.node_count(), 4),
            other => panic!("Expected Tree, got {:?}", other),
        }

        let response = router
            .handle(&ctx, Request::Summarize { path: "/".into() })
            .await;
        assert_eq!(
            response,
            Response::Summary(DirSummary {
                size: 8,
                files: 2,
                folders: 1
            })
        );
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let (_client, router) = router_with(&["a/"]);
        let ctx = OpContext::new();
        ctx.cancellation_token().cancel();

        let response = router
            .handle(&ctx, Request::Delete { path: "a".into() })
            .await;
        match response {
            Response::Error(err) => assert_eq!(err.kind, ErrorKind::Cancelled),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_json() {
        let (_client, router) = router_with(&["b.txt"]);
        let ctx = OpContext::new();

        let json = router
            .handle_json(&ctx, r#"{"action":"stat","path":"b.txt"}"#)
            .await;
        let response = Response::from_json(&json).unwrap();
        match response {
            Response::Entry(entry) => {
                assert_eq!(entry.path, "/b.txt");
                assert_eq!(entry.size, 4);
            }
            other => panic!("Expected Entry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_json_rejects_garbage() {
        let (_client, router) = router_with(&[]);
        let ctx = OpContext::new();

        for input in ["not json", r#"{"action":"explode","path":"/"}"#, r#"{"path":"/"}"#] {
            let json = router.handle_json(&ctx, input).await;
            match Response::from_json(&json).unwrap() {
                Response::Error(err) => assert_eq!(err.kind, ErrorKind::InvalidRequest),
                other => panic!("Expected Error, got {:?}", other),
            }
        }
    }
}

//! Directory tree construction.
//!
//! The tree is built breadth-first from repeated `list` calls, so a node cap
//! cuts the tree evenly instead of exhausting it on the first deep branch.

use std::collections::VecDeque;
use std::sync::Arc;

use protocol::{compare_entries, TreeNode};
use tracing::debug;

use crate::backend::{OpContext, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::path::{PathResolver, ResolvedPath};

/// Default cap on the number of nodes in one tree.
pub const DEFAULT_MAX_NODES: usize = 10_000;

struct Slot {
    depth: usize,
    expanded: bool,
    kids: Vec<usize>,
}

/// Builds [`TreeNode`] hierarchies on top of any backend.
pub struct TreeBuilder {
    backend: Arc<dyn StorageBackend>,
    max_depth: Option<usize>,
    max_nodes: usize,
}

impl TreeBuilder {
    /// A builder with unbounded depth and the default node cap.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            max_depth: None,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }

    /// Only directories shallower than `depth` are expanded; the root is at
    /// depth 0. `None` expands everything.
    pub fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Stop adding nodes once the tree holds `nodes` of them.
    pub fn max_nodes(mut self, nodes: usize) -> Self {
        self.max_nodes = nodes.max(1);
        self
    }

    /// Build the tree below `root`.
    ///
    /// Failing to stat the root is an error. Failing to list any directory
    /// turns that node into an error node and the build carries on;
    /// cancellation aborts it.
    pub async fn build(&self, ctx: &OpContext, root: &ResolvedPath) -> StorageResult<TreeNode> {
        let shown = root.display();
        let root_entry = self.backend.stat(ctx, root).await?;

        let mut nodes = vec![Some(TreeNode::new(root_entry))];
        let mut slots = vec![Slot {
            depth: 0,
            expanded: false,
            kids: Vec::new(),
        }];
        let mut queue = VecDeque::new();
        if nodes[0].as_ref().is_some_and(|node| node.entry.is_dir()) {
            queue.push_back(0);
        }

        while let Some(index) = queue.pop_front() {
            ctx.check(&shown)?;
            let depth = slots[index].depth;
            if self.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            let at_cap = nodes.len() >= self.max_nodes;
            let Some(node) = nodes[index].as_mut() else {
                continue;
            };
            if at_cap {
                node.truncated = true;
                continue;
            }
            let path = node.entry.path.clone();

            let listed = if index == 0 {
                self.backend.list(ctx, root).await
            } else {
                self.list_child(ctx, &path).await
            };

            let entries = match listed {
                Ok(entries) => entries,
                Err(err @ StorageError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    debug!(path = %path, error = %err, "tree node could not be expanded");
                    if let Some(node) = nodes[index].as_mut() {
                        node.mark_failed(err.to_error_message());
                    }
                    continue;
                }
            };

            let mut kids = Vec::with_capacity(entries.len());
            for entry in entries {
                if nodes.len() >= self.max_nodes {
                    if let Some(node) = nodes[index].as_mut() {
                        node.truncated = true;
                    }
                    break;
                }
                let child = nodes.len();
                if entry.is_dir() {
                    queue.push_back(child);
                }
                nodes.push(Some(TreeNode::new(entry)));
                slots.push(Slot {
                    depth: depth + 1,
                    expanded: false,
                    kids: Vec::new(),
                });
                kids.push(child);
            }
            slots[index].expanded = true;
            slots[index].kids = kids;
        }

        // Children always come after their parent, so a reverse sweep sees
        // every subtree complete before attaching it.
        for index in (0..nodes.len()).rev() {
            if !slots[index].expanded {
                continue;
            }
            let mut children: Vec<TreeNode> = slots[index]
                .kids
                .iter()
                .filter_map(|&kid| nodes[kid].take())
                .collect();
            children.sort_by(|a, b| compare_entries(&a.entry, &b.entry));
            if let Some(node) = nodes[index].as_mut() {
                node.children = Some(children);
            }
        }

        nodes[0]
            .take()
            .ok_or_else(|| StorageError::io_fault(shown, "tree root went missing"))
    }

    async fn list_child(&self, ctx: &OpContext, path: &str) -> StorageResult<Vec<protocol::Entry>> {
        let relative = PathResolver::parse(path)?;
        let resolved = self.backend.resolve(&relative).await?;
        self.backend.list(ctx, &resolved).await
    }
}

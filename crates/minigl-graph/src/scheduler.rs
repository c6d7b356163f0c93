//! Execution order: depth-first post-order from the output node, cached until the
//! graph changes shape.

use std::collections::HashSet;

use minigl_core::NodeId;
use tracing::debug;

/// Post-order DFS from `root` over `deps`. Every dependency precedes its consumers;
/// nodes unreachable from `root` are left out. A back edge is ignored rather than
/// followed, so a malformed graph still terminates.
pub fn topological_order<F>(root: NodeId, mut deps: F) -> Vec<NodeId>
where
    F: FnMut(NodeId) -> Vec<NodeId>,
{
    struct Frame {
        id: NodeId,
        children: Vec<NodeId>,
        next: usize,
    }

    let mut order = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::new();
    seen.insert(root);
    let mut stack = vec![Frame {
        id: root,
        children: deps(root),
        next: 0,
    }];

    loop {
        let Some(top) = stack.last_mut() else {
            break;
        };
        if let Some(&child) = top.children.get(top.next) {
            top.next += 1;
            if seen.insert(child) {
                let children = deps(child);
                stack.push(Frame {
                    id: child,
                    children,
                    next: 0,
                });
            }
        } else {
            order.push(top.id);
            stack.pop();
        }
    }
    order
}

/// Cached order plus the dirty flag.
#[derive(Debug, Clone)]
pub struct Schedule {
    order: Vec<NodeId>,
    root: Option<NodeId>,
    dirty: bool,
    rebuilds: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            root: None,
            dirty: true,
            rebuilds: 0,
        }
    }

    /// Any structural change anywhere in the graph.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The last computed order (possibly stale).
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// How many times the order has been recomputed.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Recompute if dirty or rooted elsewhere, then return the order.
    pub fn ensure<F>(&mut self, root: NodeId, deps: F) -> &[NodeId]
    where
        F: FnMut(NodeId) -> Vec<NodeId>,
    {
        if self.dirty || self.root != Some(root) {
            self.order = topological_order(root, deps);
            self.root = Some(root);
            self.dirty = false;
            self.rebuilds += 1;
            debug!(root = %root, nodes = self.order.len(), "schedule rebuilt");
        }
        &self.order
    }
}

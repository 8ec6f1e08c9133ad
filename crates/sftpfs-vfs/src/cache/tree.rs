//! Path-indexed cache tree.
//!
//! Nodes live in an arena and refer to their parent by index; the root is
//! its own parent. Node slots freed by a listing invalidation are recycled,
//! so handles carry a generation and go stale instead of aliasing a
//! different path.

use std::collections::HashMap;

use crate::error::VfsResult;
use crate::path;
use crate::types::{CreateDisposition, FileContext, FileInformation, OpenOutcome};

/// A cached outcome. `None` is "unset": the next access must go to the
/// backend. `Some(Err(_))` is a cached failure and is served like a success.
pub type Slot<T> = Option<VfsResult<T>>;

const ROOT: usize = 0;

/// Which open call an open outcome answers.
///
/// The same path opened with another disposition, or as a directory rather
/// than a file, can legitimately get a different answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenKey {
    pub disposition: CreateDisposition,
    pub directory: bool,
}

impl OpenKey {
    pub fn new(disposition: CreateDisposition, ctx: &FileContext) -> Self {
        Self {
            disposition,
            directory: ctx.is_directory,
        }
    }
}

/// Handle to a live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u64,
}

/// Proof that a node was in a given state when a backend call started.
///
/// Filling a slot through a ticket is refused if the node has been cleared
/// or freed since, so a result fetched before an invalidation never lands
/// after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    node: NodeId,
    epoch: u64,
}

/// Cache state for one path segment.
#[derive(Debug, Default)]
pub struct CacheNode {
    name: String,
    parent: usize,
    generation: u64,
    epoch: u64,
    children: Option<HashMap<String, usize>>,
    /// Open outcomes, one per kind of open call. Empty is unset.
    pub open: HashMap<OpenKey, VfsResult<OpenOutcome>>,
    /// Get-metadata outcome.
    pub metadata: Slot<FileInformation>,
    /// Directory listing outcome.
    pub listing: Slot<Vec<FileInformation>>,
    /// Alternate-stream listing outcome.
    pub streams: Slot<Vec<FileInformation>>,
}

impl CacheNode {
    fn new(name: &str, parent: usize, generation: u64) -> Self {
        Self {
            name: name.to_string(),
            parent,
            generation,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of materialized children, `None` when nothing is known.
    pub fn child_count(&self) -> Option<usize> {
        self.children.as_ref().map(HashMap::len)
    }

    /// Cached outcome of an open call of kind `key`.
    pub fn open_outcome(&self, key: OpenKey) -> Slot<OpenOutcome> {
        self.open.get(&key).cloned()
    }

    /// True when no slot holds a cached outcome.
    pub fn is_unset(&self) -> bool {
        self.open.is_empty()
            && self.metadata.is_none()
            && self.listing.is_none()
            && self.streams.is_none()
    }
}

/// Tree of cache nodes keyed by path segment.
///
/// Not synchronized; callers serialize access.
#[derive(Debug)]
pub struct PathCacheTree {
    nodes: Vec<CacheNode>,
    free: Vec<usize>,
}

impl Default for PathCacheTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PathCacheTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![CacheNode::new("", ROOT, 0)],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId {
            index: ROOT,
            generation: self.nodes[ROOT].generation,
        }
    }

    /// Walk `path` top-down, creating every missing node on the way.
    pub fn lookup(&mut self, path: &str) -> NodeId {
        let mut current = ROOT;
        for segment in path::segments(path) {
            let existing = self.nodes[current]
                .children
                .as_ref()
                .and_then(|children| children.get(segment).copied());
            current = match existing {
                Some(child) => child,
                None => {
                    let child = self.alloc(segment, current);
                    self.nodes[current]
                        .children
                        .get_or_insert_with(HashMap::new)
                        .insert(segment.to_string(), child);
                    child
                }
            };
        }
        NodeId {
            index: current,
            generation: self.nodes[current].generation,
        }
    }

    /// Parent of `id`. `None` for the root (self-parent sentinel) or a stale id.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        if node.parent == id.index {
            return None;
        }
        Some(NodeId {
            index: node.parent,
            generation: self.nodes[node.parent].generation,
        })
    }

    pub fn node(&self, id: NodeId) -> Option<&CacheNode> {
        self.nodes
            .get(id.index)
            .filter(|n| n.generation == id.generation)
    }

    /// Capture the current state of `id` for a later [`fill`](Self::fill).
    pub fn ticket(&self, id: NodeId) -> Option<Ticket> {
        self.node(id).map(|n| Ticket {
            node: id,
            epoch: n.epoch,
        })
    }

    /// Apply `f` to the node if nothing invalidated it since `ticket` was
    /// taken. Returns whether the node was updated.
    pub fn fill(&mut self, ticket: Ticket, f: impl FnOnce(&mut CacheNode)) -> bool {
        match self.node_mut(ticket.node) {
            Some(node) if node.epoch == ticket.epoch => {
                f(node);
                true
            }
            _ => false,
        }
    }

    pub fn clear_open(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id) {
            node.open.clear();
            node.epoch += 1;
        }
    }

    pub fn clear_metadata(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id) {
            node.metadata = None;
            node.epoch += 1;
        }
    }

    /// Clear the listing slot and forget every descendant.
    pub fn clear_listing(&mut self, id: NodeId) {
        let children = match self.node_mut(id) {
            Some(node) => {
                node.listing = None;
                node.epoch += 1;
                node.children.take()
            }
            None => return,
        };
        for child in children.into_iter().flat_map(HashMap::into_values) {
            self.release(child);
        }
    }

    /// Clear every slot of `id` and forget every descendant.
    pub fn clear_all(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id) {
            node.open.clear();
            node.metadata = None;
            node.streams = None;
        }
        self.clear_listing(id);
    }

    /// Number of live nodes. The root always exists, so this is at least 1.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut CacheNode> {
        self.nodes
            .get_mut(id.index)
            .filter(|n| n.generation == id.generation)
    }

    fn alloc(&mut self, name: &str, parent: usize) -> usize {
        match self.free.pop() {
            Some(index) => {
                let generation = self.nodes[index].generation;
                self.nodes[index] = CacheNode::new(name, parent, generation);
                index
            }
            None => {
                self.nodes.push(CacheNode::new(name, parent, 0));
                self.nodes.len() - 1
            }
        }
    }

    /// Free `index` and its whole subtree.
    fn release(&mut self, index: usize) {
        let mut pending = vec![index];
        while let Some(i) = pending.pop() {
            let node = &mut self.nodes[i];
            if let Some(children) = node.children.take() {
                pending.extend(children.into_values());
            }
            let generation = node.generation + 1;
            *node = CacheNode {
                generation,
                ..Default::default()
            };
            self.free.push(i);
        }
    }
}

//! Result cache in front of a backend.
//!
//! - [`PathCacheTree`] - arena of per-segment nodes holding cached outcomes
//! - [`CacheLayer`] - decorator applying the memoize/invalidate rules

mod layer;
mod tree;

pub use layer::CacheLayer;
pub use tree::{CacheNode, NodeId, OpenKey, PathCacheTree, Slot, Ticket};

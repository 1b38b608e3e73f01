//! The in-memory mirror of the namespace.
//!
//! - `node`: node handles, hints and per-node state
//! - `store`: the arena that owns every node
//! - `sort`: the total order used among siblings

pub mod node;
pub mod sort;
pub mod store;

pub use node::{ChildrenHint, Decoration, NodeHandle, TreeNode};
pub use sort::{compare_keys, SortKey, SortPolicy};
pub use store::{RemovedNode, TreeStats, TreeStore};

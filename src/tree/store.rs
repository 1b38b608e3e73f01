//! Node storage for the mirrored tree.
//!
//! This module provides `TreeStore`, an arena of [`TreeNode`]s keyed by
//! [`NodeHandle`]. Parents own their children through the `children` list;
//! the `parent` link is only used for ancestry walks.

use crate::error::TreeError;
use crate::namespace::{
    AbsoluteId, ChildEntry, EntryKind, ItemComponent, NamespaceItemId, NamespaceProvider,
    WatchHandle,
};
use crate::tree::node::{NodeHandle, TreeNode};
use std::collections::HashMap;

/// A node erased by [`TreeStore::remove`], with the watch it held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedNode {
    /// Handle of the erased node.
    pub handle: NodeHandle,
    /// The watch the node held, which the caller must stop.
    pub watch: Option<WatchHandle>,
}

/// Statistics about the tree.
#[derive(Debug, Default, Clone)]
pub struct TreeStats {
    /// Total nodes added since creation.
    pub total_adds: u64,
    /// Total nodes removed since creation.
    pub total_removes: u64,
    /// Total renames applied.
    pub total_renames: u64,
}

/// Owner of every node in the tree.
#[derive(Debug, Default)]
pub struct TreeStore {
    nodes: HashMap<NodeHandle, TreeNode>,
    roots: Vec<NodeHandle>,
    next_handle: u64,
    stats: TreeStats,
}

impl TreeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the current statistics.
    pub fn stats(&self) -> &TreeStats {
        &self.stats
    }

    /// Whether `handle` is still part of the tree.
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    /// Look up a node.
    pub fn get(&self, handle: NodeHandle) -> Option<&TreeNode> {
        self.nodes.get(&handle)
    }

    pub(crate) fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut TreeNode> {
        self.nodes.get_mut(&handle)
    }

    pub(crate) fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut TreeNode, TreeError> {
        self.nodes
            .get_mut(&handle)
            .ok_or(TreeError::StaleHandle(handle))
    }

    /// Root nodes in insertion order.
    pub fn roots(&self) -> &[NodeHandle] {
        &self.roots
    }

    /// Children of `handle` in display order; empty for unknown handles.
    pub fn children(&self, handle: NodeHandle) -> &[NodeHandle] {
        self.nodes
            .get(&handle)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// All live handles, in no particular order.
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.keys().copied()
    }

    /// Create a root node for `id`.
    ///
    /// Fails if the provider cannot resolve `id`.
    pub fn add_root(
        &mut self,
        provider: &dyn NamespaceProvider,
        id: AbsoluteId,
    ) -> Result<NodeHandle, TreeError> {
        let display_name = provider.resolve_display_name(&id)?;
        let kind = if id.is_root() {
            EntryKind::Drive
        } else {
            EntryKind::FileSystem
        };

        let handle = self.allocate();
        self.nodes.insert(
            handle,
            TreeNode::new(handle, NamespaceItemId::Absolute(id), display_name, kind, None),
        );
        self.roots.push(handle);
        self.stats.total_adds += 1;
        Ok(handle)
    }

    /// Insert a child of `parent` at position `insert_at` (clamped to the
    /// number of existing children).
    pub fn add_child(
        &mut self,
        parent: NodeHandle,
        entry: &ChildEntry,
        insert_at: usize,
    ) -> Result<NodeHandle, TreeError> {
        if !self.nodes.contains_key(&parent) {
            return Err(TreeError::StaleHandle(parent));
        }

        let handle = self.allocate();
        let node = TreeNode::new(
            handle,
            NamespaceItemId::Relative(entry.id.clone()),
            entry.display_name.clone(),
            entry.kind,
            Some(parent),
        );
        self.nodes.insert(handle, node);

        let parent_node = self.node_mut(parent)?;
        let index = insert_at.min(parent_node.children.len());
        parent_node.children.insert(index, handle);

        self.stats.total_adds += 1;
        Ok(handle)
    }

    /// Remove `handle` and its whole subtree.
    ///
    /// Descendants are erased before their ancestors. Returns every erased
    /// node (descendants first, `handle` last) with the watch it held; empty
    /// if `handle` is not in the tree.
    pub fn remove(&mut self, handle: NodeHandle) -> Vec<RemovedNode> {
        let Some(parent) = self.nodes.get(&handle).map(|node| node.parent) else {
            return Vec::new();
        };

        match parent {
            Some(parent) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent) {
                    parent_node.children.retain(|child| *child != handle);
                }
            }
            None => self.roots.retain(|root| *root != handle),
        }

        let order = self.post_order(handle);
        let mut removed = Vec::with_capacity(order.len());
        for current in order {
            if let Some(node) = self.nodes.remove(&current) {
                removed.push(RemovedNode {
                    handle: current,
                    watch: node.watch,
                });
                self.stats.total_removes += 1;
            }
        }
        removed
    }

    /// Derive the full identifier of `handle` by walking to its root.
    pub fn resolve(&self, handle: NodeHandle) -> Result<AbsoluteId, TreeError> {
        let mut chain: Vec<&ItemComponent> = Vec::new();
        let mut current = handle;

        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or(TreeError::StaleHandle(current))?;

            match (&node.id, node.parent) {
                (NamespaceItemId::Absolute(root), _) => {
                    let mut id = root.clone();
                    for component in chain.into_iter().rev() {
                        id = id.join(component.clone());
                    }
                    return Ok(id);
                }
                (NamespaceItemId::Relative(component), Some(parent)) => {
                    chain.push(component);
                    current = parent;
                }
                (NamespaceItemId::Relative(_), None) => {
                    return Err(TreeError::StaleHandle(current));
                }
            }
        }
    }

    /// Find the node for `id` without expanding anything.
    ///
    /// Searches below `root_hint` when given, otherwise below every root.
    pub fn find_by_identifier(
        &self,
        provider: &dyn NamespaceProvider,
        root_hint: Option<NodeHandle>,
        id: &AbsoluteId,
    ) -> Option<NodeHandle> {
        let candidates: Vec<NodeHandle> = match root_hint {
            Some(hint) => vec![hint],
            None => self.roots.clone(),
        };

        candidates.into_iter().find_map(|start| {
            let start_id = self.resolve(start).ok()?;
            let rest = id.strip_prefix(&start_id, |a, b| provider.same_component(a, b))?;
            rest.iter().try_fold(start, |current, component| {
                self.find_child(provider, current, component.as_str())
            })
        })
    }

    /// Find the direct child of `parent` named `component`.
    pub fn find_child(
        &self,
        provider: &dyn NamespaceProvider,
        parent: NodeHandle,
        component: &str,
    ) -> Option<NodeHandle> {
        self.children(parent).iter().copied().find(|child| {
            self.nodes
                .get(child)
                .is_some_and(|node| provider.same_component(node.match_token(), component))
        })
    }

    /// Replace a node's own identifier and display name. Descendants are untouched.
    pub fn rename(
        &mut self,
        handle: NodeHandle,
        id: NamespaceItemId,
        display_name: String,
    ) -> Result<(), TreeError> {
        let node = self.node_mut(handle)?;
        node.id = id;
        node.display_name = display_name;
        self.stats.total_renames += 1;
        Ok(())
    }

    /// Position of `handle` among its siblings (or among the roots).
    pub fn index_in_parent(&self, handle: NodeHandle) -> Option<usize> {
        let node = self.nodes.get(&handle)?;
        let siblings = match node.parent {
            Some(parent) => self.children(parent),
            None => &self.roots,
        };
        siblings.iter().position(|sibling| *sibling == handle)
    }

    /// Move `handle` to `index` among its siblings, where `index` counts
    /// siblings with `handle` already taken out. Returns the final index.
    pub fn reposition(&mut self, handle: NodeHandle, index: usize) -> Result<usize, TreeError> {
        let parent = self
            .nodes
            .get(&handle)
            .ok_or(TreeError::StaleHandle(handle))?
            .parent;

        let siblings = match parent {
            Some(parent) => &mut self.node_mut(parent)?.children,
            None => &mut self.roots,
        };
        siblings.retain(|sibling| *sibling != handle);
        let index = index.min(siblings.len());
        siblings.insert(index, handle);
        Ok(index)
    }

    /// Get a summary of the tree for debugging.
    pub fn debug_summary(&self) -> String {
        format!(
            "TreeStore: {} nodes, {} roots, {} watched, stats: {:?}",
            self.nodes.len(),
            self.roots.len(),
            self.nodes.values().filter(|node| node.watch.is_some()).count(),
            self.stats
        )
    }

    fn allocate(&mut self) -> NodeHandle {
        self.next_handle += 1;
        NodeHandle(self.next_handle)
    }

    fn post_order(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut order = Vec::new();
        let mut stack = vec![(handle, false)];

        while let Some((current, visited)) = stack.pop() {
            if visited {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            for child in self.children(current).iter().rev() {
                stack.push((*child, false));
            }
        }
        order
    }
}

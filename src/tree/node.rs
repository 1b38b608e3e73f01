//! A single node of the mirrored tree.

use crate::namespace::{EntryKind, IconToken, NamespaceItemId, WatchHandle};
use std::fmt;

/// Stable identity of a tree node. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub(crate) u64);

impl NodeHandle {
    /// The raw integer value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Whether a node is known to have children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildrenHint {
    /// Not determined yet. Displayed as expandable.
    #[default]
    Unknown,
    /// Has at least one child.
    Yes,
    /// Has no children.
    No,
}

impl ChildrenHint {
    /// Whether an expand indicator should be shown.
    pub fn is_expandable(self) -> bool {
        !matches!(self, ChildrenHint::No)
    }
}

/// Expensively computed display attributes of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoration {
    /// Resolved icon.
    pub icon: IconToken,
}

/// A node in the [`TreeStore`](super::TreeStore).
///
/// The full identifier is not stored; it is derived from the parent chain by
/// [`TreeStore::resolve`](super::TreeStore::resolve).
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub(crate) handle: NodeHandle,
    pub(crate) id: NamespaceItemId,
    pub(crate) display_name: String,
    pub(crate) kind: EntryKind,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,
    pub(crate) watch: Option<WatchHandle>,
    pub(crate) children_hint: ChildrenHint,
    pub(crate) decoration: Option<Decoration>,
    pub(crate) expanded: bool,
}

impl TreeNode {
    pub(crate) fn new(
        handle: NodeHandle,
        id: NamespaceItemId,
        display_name: String,
        kind: EntryKind,
        parent: Option<NodeHandle>,
    ) -> Self {
        Self {
            handle,
            id,
            display_name,
            kind,
            parent,
            children: Vec::new(),
            watch: None,
            children_hint: ChildrenHint::Unknown,
            decoration: None,
            expanded: false,
        }
    }

    /// This node's handle.
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// The node's own identifier (absolute for roots, relative otherwise).
    pub fn id(&self) -> &NamespaceItemId {
        &self.id
    }

    /// Name shown for the node; also the sort key.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Sort group of the node.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Parent node, `None` for roots.
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// Children in display order.
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// The change watch covering this node's subtree, if any.
    pub fn watch(&self) -> Option<WatchHandle> {
        self.watch
    }

    /// Current expandability hint.
    pub fn children_hint(&self) -> ChildrenHint {
        self.children_hint
    }

    /// Resolved decoration, if any.
    pub fn decoration(&self) -> Option<Decoration> {
        self.decoration
    }

    /// Whether the children have been listed.
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// The component used to match this node against identifiers.
    pub(crate) fn match_token(&self) -> &str {
        match &self.id {
            NamespaceItemId::Absolute(id) => id.root(),
            NamespaceItemId::Relative(component) => component.as_str(),
        }
    }
}

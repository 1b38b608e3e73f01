//! Notifications sent to the display layer.
//!
//! Every notification is published after the mutation it describes has been
//! applied to the tree.

use crate::tree::NodeHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A change the tree control has to reflect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayUpdate {
    /// A node was inserted at `index` under `parent` (`None` for roots).
    NodeInserted {
        /// Parent node, `None` for roots.
        parent: Option<NodeHandle>,
        /// Position among the parent's children.
        index: usize,
        /// The new node.
        handle: NodeHandle,
    },
    /// A node's name changed, and possibly its position.
    NodeRenamed(NodeHandle),
    /// A node's icon changed or was invalidated.
    DecorationChanged(NodeHandle),
    /// A node and its subtree were removed.
    NodeRemoved(NodeHandle),
    /// Whether an expand indicator should be shown changed.
    ExpandabilityChanged {
        /// The affected node.
        handle: NodeHandle,
        /// New value.
        expandable: bool,
    },
}

impl DisplayUpdate {
    /// The node the update is about.
    pub fn handle(&self) -> NodeHandle {
        match *self {
            DisplayUpdate::NodeInserted { handle, .. }
            | DisplayUpdate::ExpandabilityChanged { handle, .. } => handle,
            DisplayUpdate::NodeRenamed(handle)
            | DisplayUpdate::DecorationChanged(handle)
            | DisplayUpdate::NodeRemoved(handle) => handle,
        }
    }

    /// Whether the update changes the shape of the tree.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DisplayUpdate::NodeInserted { .. } | DisplayUpdate::NodeRemoved(_)
        )
    }
}

/// Receiver of [`DisplayUpdate`]s.
pub trait DisplaySink: Send + Sync {
    /// Deliver one update.
    fn publish(&self, update: DisplayUpdate);

    /// A node was inserted.
    fn node_inserted(&self, parent: Option<NodeHandle>, index: usize, handle: NodeHandle) {
        self.publish(DisplayUpdate::NodeInserted {
            parent,
            index,
            handle,
        });
    }

    /// A node was renamed.
    fn node_renamed(&self, handle: NodeHandle) {
        self.publish(DisplayUpdate::NodeRenamed(handle));
    }

    /// A node's decoration changed.
    fn decoration_changed(&self, handle: NodeHandle) {
        self.publish(DisplayUpdate::DecorationChanged(handle));
    }

    /// A node was removed.
    fn node_removed(&self, handle: NodeHandle) {
        self.publish(DisplayUpdate::NodeRemoved(handle));
    }

    /// A node's expandability changed.
    fn expandability_changed(&self, handle: NodeHandle, expandable: bool) {
        self.publish(DisplayUpdate::ExpandabilityChanged { handle, expandable });
    }
}

/// Forwards updates over a `tokio` broadcast channel.
#[derive(Clone)]
pub struct BroadcastDisplay {
    sender: broadcast::Sender<DisplayUpdate>,
}

impl BroadcastDisplay {
    /// Create the display and a first receiver.
    pub fn new(buffer_size: usize) -> (Self, broadcast::Receiver<DisplayUpdate>) {
        let (sender, receiver) = broadcast::channel(buffer_size);
        (Self { sender }, receiver)
    }

    /// Subscribe another listener.
    pub fn subscribe(&self) -> broadcast::Receiver<DisplayUpdate> {
        self.sender.subscribe()
    }
}

impl DisplaySink for BroadcastDisplay {
    fn publish(&self, update: DisplayUpdate) {
        // No receivers is not an error; the view may not be attached yet.
        if self.sender.send(update).is_err() {
            tracing::trace!("No display listeners for {:?}", update);
        }
    }
}

/// Keeps every update in memory.
#[derive(Clone, Default)]
pub struct RecordingDisplay {
    updates: Arc<Mutex<Vec<DisplayUpdate>>>,
}

impl RecordingDisplay {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far.
    pub fn updates(&self) -> Vec<DisplayUpdate> {
        self.updates.lock().clone()
    }

    /// Take everything published so far.
    pub fn take(&self) -> Vec<DisplayUpdate> {
        std::mem::take(&mut *self.updates.lock())
    }

    /// Whether any update mentions `handle`.
    pub fn mentions(&self, handle: NodeHandle) -> bool {
        self.updates.lock().iter().any(|u| u.handle() == handle)
    }
}

impl DisplaySink for RecordingDisplay {
    fn publish(&self, update: DisplayUpdate) {
        self.updates.lock().push(update);
    }
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn publish(&self, _update: DisplayUpdate) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_display_keeps_order() {
        let display = RecordingDisplay::new();
        display.node_inserted(None, 0, NodeHandle(1));
        display.expandability_changed(NodeHandle(1), false);

        assert_eq!(
            display.take(),
            vec![
                DisplayUpdate::NodeInserted {
                    parent: None,
                    index: 0,
                    handle: NodeHandle(1)
                },
                DisplayUpdate::ExpandabilityChanged {
                    handle: NodeHandle(1),
                    expandable: false
                },
            ]
        );
        assert!(display.updates().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_display_reaches_subscribers() {
        let (display, mut rx) = BroadcastDisplay::new(8);
        let mut late = display.subscribe();

        display.node_renamed(NodeHandle(4));

        assert_eq!(rx.recv().await.unwrap(), DisplayUpdate::NodeRenamed(NodeHandle(4)));
        assert_eq!(late.recv().await.unwrap(), DisplayUpdate::NodeRenamed(NodeHandle(4)));
    }
}

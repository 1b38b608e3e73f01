//! Shell Tree Sync
//!
//! This crate keeps an in-memory folder tree in sync with a live namespace
//! (a filesystem, or anything that can list, describe and watch entries)
//! that other processes mutate behind its back.
//!
//! ## How It Works
//!
//! ```text
//! RequestExpand(node)
//!        ↓
//! Expander lists, filters, sorts and inserts children, then watches the node
//!        ↓
//! NamespaceProvider pushes raw notifications
//!        ↓
//! ChangeWatcher buffers them until the namespace has been quiet for a while
//!        ↓
//! TreeSynchronizer applies the batch to the TreeStore [OWNING THREAD]
//!        ↓
//! DisplaySink is told what changed
//! ```
//!
//! Icons and "has subfolders" hints are resolved on two background workers.
//! Their results come back tagged with a request id and are dropped if the
//! node has gone away in the meantime.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use shell_tree_sync::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Arc::new(FileSystemProvider::default());
//!     let (display, mut updates) = BroadcastDisplay::new(256);
//!
//!     let mut tree = ShellTreeBuilder::new(provider)
//!         .display(Arc::new(display))
//!         .debounce(Duration::from_millis(100))
//!         .build()?;
//!
//!     tokio::spawn(async move {
//!         while let Ok(update) = updates.recv().await {
//!             println!("{:?}", update);
//!         }
//!     });
//!
//!     let root = tree.add_root(AbsoluteId::from_path(std::path::Path::new("/srv/data")))?;
//!     tree.request_expand(root)?;
//!
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//!     run_tree_loop(&mut tree, Duration::from_millis(50), shutdown_rx).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`namespace`]: the provider boundary, identifiers and two providers
//! - [`tree`]: nodes, the node store and sibling ordering
//! - [`expander`]: lazy listing of children
//! - [`decoration`]: background icon and subfolder resolution
//! - [`watcher`]: watch registration and debounced batches
//! - [`sync`]: applying change batches to the tree
//! - [`ui`]: display notifications and their adapters
//! - [`shell_tree`]: the facade tying everything together

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod decoration;
pub mod error;
pub mod expander;
pub mod namespace;
pub mod shell_tree;
pub mod sync;
pub mod tree;
pub mod ui;
pub mod watcher;

pub use config::TreeConfig;
pub use error::{NamespaceError, TreeError};
pub use shell_tree::{ShellTree, ShellTreeBuilder};

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::config::TreeConfig;
    pub use crate::error::{NamespaceError, TreeError};
    pub use crate::namespace::{
        AbsoluteId, ChildEntry, EntryKind, FileSystemProvider, FilterSet, ItemComponent,
        MemoryProvider, NamespaceItemId, NamespaceProvider,
    };
    pub use crate::shell_tree::{ShellTree, ShellTreeBuilder};
    pub use crate::tree::{ChildrenHint, NodeHandle, SortPolicy, TreeStore};
    pub use crate::ui::{
        BroadcastDisplay, DisplaySink, DisplayUpdate, NullDisplay, RecordingDisplay,
    };
    pub use crate::watcher::ChangeEvent;
    pub use crate::run_tree_loop;
}

use std::time::Duration;
use tokio::sync::broadcast;

/// Run the owning-thread loop.
///
/// Pumps `tree` every `poll_interval` until a message arrives on `shutdown`
/// (or its sender is dropped). Returns the number of pumps performed.
pub async fn run_tree_loop(
    tree: &mut ShellTree,
    poll_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> u64 {
    let mut pumps = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("Tree loop stopping after {} pumps", pumps);
                return pumps;
            }
            _ = tokio::time::sleep(poll_interval) => {
                tree.pump();
                pumps += 1;
            }
        }
    }
}

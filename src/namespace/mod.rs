//! The namespace provider boundary.
//!
//! This module provides:
//! - `id`: identifiers for namespace entries
//! - `fs`: a provider backed by real directories, watched through `notify`
//! - `memory`: an in-memory provider used by tests and demos
//!
//! Providers are shared between the owning thread and the decoration workers,
//! so every provider is `Send + Sync`. Workers only ever call the read-only
//! resolution methods.

pub mod fs;
pub mod id;
pub mod memory;

pub use fs::{FileSystemProvider, WatcherError};
pub use id::{AbsoluteId, ItemComponent, NamespaceItemId};
pub use memory::MemoryProvider;

use crate::error::NamespaceError;
use crossbeam_channel::Sender;
use std::fmt;

/// How an entry sorts relative to its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    /// A drive or other namespace root. Always listed first.
    Drive,
    /// A virtual item with no filesystem backing (e.g. a control panel).
    Virtual,
    /// A regular file or folder.
    FileSystem,
}

/// One entry returned by [`NamespaceProvider::list_children`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    /// Identifier relative to the listed parent.
    pub id: ItemComponent,
    /// Name shown to the user and used as the sort key.
    pub display_name: String,
    /// Whether the entry can itself have children.
    pub is_container: bool,
    /// Sort group.
    pub kind: EntryKind,
    /// Whether the entry is hidden from normal listings.
    pub hidden: bool,
}

impl ChildEntry {
    /// A visible filesystem folder whose display name equals its component.
    pub fn folder(name: &str) -> Self {
        Self {
            id: ItemComponent::new(name),
            display_name: name.to_string(),
            is_container: true,
            kind: EntryKind::FileSystem,
            hidden: false,
        }
    }
}

/// Which entries a listing (or a watch) is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSet {
    /// Include hidden entries.
    pub include_hidden: bool,
    /// Only list containers.
    pub folders_only: bool,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            include_hidden: false,
            folders_only: true,
        }
    }
}

impl FilterSet {
    /// Whether `entry` passes this filter.
    pub fn accepts(&self, entry: &ChildEntry) -> bool {
        (self.include_hidden || !entry.hidden) && (!self.folders_only || entry.is_container)
    }
}

/// Options for a change watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchFilter {
    /// Report changes anywhere below the watched entry, not only its direct children.
    pub recursive: bool,
}

/// Opaque icon index produced by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IconToken(pub u32);

impl IconToken {
    /// Icon shown for folders until the real icon arrives.
    pub const DEFAULT_FOLDER: IconToken = IconToken(3);
}

/// Identity of a watch held by the [`ChangeWatcher`](crate::watcher::ChangeWatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(pub u64);

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// Provider-side identity of a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// Provider-specific change codes, before translation into
/// [`ChangeEvent`](crate::watcher::ChangeEvent)s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawChangeCode {
    /// A non-folder item was created.
    Create,
    /// A folder was created.
    MkDir,
    /// A drive was added.
    DriveAdd,
    /// Removable media was inserted.
    MediaInserted,
    /// A non-folder item was deleted.
    Delete,
    /// A folder was deleted.
    RmDir,
    /// A drive was removed.
    DriveRemoved,
    /// Removable media was removed.
    MediaRemoved,
    /// A non-folder item was renamed.
    RenameItem,
    /// A folder was renamed.
    RenameFolder,
    /// Contents of a non-folder item changed.
    UpdateItem,
    /// Attributes of an item changed.
    Attributes,
    /// The contents of a folder changed in some unspecified way.
    UpdateDir,
    /// A code this crate does not understand.
    Other(u32),
}

/// A raw change notification as pushed by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// The watch the notification was delivered for.
    pub watch: WatchHandle,
    /// What happened.
    pub code: RawChangeCode,
    /// The affected item (the old name for renames).
    pub primary: AbsoluteId,
    /// The new name for renames.
    pub secondary: Option<AbsoluteId>,
}

/// Push endpoint handed to a provider when a watch is registered.
///
/// Sending never blocks; notifications queue up until the owning thread
/// drains them.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    watch: WatchHandle,
    tx: Sender<RawNotification>,
}

impl NotificationSink {
    pub(crate) fn new(watch: WatchHandle, tx: Sender<RawNotification>) -> Self {
        Self { watch, tx }
    }

    /// The watch this sink reports for.
    pub fn watch(&self) -> WatchHandle {
        self.watch
    }

    /// Push a notification. Returns false once the watcher has gone away.
    pub fn notify(
        &self,
        code: RawChangeCode,
        primary: AbsoluteId,
        secondary: Option<AbsoluteId>,
    ) -> bool {
        self.tx
            .send(RawNotification {
                watch: self.watch,
                code,
                primary,
                secondary,
            })
            .is_ok()
    }
}

/// The external service that lists, identifies and watches namespace entries.
pub trait NamespaceProvider: Send + Sync {
    /// List the direct children of `id` that pass `filter`.
    fn list_children(
        &self,
        id: &AbsoluteId,
        filter: FilterSet,
    ) -> Result<Vec<ChildEntry>, NamespaceError>;

    /// Describe a single entry as it would appear in its parent's listing.
    fn describe_item(&self, id: &AbsoluteId) -> Result<ChildEntry, NamespaceError>;

    /// The name shown for `id`.
    fn resolve_display_name(&self, id: &AbsoluteId) -> Result<String, NamespaceError>;

    /// The icon for `id`. Called on the icon worker.
    fn resolve_icon(&self, id: &AbsoluteId) -> Result<IconToken, NamespaceError>;

    /// Whether `id` has at least one sub-container. Called on the subfolder worker.
    fn has_subfolder(&self, id: &AbsoluteId) -> Result<bool, NamespaceError>;

    /// Start delivering raw notifications for `subtree` into `sink`.
    ///
    /// Returns `None` when the provider cannot watch the subtree.
    fn register_watch(
        &self,
        subtree: &AbsoluteId,
        filter: WatchFilter,
        sink: NotificationSink,
    ) -> Option<RegistrationId>;

    /// Stop a registration made by [`register_watch`](Self::register_watch).
    fn deregister(&self, registration: RegistrationId);

    /// Component equality. Defaults to exact comparison.
    fn same_component(&self, a: &str, b: &str) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_hides_files_and_hidden_entries() {
        let filter = FilterSet::default();
        let mut entry = ChildEntry::folder("src");
        assert!(filter.accepts(&entry));

        entry.hidden = true;
        assert!(!filter.accepts(&entry));
        assert!(FilterSet {
            include_hidden: true,
            ..filter
        }
        .accepts(&entry));

        let file = ChildEntry {
            is_container: false,
            ..ChildEntry::folder("main.rs")
        };
        assert!(!filter.accepts(&file));
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = NotificationSink::new(WatchHandle(7), tx);
        let id = AbsoluteId::new("/").join("a");

        assert!(sink.notify(RawChangeCode::MkDir, id.clone(), None));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.watch, WatchHandle(7));
        assert_eq!(received.primary, id);

        drop(rx);
        assert!(!sink.notify(RawChangeCode::RmDir, id, None));
    }
}

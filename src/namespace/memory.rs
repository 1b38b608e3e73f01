//! In-memory namespace provider.
//!
//! Mutations made through the `create_*`, `rename`, `remove` and `touch`
//! methods are pushed to every matching watch synchronously, the same way a
//! real provider would report external changes. Setup methods (`add_*`) do
//! not notify.

use crate::error::NamespaceError;
use crate::namespace::{
    AbsoluteId, ChildEntry, EntryKind, FilterSet, IconToken, ItemComponent, NamespaceProvider,
    NotificationSink, RawChangeCode, RegistrationId, WatchFilter,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct MemoryEntry {
    display_name: String,
    kind: EntryKind,
    is_container: bool,
    hidden: bool,
    icon: Option<IconToken>,
}

struct Registration {
    subtree: AbsoluteId,
    filter: WatchFilter,
    sink: NotificationSink,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<AbsoluteId, MemoryEntry>,
    watches: HashMap<RegistrationId, Registration>,
    next_registration: u64,
    failing_listings: HashSet<AbsoluteId>,
    rejected_watches: HashSet<AbsoluteId>,
    failing_icons: HashSet<AbsoluteId>,
    list_calls: usize,
    registrations: usize,
    deregistrations: usize,
}

/// A namespace held entirely in memory.
#[derive(Default)]
pub struct MemoryProvider {
    state: Mutex<MemoryState>,
    case_insensitive: bool,
}

impl MemoryProvider {
    /// An empty namespace with exact component matching.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty namespace that compares components case-insensitively.
    pub fn case_insensitive() -> Self {
        Self {
            state: Mutex::default(),
            case_insensitive: true,
        }
    }

    /// Add a drive-like root.
    pub fn add_root(&self, root: &AbsoluteId) {
        let entry = MemoryEntry {
            display_name: root.to_string(),
            kind: EntryKind::Drive,
            is_container: true,
            hidden: false,
            icon: None,
        };
        self.state.lock().entries.insert(root.clone(), entry);
    }

    /// Add a folder without notifying watches.
    pub fn add_folder(&self, id: &AbsoluteId) {
        self.insert(id, Self::folder_entry(id, EntryKind::FileSystem));
    }

    /// Add a virtual folder without notifying watches.
    pub fn add_virtual_folder(&self, id: &AbsoluteId) {
        self.insert(id, Self::folder_entry(id, EntryKind::Virtual));
    }

    /// Add a hidden folder without notifying watches.
    pub fn add_hidden_folder(&self, id: &AbsoluteId) {
        let mut entry = Self::folder_entry(id, EntryKind::FileSystem);
        entry.hidden = true;
        self.insert(id, entry);
    }

    /// Add a non-container item without notifying watches.
    pub fn add_item(&self, id: &AbsoluteId) {
        let mut entry = Self::folder_entry(id, EntryKind::FileSystem);
        entry.is_container = false;
        self.insert(id, entry);
    }

    /// Create a folder and report it.
    pub fn create_folder(&self, id: &AbsoluteId) {
        self.add_folder(id);
        self.emit(RawChangeCode::MkDir, id, None);
    }

    /// Rename (or move) an entry together with everything below it, and report it.
    pub fn rename(&self, old: &AbsoluteId, new: &AbsoluteId) {
        let is_container = {
            let mut state = self.state.lock();
            let moved: Vec<AbsoluteId> = state
                .entries
                .keys()
                .filter(|id| id.starts_with(old))
                .cloned()
                .collect();

            let mut is_container = false;
            for id in moved {
                let Some(mut entry) = state.entries.remove(&id) else {
                    continue;
                };
                let rest = id
                    .strip_prefix(old, |a, b| a == b)
                    .map(|rest| rest.to_vec())
                    .unwrap_or_default();
                let mut target = new.clone();
                for component in rest {
                    target = target.join(component);
                }
                if id == *old {
                    is_container = entry.is_container;
                    if let Some(name) = new.last_component() {
                        entry.display_name = name.to_string();
                    }
                }
                state.entries.insert(target, entry);
            }
            is_container
        };

        let code = if is_container {
            RawChangeCode::RenameFolder
        } else {
            RawChangeCode::RenameItem
        };
        self.emit(code, old, Some(new));
    }

    /// Remove an entry and everything below it, and report it.
    pub fn remove(&self, id: &AbsoluteId) {
        let is_container = {
            let mut state = self.state.lock();
            let is_container = state
                .entries
                .get(id)
                .map(|entry| entry.is_container)
                .unwrap_or(true);
            state
                .entries
                .retain(|existing, _| !existing.starts_with(id));
            is_container
        };

        let code = if is_container {
            RawChangeCode::RmDir
        } else {
            RawChangeCode::Delete
        };
        self.emit(code, id, None);
    }

    /// Report an attribute change on `id`.
    pub fn touch(&self, id: &AbsoluteId) {
        self.emit(RawChangeCode::Attributes, id, None);
    }

    /// Push an arbitrary raw notification to every watch interested in `primary`.
    pub fn emit(&self, code: RawChangeCode, primary: &AbsoluteId, secondary: Option<&AbsoluteId>) {
        let state = self.state.lock();
        for registration in state.watches.values() {
            let interested = Self::watch_covers(registration, primary)
                || secondary.is_some_and(|new| Self::watch_covers(registration, new));
            if interested {
                registration
                    .sink
                    .notify(code, primary.clone(), secondary.cloned());
            }
        }
    }

    /// Override the icon reported for `id`.
    pub fn set_icon(&self, id: &AbsoluteId, icon: IconToken) {
        if let Some(entry) = self.state.lock().entries.get_mut(id) {
            entry.icon = Some(icon);
        }
    }

    /// Make listings of `id` fail.
    pub fn fail_listing(&self, id: &AbsoluteId) {
        self.state.lock().failing_listings.insert(id.clone());
    }

    /// Make watch registration for `id` fail.
    pub fn reject_watch(&self, id: &AbsoluteId) {
        self.state.lock().rejected_watches.insert(id.clone());
    }

    /// Make icon resolution for `id` fail.
    pub fn fail_icon(&self, id: &AbsoluteId) {
        self.state.lock().failing_icons.insert(id.clone());
    }

    /// Whether `id` exists.
    pub fn contains(&self, id: &AbsoluteId) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Number of `list_children` calls so far.
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Number of currently registered watches.
    pub fn active_watches(&self) -> usize {
        self.state.lock().watches.len()
    }

    /// Number of successful registrations so far.
    pub fn registrations(&self) -> usize {
        self.state.lock().registrations
    }

    /// Number of deregistrations so far.
    pub fn deregistrations(&self) -> usize {
        self.state.lock().deregistrations
    }

    /// Subtrees currently being watched.
    pub fn watched_subtrees(&self) -> Vec<AbsoluteId> {
        self.state
            .lock()
            .watches
            .values()
            .map(|registration| registration.subtree.clone())
            .collect()
    }

    fn insert(&self, id: &AbsoluteId, entry: MemoryEntry) {
        self.state.lock().entries.insert(id.clone(), entry);
    }

    fn folder_entry(id: &AbsoluteId, kind: EntryKind) -> MemoryEntry {
        MemoryEntry {
            display_name: id
                .last_component()
                .map(|c| c.to_string())
                .unwrap_or_else(|| id.to_string()),
            kind,
            is_container: true,
            hidden: false,
            icon: None,
        }
    }

    fn watch_covers(registration: &Registration, id: &AbsoluteId) -> bool {
        if registration.filter.recursive {
            return id.starts_with(&registration.subtree);
        }
        *id == registration.subtree || id.parent().as_ref() == Some(&registration.subtree)
    }

    fn to_child_entry(id: &AbsoluteId, entry: &MemoryEntry) -> ChildEntry {
        ChildEntry {
            id: id
                .last_component()
                .cloned()
                .unwrap_or_else(|| ItemComponent::new(id.root())),
            display_name: entry.display_name.clone(),
            is_container: entry.is_container,
            kind: entry.kind,
            hidden: entry.hidden,
        }
    }

    fn lookup(&self, id: &AbsoluteId) -> Result<MemoryEntry, NamespaceError> {
        self.state
            .lock()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| NamespaceError::NotFound(id.clone()))
    }
}

impl NamespaceProvider for MemoryProvider {
    fn list_children(
        &self,
        id: &AbsoluteId,
        filter: FilterSet,
    ) -> Result<Vec<ChildEntry>, NamespaceError> {
        let mut state = self.state.lock();
        state.list_calls += 1;

        if state.failing_listings.contains(id) {
            return Err(NamespaceError::Rejected {
                id: id.clone(),
                reason: "listing disabled".to_string(),
            });
        }
        if !state.entries.contains_key(id) {
            return Err(NamespaceError::NotFound(id.clone()));
        }

        Ok(state
            .entries
            .iter()
            .filter(|(child, _)| child.parent().as_ref() == Some(id))
            .map(|(child, entry)| Self::to_child_entry(child, entry))
            .filter(|entry| filter.accepts(entry))
            .collect())
    }

    fn describe_item(&self, id: &AbsoluteId) -> Result<ChildEntry, NamespaceError> {
        let entry = self.lookup(id)?;
        Ok(Self::to_child_entry(id, &entry))
    }

    fn resolve_display_name(&self, id: &AbsoluteId) -> Result<String, NamespaceError> {
        Ok(self.lookup(id)?.display_name)
    }

    fn resolve_icon(&self, id: &AbsoluteId) -> Result<IconToken, NamespaceError> {
        if self.state.lock().failing_icons.contains(id) {
            return Err(NamespaceError::Rejected {
                id: id.clone(),
                reason: "icon lookup disabled".to_string(),
            });
        }
        let entry = self.lookup(id)?;
        Ok(entry.icon.unwrap_or(if entry.is_container {
            IconToken::DEFAULT_FOLDER
        } else {
            IconToken(0)
        }))
    }

    fn has_subfolder(&self, id: &AbsoluteId) -> Result<bool, NamespaceError> {
        let state = self.state.lock();
        if !state.entries.contains_key(id) {
            return Err(NamespaceError::NotFound(id.clone()));
        }
        Ok(state
            .entries
            .iter()
            .any(|(child, entry)| entry.is_container && child.parent().as_ref() == Some(id)))
    }

    fn register_watch(
        &self,
        subtree: &AbsoluteId,
        filter: WatchFilter,
        sink: NotificationSink,
    ) -> Option<RegistrationId> {
        let mut state = self.state.lock();
        if state.rejected_watches.contains(subtree) || !state.entries.contains_key(subtree) {
            return None;
        }

        state.next_registration += 1;
        let registration = RegistrationId(state.next_registration);
        state.watches.insert(
            registration,
            Registration {
                subtree: subtree.clone(),
                filter,
                sink,
            },
        );
        state.registrations += 1;
        Some(registration)
    }

    fn deregister(&self, registration: RegistrationId) {
        let mut state = self.state.lock();
        if state.watches.remove(&registration).is_some() {
            state.deregistrations += 1;
        }
    }

    fn same_component(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::WatchHandle;

    fn root() -> AbsoluteId {
        AbsoluteId::new("C:\\")
    }

    #[test]
    fn test_list_children_filters_and_fails_on_demand() {
        let provider = MemoryProvider::new();
        provider.add_root(&root());
        provider.add_folder(&root().join("Users"));
        provider.add_hidden_folder(&root().join("$Recycle.Bin"));
        provider.add_item(&root().join("pagefile.sys"));

        let children = provider.list_children(&root(), FilterSet::default()).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].display_name, "Users");

        let all = provider
            .list_children(
                &root(),
                FilterSet {
                    include_hidden: true,
                    folders_only: false,
                },
            )
            .unwrap();
        assert_eq!(all.len(), 3);

        provider.fail_listing(&root());
        assert!(provider.list_children(&root(), FilterSet::default()).is_err());
        assert_eq!(provider.list_calls(), 3);
    }

    #[test]
    fn test_rename_moves_descendants_and_notifies() {
        let provider = MemoryProvider::new();
        provider.add_root(&root());
        provider.add_folder(&root().join("Users"));
        provider.add_folder(&root().join("Users").join("Public"));

        let (tx, rx) = crossbeam_channel::unbounded();
        provider
            .register_watch(
                &root(),
                WatchFilter::default(),
                NotificationSink::new(WatchHandle(1), tx),
            )
            .unwrap();

        provider.rename(&root().join("Users"), &root().join("Users2"));

        assert!(provider.contains(&root().join("Users2").join("Public")));
        assert!(!provider.contains(&root().join("Users")));

        let raw = rx.try_recv().unwrap();
        assert_eq!(raw.code, RawChangeCode::RenameFolder);
        assert_eq!(raw.primary, root().join("Users"));
        assert_eq!(raw.secondary, Some(root().join("Users2")));
    }

    #[test]
    fn test_non_recursive_watch_ignores_grandchildren() {
        let provider = MemoryProvider::new();
        provider.add_root(&root());
        provider.add_folder(&root().join("Users"));

        let (tx, rx) = crossbeam_channel::unbounded();
        let registration = provider
            .register_watch(
                &root(),
                WatchFilter::default(),
                NotificationSink::new(WatchHandle(1), tx),
            )
            .unwrap();

        provider.create_folder(&root().join("Users").join("Public"));
        assert!(rx.try_recv().is_err());

        provider.create_folder(&root().join("Windows"));
        assert_eq!(rx.try_recv().unwrap().code, RawChangeCode::MkDir);

        provider.deregister(registration);
        assert_eq!(provider.active_watches(), 0);
        assert_eq!(provider.deregistrations(), 1);
    }

    #[test]
    fn test_rejected_watch_returns_none() {
        let provider = MemoryProvider::new();
        provider.add_root(&root());
        provider.reject_watch(&root());

        let (tx, _rx) = crossbeam_channel::unbounded();
        let registration = provider.register_watch(
            &root(),
            WatchFilter::default(),
            NotificationSink::new(WatchHandle(1), tx),
        );
        assert!(registration.is_none());
    }

    #[test]
    fn test_has_subfolder_ignores_items() {
        let provider = MemoryProvider::new();
        provider.add_root(&root());
        provider.add_folder(&root().join("Empty"));
        provider.add_item(&root().join("Empty").join("readme.txt"));

        assert!(provider.has_subfolder(&root()).unwrap());
        assert!(!provider.has_subfolder(&root().join("Empty")).unwrap());
    }
}

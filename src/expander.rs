//! Lazy expansion of tree nodes.
//!
//! Children are only listed when a node is expanded. The listing is filtered,
//! sorted and inserted in one go, after which the node gets a change watch so
//! later additions and removals show up without listing again.

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::namespace::{ChildEntry, FilterSet, WatchFilter};
use crate::shell_tree::TreeState;
use crate::tree::{compare_keys, ChildrenHint, NodeHandle, SortKey, SortPolicy, TreeStore};
use crate::ui::DisplaySink;
use std::cmp::Ordering;

/// Lists, filters and sorts children on demand.
#[derive(Debug, Clone)]
pub struct Expander {
    filter: FilterSet,
    sort: SortPolicy,
    watch_filter: WatchFilter,
}

impl Expander {
    /// Create an expander following `config`.
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            filter: config.filter_set(),
            sort: config.sort,
            watch_filter: config.watch_filter(),
        }
    }

    /// The listing filter in use.
    pub fn filter(&self) -> FilterSet {
        self.filter
    }

    /// Change whether hidden entries are listed. Existing children are not touched.
    pub fn set_show_hidden(&mut self, show: bool) {
        self.filter.include_hidden = show;
    }

    /// Whether `entry` would be listed.
    pub fn accepts(&self, entry: &ChildEntry) -> bool {
        self.filter.accepts(entry)
    }

    /// Expand `handle`: list, sort and insert its children, then watch it.
    ///
    /// Expanding an expanded node does nothing. A failed listing is not an
    /// error: the node is marked as having no children and nothing is retried.
    pub(crate) fn expand(&self, state: &mut TreeState, handle: NodeHandle) -> Result<(), TreeError> {
        let node = state.store.get(handle).ok_or(TreeError::StaleHandle(handle))?;
        if node.expanded {
            return Ok(());
        }
        let id = state.store.resolve(handle)?;

        let mut entries = match state.provider.list_children(&id, self.filter) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to list children of {}: {}", id, e);
                self.mark_childless(state, handle)?;
                return Ok(());
            }
        };

        entries.retain(|entry| self.accepts(entry));
        entries.sort_by(|a, b| self.compare_entries(a, b));

        for (index, entry) in entries.iter().enumerate() {
            let child = state.store.add_child(handle, entry, index)?;
            state.display.node_inserted(Some(handle), index, child);
        }
        tracing::debug!("Expanded {} with {} children", id, entries.len());

        state.store.node_mut(handle)?.expanded = true;
        if entries.is_empty() {
            self.mark_childless(state, handle)?;
        } else {
            state.store.node_mut(handle)?.children_hint = ChildrenHint::Yes;
        }

        self.ensure_watch(state, handle)
    }

    /// Collapse `handle`: drop its children and the watches they held.
    ///
    /// The node keeps its own watch so additions below it still correct its
    /// children hint; expanding it again reuses that watch.
    pub(crate) fn collapse(
        &self,
        state: &mut TreeState,
        handle: NodeHandle,
    ) -> Result<(), TreeError> {
        if !state.store.contains(handle) {
            return Err(TreeError::StaleHandle(handle));
        }

        for child in state.store.children(handle).to_vec() {
            state.remove_subtree(child);
        }

        let node = state.store.node_mut(handle)?;
        let was_childless = node.children_hint == ChildrenHint::No;
        node.expanded = false;
        node.children_hint = ChildrenHint::Unknown;

        if was_childless {
            state.display.expandability_changed(handle, true);
        }
        Ok(())
    }

    /// Re-list an expanded node, dropping children that are gone (or now
    /// filtered out) and inserting new ones at their sorted positions.
    pub(crate) fn refresh(&self, state: &mut TreeState, handle: NodeHandle) -> Result<(), TreeError> {
        let node = state.store.get(handle).ok_or(TreeError::StaleHandle(handle))?;
        if !node.expanded {
            return Ok(());
        }
        let id = state.store.resolve(handle)?;

        let entries: Vec<ChildEntry> = match state.provider.list_children(&id, self.filter) {
            Ok(entries) => entries.into_iter().filter(|e| self.accepts(e)).collect(),
            Err(e) => {
                tracing::warn!("Failed to refresh children of {}: {}", id, e);
                return Ok(());
            }
        };

        let provider = state.provider.clone();
        let stale: Vec<NodeHandle> = state
            .store
            .children(handle)
            .iter()
            .copied()
            .filter(|child| {
                state.store.get(*child).is_some_and(|node| {
                    !entries
                        .iter()
                        .any(|entry| provider.same_component(node.match_token(), entry.id.as_str()))
                })
            })
            .collect();
        for child in stale {
            state.remove_subtree(child);
        }

        for entry in &entries {
            if state
                .store
                .find_child(provider.as_ref(), handle, entry.id.as_str())
                .is_some()
            {
                continue;
            }
            let index = self.insertion_index(&state.store, handle, &entry_key(entry), None);
            let child = state.store.add_child(handle, entry, index)?;
            state.display.node_inserted(Some(handle), index, child);
        }

        let has_children = !state.store.children(handle).is_empty();
        let node = state.store.node_mut(handle)?;
        let previous = node.children_hint;
        node.children_hint = if has_children {
            ChildrenHint::Yes
        } else {
            ChildrenHint::No
        };
        if previous.is_expandable() != has_children {
            state.display.expandability_changed(handle, has_children);
        }
        Ok(())
    }

    /// Watch `handle`'s subtree unless it is already watched.
    pub(crate) fn ensure_watch(
        &self,
        state: &mut TreeState,
        handle: NodeHandle,
    ) -> Result<(), TreeError> {
        if state.store.get(handle).and_then(|node| node.watch).is_some() {
            return Ok(());
        }
        let id = state.store.resolve(handle)?;
        if let Some(watch) = state.watcher.start_watching(&id, self.watch_filter) {
            state.store.node_mut(handle)?.watch = Some(watch);
        }
        Ok(())
    }

    /// Position at which an entry with `key` belongs among `parent`'s
    /// children, ignoring `exclude`.
    pub fn insertion_index(
        &self,
        store: &TreeStore,
        parent: NodeHandle,
        key: &SortKey<'_>,
        exclude: Option<NodeHandle>,
    ) -> usize {
        store
            .children(parent)
            .iter()
            .filter(|child| Some(**child) != exclude)
            .filter_map(|child| store.get(*child))
            .take_while(|sibling| {
                let sibling_key = SortKey {
                    kind: sibling.kind,
                    display_name: &sibling.display_name,
                    id: sibling.match_token(),
                };
                compare_keys(&sibling_key, key, self.sort) == Ordering::Less
            })
            .count()
    }

    fn compare_entries(&self, a: &ChildEntry, b: &ChildEntry) -> Ordering {
        compare_keys(&entry_key(a), &entry_key(b), self.sort)
    }

    fn mark_childless(&self, state: &mut TreeState, handle: NodeHandle) -> Result<(), TreeError> {
        let node = state.store.node_mut(handle)?;
        if node.children_hint != ChildrenHint::No {
            node.children_hint = ChildrenHint::No;
            state.display.expandability_changed(handle, false);
        }
        Ok(())
    }
}

/// Sort key of a listed entry.
pub(crate) fn entry_key(entry: &ChildEntry) -> SortKey<'_> {
    SortKey {
        kind: entry.kind,
        display_name: &entry.display_name,
        id: entry.id.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{AbsoluteId, MemoryProvider};
    use crate::ui::{DisplayUpdate, RecordingDisplay};
    use std::sync::Arc;

    fn drive() -> AbsoluteId {
        AbsoluteId::new("C:\\")
    }

    fn setup() -> (Arc<MemoryProvider>, RecordingDisplay, TreeState, NodeHandle) {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_root(&drive());
        for name in ["Windows", "file10", "Program Files", "file2", "Users"] {
            provider.add_folder(&drive().join(name));
        }
        provider.add_virtual_folder(&drive().join("Control Panel"));
        provider.add_hidden_folder(&drive().join("$Recycle.Bin"));
        provider.add_item(&drive().join("pagefile.sys"));

        let display = RecordingDisplay::new();
        let mut state =
            TreeState::new(provider.clone(), Arc::new(display.clone()), &TreeConfig::default())
                .unwrap();
        let root = state.add_root(drive()).unwrap();
        display.take();
        (provider, display, state, root)
    }

    fn child_names(state: &TreeState, handle: NodeHandle) -> Vec<String> {
        state
            .store
            .children(handle)
            .iter()
            .map(|child| state.store.get(*child).unwrap().display_name().to_string())
            .collect()
    }

    #[test]
    fn test_expand_sorts_filters_and_watches() {
        let (provider, display, mut state, root) = setup();
        let expander = Expander::new(&TreeConfig::default());

        expander.expand(&mut state, root).unwrap();

        assert_eq!(
            child_names(&state, root),
            vec!["Control Panel", "file2", "file10", "Program Files", "Users", "Windows"]
        );
        let node = state.store.get(root).unwrap();
        assert!(node.is_expanded());
        assert_eq!(node.children_hint(), ChildrenHint::Yes);
        assert!(node.watch().is_some());
        assert_eq!(provider.active_watches(), 1);

        let inserted = display
            .take()
            .into_iter()
            .filter(|u| matches!(u, DisplayUpdate::NodeInserted { .. }))
            .count();
        assert_eq!(inserted, 6);

        // Expanding again neither lists nor inserts.
        let calls = provider.list_calls();
        expander.expand(&mut state, root).unwrap();
        assert_eq!(provider.list_calls(), calls);
        assert_eq!(state.store.children(root).len(), 6);
    }

    #[test]
    fn test_failed_listing_marks_node_childless() {
        let (provider, display, mut state, root) = setup();
        provider.fail_listing(&drive());
        let expander = Expander::new(&TreeConfig::default());

        expander.expand(&mut state, root).unwrap();

        let node = state.store.get(root).unwrap();
        assert!(!node.is_expanded());
        assert_eq!(node.children_hint(), ChildrenHint::No);
        assert!(node.watch().is_none());
        assert_eq!(
            display.take(),
            vec![DisplayUpdate::ExpandabilityChanged {
                handle: root,
                expandable: false
            }]
        );
    }

    #[test]
    fn test_expand_collapse_expand_round_trip() {
        let (provider, _display, mut state, root) = setup();
        let expander = Expander::new(&TreeConfig::default());

        expander.expand(&mut state, root).unwrap();
        let first = child_names(&state, root);
        let first_handles = state.store.children(root).to_vec();

        let watch = state.store.get(root).unwrap().watch();
        expander.collapse(&mut state, root).unwrap();
        let node = state.store.get(root).unwrap();
        assert!(!node.is_expanded());
        assert_eq!(node.children_hint(), ChildrenHint::Unknown);
        assert_eq!(node.watch(), watch);
        assert_eq!(state.store.len(), 1);
        assert_eq!(provider.active_watches(), 1);

        let (calls, registrations) = (provider.list_calls(), provider.registrations());
        expander.expand(&mut state, root).unwrap();
        assert_eq!(provider.list_calls(), calls + 1);
        assert_eq!(provider.registrations(), registrations);
        assert_eq!(state.store.get(root).unwrap().watch(), watch);
        assert_eq!(child_names(&state, root), first);
        assert!(state
            .store
            .children(root)
            .iter()
            .all(|child| !first_handles.contains(child)));
    }

    #[test]
    fn test_insertion_index_respects_sort_order() {
        let (_provider, _display, mut state, root) = setup();
        let expander = Expander::new(&TreeConfig::default());
        expander.expand(&mut state, root).unwrap();

        let entry = ChildEntry::folder("file3");
        assert_eq!(
            expander.insertion_index(&state.store, root, &entry_key(&entry), None),
            2
        );
        let entry = ChildEntry::folder("Zeta");
        assert_eq!(
            expander.insertion_index(&state.store, root, &entry_key(&entry), None),
            6
        );
    }

    #[test]
    fn test_refresh_picks_up_hidden_entries() {
        let (_provider, _display, mut state, root) = setup();
        let mut expander = Expander::new(&TreeConfig::default());
        expander.expand(&mut state, root).unwrap();

        expander.set_show_hidden(true);
        expander.refresh(&mut state, root).unwrap();
        assert_eq!(child_names(&state, root)[1], "$Recycle.Bin");
        assert_eq!(state.store.children(root).len(), 7);

        expander.set_show_hidden(false);
        expander.refresh(&mut state, root).unwrap();
        assert!(!child_names(&state, root).contains(&"$Recycle.Bin".to_string()));
    }
}

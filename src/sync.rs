//! Application of change batches to the tree.
//!
//! Each [`ChangeEvent`] is applied on its own, in arrival order, against the
//! tree as it is at that moment. Events about parts of the namespace that are
//! not materialized are ignored; those parts are listed fresh when expanded.

use crate::error::TreeError;
use crate::expander::{entry_key, Expander};
use crate::namespace::{AbsoluteId, NamespaceItemId, NamespaceProvider};
use crate::shell_tree::TreeState;
use crate::tree::{ChildrenHint, NodeHandle, SortKey};
use crate::ui::DisplaySink;
use crate::watcher::ChangeEvent;

/// Counters for applied events.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Batches applied.
    pub batches: u64,
    /// Events that changed the tree.
    pub applied: u64,
    /// Events about nodes that are not in the tree.
    pub ignored: u64,
}

/// Applies [`ChangeEvent`]s to a tree.
#[derive(Debug, Default)]
pub struct TreeSynchronizer {
    stats: SyncStats,
}

impl TreeSynchronizer {
    /// Create a synchronizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters so far.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Apply a flushed batch in order.
    pub(crate) fn apply_batch(
        &mut self,
        state: &mut TreeState,
        expander: &Expander,
        batch: Vec<ChangeEvent>,
    ) {
        if batch.is_empty() {
            return;
        }
        tracing::debug!("Applying batch of {} change events", batch.len());
        self.stats.batches += 1;
        for event in batch {
            self.apply(state, expander, event);
        }
    }

    /// Apply one event.
    ///
    /// # Panics
    ///
    /// Panics if the tree turns out to be inconsistent (a handle located a
    /// moment ago is gone), which would mean an internal invariant is broken.
    pub(crate) fn apply(&mut self, state: &mut TreeState, expander: &Expander, event: ChangeEvent) {
        tracing::trace!("Applying {:?}", event);
        let id = event.id().clone();
        let outcome = match event {
            ChangeEvent::Added(id) => self.on_added(state, expander, &id),
            ChangeEvent::Renamed { from, to } => self.on_renamed(state, expander, &from, &to),
            ChangeEvent::Modified(id) | ChangeEvent::DirectoryContentsChanged(id) => {
                self.on_modified(state, &id)
            }
            ChangeEvent::Removed(id) => self.on_removed(state, expander, &id),
        };

        match outcome {
            Ok(true) => self.stats.applied += 1,
            Ok(false) => self.stats.ignored += 1,
            Err(err @ TreeError::StaleHandle(_)) => {
                panic!("tree invariant violated while applying change: {err}")
            }
            Err(err) => {
                tracing::warn!("Failed to apply change to {}: {}", id, err);
                self.stats.ignored += 1;
            }
        }
    }

    fn on_added(
        &mut self,
        state: &mut TreeState,
        expander: &Expander,
        id: &AbsoluteId,
    ) -> Result<bool, TreeError> {
        let (Some(parent_id), Some(name)) = (id.parent(), id.last_component()) else {
            return Ok(false);
        };
        let Some(parent) = state.locate(&parent_id) else {
            return Ok(false);
        };
        if state
            .store
            .find_child(state.provider.as_ref(), parent, name.as_str())
            .is_some()
        {
            return Ok(false);
        }

        let parent_node = state.store.node_mut(parent)?;
        if !parent_node.expanded {
            if parent_node.children_hint == ChildrenHint::No {
                parent_node.children_hint = ChildrenHint::Yes;
                state.display.expandability_changed(parent, true);
                return Ok(true);
            }
            return Ok(false);
        }

        let entry = match state.provider.describe_item(id) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Ignoring addition of {}: {}", id, e);
                return Ok(false);
            }
        };
        if !expander.accepts(&entry) {
            return Ok(false);
        }

        let index = expander.insertion_index(&state.store, parent, &entry_key(&entry), None);
        let child = state.store.add_child(parent, &entry, index)?;
        state.display.node_inserted(Some(parent), index, child);

        let parent_node = state.store.node_mut(parent)?;
        let previous = parent_node.children_hint;
        parent_node.children_hint = ChildrenHint::Yes;
        if previous == ChildrenHint::No {
            state.display.expandability_changed(parent, true);
        }
        Ok(true)
    }

    fn on_renamed(
        &mut self,
        state: &mut TreeState,
        expander: &Expander,
        from: &AbsoluteId,
        to: &AbsoluteId,
    ) -> Result<bool, TreeError> {
        let Some(handle) = state.locate(from) else {
            return Ok(false);
        };

        if !same_parent(state.provider.as_ref(), from, to) {
            tracing::debug!("Treating rename of {} to {} as a move", from, to);
            let removed = self.on_removed(state, expander, from)?;
            let added = self.on_added(state, expander, to)?;
            return Ok(removed || added);
        }

        let parent = state.store.get(handle).and_then(|node| node.parent());
        let new_id = match (parent, to.last_component()) {
            (Some(_), Some(name)) => NamespaceItemId::Relative(name.clone()),
            _ => NamespaceItemId::Absolute(to.clone()),
        };
        let display_name = state.provider.resolve_display_name(to).unwrap_or_else(|e| {
            tracing::debug!("Using raw name for {}: {}", to, e);
            to.last_component()
                .map(|name| name.to_string())
                .unwrap_or_else(|| to.to_string())
        });
        state.store.rename(handle, new_id, display_name)?;

        let watch = state.store.node_mut(handle)?.watch.take();
        if let Some(watch) = watch {
            state.watcher.stop_watching(watch);
            expander.ensure_watch(state, handle)?;
        }

        if let Some(parent) = parent {
            let node = state.store.get(handle).ok_or(TreeError::StaleHandle(handle))?;
            let key = SortKey {
                kind: node.kind(),
                display_name: node.display_name(),
                id: node.match_token(),
            };
            let index = expander.insertion_index(&state.store, parent, &key, Some(handle));
            if state.store.index_in_parent(handle) != Some(index) {
                state.store.reposition(handle, index)?;
            }
        }

        state.display.node_renamed(handle);
        Ok(true)
    }

    fn on_modified(&mut self, state: &mut TreeState, id: &AbsoluteId) -> Result<bool, TreeError> {
        let Some(handle) = state.locate(id) else {
            return Ok(false);
        };

        if state.decorations.invalidate(&mut state.store, handle, id) {
            state.display.decoration_changed(handle);
        }

        let node = state.store.node_mut(handle)?;
        let previous = node.children_hint;
        node.children_hint = ChildrenHint::Unknown;
        if previous == ChildrenHint::No {
            state.display.expandability_changed(handle, true);
        }
        Ok(true)
    }

    fn on_removed(
        &mut self,
        state: &mut TreeState,
        expander: &Expander,
        id: &AbsoluteId,
    ) -> Result<bool, TreeError> {
        let Some(handle) = state.locate(id) else {
            return Ok(false);
        };
        let parent = state.store.get(handle).and_then(|node| node.parent());

        state.remove_subtree(handle);

        if let Some(parent) = parent {
            if state.store.children(parent).is_empty() {
                collapse_to_childless(state, expander, parent)?;
            }
        }
        Ok(true)
    }
}

fn collapse_to_childless(
    state: &mut TreeState,
    expander: &Expander,
    handle: NodeHandle,
) -> Result<(), TreeError> {
    expander.collapse(state, handle)?;
    state.store.node_mut(handle)?.children_hint = ChildrenHint::No;
    state.display.expandability_changed(handle, false);
    Ok(())
}

fn same_parent(provider: &dyn NamespaceProvider, a: &AbsoluteId, b: &AbsoluteId) -> bool {
    match (a.parent(), b.parent()) {
        (Some(a), Some(b)) => {
            a.components().len() == b.components().len()
                && a.strip_prefix(&b, |x, y| provider.same_component(x, y)).is_some()
        }
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::namespace::MemoryProvider;
    use crate::ui::{DisplayUpdate, RecordingDisplay};
    use std::sync::Arc;

    fn drive() -> AbsoluteId {
        AbsoluteId::new("C:\\")
    }

    struct Fixture {
        provider: Arc<MemoryProvider>,
        display: RecordingDisplay,
        state: TreeState,
        expander: Expander,
        sync: TreeSynchronizer,
        root: NodeHandle,
    }

    impl Fixture {
        fn new() -> Self {
            let provider = Arc::new(MemoryProvider::new());
            provider.add_root(&drive());
            for name in ["Program Files", "Users", "Windows"] {
                provider.add_folder(&drive().join(name));
            }
            let display = RecordingDisplay::new();
            let config = TreeConfig::default();
            let mut state =
                TreeState::new(provider.clone(), Arc::new(display.clone()), &config).unwrap();
            let root = state.add_root(drive()).unwrap();
            let expander = Expander::new(&config);
            expander.expand(&mut state, root).unwrap();
            display.take();
            Self {
                provider,
                display,
                state,
                expander,
                sync: TreeSynchronizer::new(),
                root,
            }
        }

        fn apply(&mut self, event: ChangeEvent) {
            self.sync.apply(&mut self.state, &self.expander, event);
        }

        fn handle(&self, id: &AbsoluteId) -> NodeHandle {
            self.state.locate(id).unwrap()
        }

        fn names(&self, handle: NodeHandle) -> Vec<String> {
            self.state
                .store
                .children(handle)
                .iter()
                .map(|c| self.state.store.get(*c).unwrap().display_name().to_string())
                .collect()
        }
    }

    #[test]
    fn test_added_inserts_at_sorted_position_once() {
        let mut f = Fixture::new();
        f.provider.add_folder(&drive().join("Temp"));

        f.apply(ChangeEvent::Added(drive().join("Temp")));
        f.apply(ChangeEvent::Added(drive().join("Temp")));

        assert_eq!(f.names(f.root), vec!["Program Files", "Temp", "Users", "Windows"]);
        let temp = f.handle(&drive().join("Temp"));
        assert_eq!(
            f.display.take(),
            vec![DisplayUpdate::NodeInserted {
                parent: Some(f.root),
                index: 1,
                handle: temp
            }]
        );
        assert_eq!(f.sync.stats().ignored, 1);
    }

    #[test]
    fn test_added_under_collapsed_parent_only_corrects_hint() {
        let mut f = Fixture::new();
        let users = f.handle(&drive().join("Users"));
        f.state.store.node_mut(users).unwrap().children_hint = ChildrenHint::No;
        f.provider.add_folder(&drive().join("Users").join("Public"));

        f.apply(ChangeEvent::Added(drive().join("Users").join("Public")));

        assert!(f.state.store.children(users).is_empty());
        assert_eq!(f.state.store.get(users).unwrap().children_hint(), ChildrenHint::Yes);
        assert_eq!(
            f.display.take(),
            vec![DisplayUpdate::ExpandabilityChanged {
                handle: users,
                expandable: true
            }]
        );

        // Unmaterialized parents are ignored entirely.
        f.apply(ChangeEvent::Added(drive().join("Nowhere").join("x")));
        assert!(f.display.updates().is_empty());
    }

    #[test]
    fn test_added_item_is_filtered_out() {
        let mut f = Fixture::new();
        f.provider.add_item(&drive().join("notes.txt"));
        f.apply(ChangeEvent::Added(drive().join("notes.txt")));
        assert_eq!(f.state.store.children(f.root).len(), 3);
    }

    #[test]
    fn test_rename_resorts_without_touching_descendants() {
        let mut f = Fixture::new();
        f.provider.add_folder(&drive().join("Users").join("Public"));
        let users = f.handle(&drive().join("Users"));
        f.expander.expand(&mut f.state, users).unwrap();
        let public = f.handle(&drive().join("Users").join("Public"));
        f.display.take();

        f.provider.rename(&drive().join("Users"), &drive().join("Aardvark"));
        f.apply(ChangeEvent::Renamed {
            from: drive().join("Users"),
            to: drive().join("Aardvark"),
        });

        assert_eq!(f.names(f.root), vec!["Aardvark", "Program Files", "Windows"]);
        assert_eq!(
            f.state.store.resolve(public).unwrap(),
            drive().join("Aardvark").join("Public")
        );
        assert_eq!(f.display.take(), vec![DisplayUpdate::NodeRenamed(users)]);

        // The watch now follows the new name.
        assert!(f
            .provider
            .watched_subtrees()
            .contains(&drive().join("Aardvark")));
        assert!(!f.provider.watched_subtrees().contains(&drive().join("Users")));
    }

    #[test]
    fn test_rename_to_other_parent_is_a_move() {
        let mut f = Fixture::new();
        let windows = f.handle(&drive().join("Windows"));
        f.expander.expand(&mut f.state, windows).unwrap();
        let users = f.handle(&drive().join("Users"));

        f.provider
            .rename(&drive().join("Users"), &drive().join("Windows").join("Users"));
        f.apply(ChangeEvent::Renamed {
            from: drive().join("Users"),
            to: drive().join("Windows").join("Users"),
        });

        assert!(!f.state.store.contains(users));
        assert_eq!(f.names(windows), vec!["Users"]);
    }

    #[test]
    fn test_modified_invalidates_decoration_and_hint() {
        let mut f = Fixture::new();
        let users = f.handle(&drive().join("Users"));
        {
            let node = f.state.store.node_mut(users).unwrap();
            node.decoration = Some(crate::tree::Decoration {
                icon: crate::namespace::IconToken(9),
            });
            node.children_hint = ChildrenHint::No;
        }

        f.apply(ChangeEvent::DirectoryContentsChanged(drive().join("Users")));

        let node = f.state.store.get(users).unwrap();
        assert!(node.decoration().is_none());
        assert_eq!(node.children_hint(), ChildrenHint::Unknown);
        assert_eq!(
            f.display.take(),
            vec![
                DisplayUpdate::DecorationChanged(users),
                DisplayUpdate::ExpandabilityChanged {
                    handle: users,
                    expandable: true
                },
            ]
        );
    }

    #[test]
    fn test_removing_last_child_collapses_parent() {
        let mut f = Fixture::new();
        f.provider.add_folder(&drive().join("Users").join("Public"));
        let users = f.handle(&drive().join("Users"));
        f.expander.expand(&mut f.state, users).unwrap();
        let public = f.handle(&drive().join("Users").join("Public"));
        let before = f.provider.deregistrations();

        f.provider.remove(&drive().join("Users").join("Public"));
        f.apply(ChangeEvent::Removed(drive().join("Users").join("Public")));

        assert!(!f.state.store.contains(public));
        let node = f.state.store.get(users).unwrap();
        assert!(!node.is_expanded());
        assert_eq!(node.children_hint(), ChildrenHint::No);
        assert!(node.watch().is_some());
        assert_eq!(f.provider.deregistrations(), before);
        assert_eq!(
            f.display.take().last(),
            Some(&DisplayUpdate::ExpandabilityChanged {
                handle: users,
                expandable: false
            })
        );
    }

    #[test]
    fn test_removed_unknown_node_is_ignored() {
        let mut f = Fixture::new();
        f.apply(ChangeEvent::Removed(drive().join("Ghost")));
        assert_eq!(f.state.store.children(f.root).len(), 3);
        assert_eq!(f.sync.stats().ignored, 1);
    }
}

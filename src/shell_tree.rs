//! The owning-thread facade over the whole synchronizer.
//!
//! `ShellTree` owns the node store, the change watcher and the decoration
//! resolver, and is the only thing that mutates them. The display layer
//! drives it through the `request_*` and `on_node_displayed` entry points;
//! whoever owns it calls [`ShellTree::pump`] regularly to apply worker
//! results and flushed change batches.

use crate::config::TreeConfig;
use crate::decoration::DecorationResolver;
use crate::error::TreeError;
use crate::expander::Expander;
use crate::namespace::{AbsoluteId, NamespaceProvider};
use crate::sync::{SyncStats, TreeSynchronizer};
use crate::tree::{ChildrenHint, NodeHandle, SortPolicy, TreeStore};
use crate::ui::{DisplaySink, NullDisplay};
use crate::watcher::ChangeWatcher;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the expander and the synchronizer mutate.
pub(crate) struct TreeState {
    pub(crate) provider: Arc<dyn NamespaceProvider>,
    pub(crate) store: TreeStore,
    pub(crate) watcher: ChangeWatcher,
    pub(crate) decorations: DecorationResolver,
    pub(crate) display: Arc<dyn DisplaySink>,
}

impl TreeState {
    pub(crate) fn new(
        provider: Arc<dyn NamespaceProvider>,
        display: Arc<dyn DisplaySink>,
        config: &TreeConfig,
    ) -> Result<Self, TreeError> {
        Ok(Self {
            store: TreeStore::new(),
            watcher: ChangeWatcher::new(Arc::clone(&provider), config.debounce),
            decorations: DecorationResolver::new(Arc::clone(&provider), config.icon_cache_capacity)?,
            provider,
            display,
        })
    }

    pub(crate) fn add_root(&mut self, id: AbsoluteId) -> Result<NodeHandle, TreeError> {
        let handle = self.store.add_root(self.provider.as_ref(), id)?;
        let index = self.store.roots().len() - 1;
        self.display.node_inserted(None, index, handle);
        Ok(handle)
    }

    /// Find a materialized node by identifier.
    pub(crate) fn locate(&self, id: &AbsoluteId) -> Option<NodeHandle> {
        self.store
            .find_by_identifier(self.provider.as_ref(), None, id)
    }

    /// Remove `handle` with its subtree, stopping every watch it held and
    /// dropping pending decoration requests. Returns false if it was not in
    /// the tree.
    pub(crate) fn remove_subtree(&mut self, handle: NodeHandle) -> bool {
        let removed = self.store.remove(handle);
        if removed.is_empty() {
            return false;
        }

        for node in &removed {
            if let Some(watch) = node.watch {
                self.watcher.stop_watching(watch);
            }
        }
        self.decorations
            .forget(removed.iter().map(|node| node.handle));
        self.display.node_removed(handle);
        true
    }
}

impl Drop for TreeState {
    fn drop(&mut self) {
        for root in self.store.roots().to_vec() {
            self.remove_subtree(root);
        }
    }
}

/// A namespace mirror kept in sync with its provider.
pub struct ShellTree {
    state: TreeState,
    expander: Expander,
    synchronizer: TreeSynchronizer,
    config: TreeConfig,
}

impl ShellTree {
    /// Create a tree over `provider`, reporting to `display`.
    pub fn new(
        provider: Arc<dyn NamespaceProvider>,
        display: Arc<dyn DisplaySink>,
        config: TreeConfig,
    ) -> Result<Self, TreeError> {
        Ok(Self {
            state: TreeState::new(provider, display, &config)?,
            expander: Expander::new(&config),
            synchronizer: TreeSynchronizer::new(),
            config,
        })
    }

    /// Add a root for `id`. Fails if the provider cannot resolve it.
    pub fn add_root(&mut self, id: AbsoluteId) -> Result<NodeHandle, TreeError> {
        let handle = self.state.add_root(id)?;
        tracing::debug!("Added root {}", handle);
        Ok(handle)
    }

    /// List `handle`'s children and start watching it.
    pub fn request_expand(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        self.expander.expand(&mut self.state, handle)
    }

    /// Drop `handle`'s children and stop watching it.
    pub fn request_collapse(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        self.expander.collapse(&mut self.state, handle)
    }

    /// The display is showing `handle`: resolve its icon and, if it has not
    /// been expanded, check whether it has subfolders.
    pub fn on_node_displayed(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        let node = self
            .state
            .store
            .get(handle)
            .ok_or(TreeError::StaleHandle(handle))?;
        let needs_icon = node.decoration().is_none();
        let needs_check = !node.is_expanded() && node.children_hint() == ChildrenHint::Unknown;

        let TreeState {
            store,
            decorations,
            display,
            ..
        } = &mut self.state;
        if needs_icon {
            decorations.request_icon(store, &**display, handle)?;
        }
        if needs_check {
            decorations.request_subfolder_check(store, handle)?;
        }
        Ok(())
    }

    /// Find the node for `id`.
    ///
    /// With `expand` set, collapsed ancestors on the way are expanded;
    /// otherwise only already materialized nodes are found.
    pub fn locate_item(
        &mut self,
        id: &AbsoluteId,
        expand: bool,
    ) -> Result<Option<NodeHandle>, TreeError> {
        if !expand {
            return Ok(self.state.locate(id));
        }

        let provider = Arc::clone(&self.state.provider);
        let same = |a: &str, b: &str| provider.same_component(a, b);
        let start = self.state.store.roots().iter().find_map(|root| {
            let root_id = self.state.store.resolve(*root).ok()?;
            let rest = id.strip_prefix(&root_id, same)?.to_vec();
            Some((*root, rest))
        });
        let Some((mut current, rest)) = start else {
            return Ok(None);
        };

        for component in rest {
            let child = match self
                .state
                .store
                .find_child(provider.as_ref(), current, component.as_str())
            {
                Some(child) => Some(child),
                None => {
                    self.expander.expand(&mut self.state, current)?;
                    self.state
                        .store
                        .find_child(provider.as_ref(), current, component.as_str())
                }
            };
            match child {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Show or hide hidden entries, re-listing every expanded node.
    pub fn set_show_hidden(&mut self, show: bool) -> Result<(), TreeError> {
        if self.expander.filter().include_hidden == show {
            return Ok(());
        }
        self.expander.set_show_hidden(show);
        self.config.show_hidden = show;

        let mut queue: VecDeque<NodeHandle> = self.state.store.roots().iter().copied().collect();
        while let Some(handle) = queue.pop_front() {
            let expanded = self
                .state
                .store
                .get(handle)
                .is_some_and(|node| node.is_expanded());
            if !expanded {
                continue;
            }
            self.expander.refresh(&mut self.state, handle)?;
            queue.extend(self.state.store.children(handle).iter().copied());
        }
        Ok(())
    }

    /// Forget every cached icon and resolve all icons again.
    pub fn refresh_all_icons(&mut self) -> Result<(), TreeError> {
        let TreeState {
            store,
            decorations,
            display,
            ..
        } = &mut self.state;

        decorations.clear_cache();
        let handles: Vec<NodeHandle> = store.handles().collect();
        for handle in handles {
            decorations.request_icon(store, &**display, handle)?;
        }
        Ok(())
    }

    /// The name shown for `handle`.
    pub fn display_name(&self, handle: NodeHandle) -> Option<&str> {
        self.state.store.get(handle).map(|node| node.display_name())
    }

    /// The full identifier of `handle`.
    pub fn resolve(&self, handle: NodeHandle) -> Result<AbsoluteId, TreeError> {
        self.state.store.resolve(handle)
    }

    /// Read access to the nodes.
    pub fn store(&self) -> &TreeStore {
        &self.state.store
    }

    /// The active configuration.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Counters of applied change events.
    pub fn sync_stats(&self) -> &SyncStats {
        self.synchronizer.stats()
    }

    /// Number of active change watches.
    pub fn active_watches(&self) -> usize {
        self.state.watcher.active_count()
    }

    /// Number of decoration requests still waiting for a result.
    pub fn pending_decorations(&self) -> usize {
        self.state.decorations.in_flight_count()
    }

    /// Run one step of the owning-thread loop.
    pub fn pump(&mut self) -> usize {
        self.pump_at(Instant::now())
    }

    /// Run one step as if the time were `now`: apply worker results, take
    /// queued notifications and apply the batch if it is due.
    ///
    /// Returns the number of results, notifications and events handled.
    pub fn pump_at(&mut self, now: Instant) -> usize {
        let mut handled = 0;

        let TreeState {
            store,
            decorations,
            display,
            ..
        } = &mut self.state;
        for result in decorations.drain_results() {
            decorations.on_result(store, &**display, result);
            handled += 1;
        }

        handled += self.state.watcher.poll_notifications(now);
        let batch = self.state.watcher.flush_if_ready_at(now);
        handled += batch.len();
        self.synchronizer
            .apply_batch(&mut self.state, &self.expander, batch);

        handled
    }

    /// Whether no worker result or change notification is outstanding.
    pub fn is_idle(&self) -> bool {
        self.state.decorations.in_flight_count() == 0 && self.state.watcher.is_quiet()
    }

    /// Pump until idle or until `timeout` elapses. Returns whether the tree
    /// became idle.
    pub fn wait_for_idle(&mut self, timeout: Duration) -> bool {
        let give_up = Instant::now() + timeout;
        loop {
            self.pump();
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= give_up {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Tear the tree down, stopping every watch and joining the workers.
    pub fn shutdown(self) {
        tracing::debug!("Shutting down: {}", self.state.store.debug_summary());
    }
}

/// Builder for [`ShellTree`] with sensible defaults.
pub struct ShellTreeBuilder {
    provider: Arc<dyn NamespaceProvider>,
    display: Option<Arc<dyn DisplaySink>>,
    config: TreeConfig,
}

impl ShellTreeBuilder {
    /// Start building a tree over `provider`.
    pub fn new(provider: Arc<dyn NamespaceProvider>) -> Self {
        Self {
            provider,
            display: None,
            config: TreeConfig::default(),
        }
    }

    /// Where display updates go. Defaults to nowhere.
    pub fn display(mut self, display: Arc<dyn DisplaySink>) -> Self {
        self.display = Some(display);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    /// Quiet period before a change batch is applied.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.config.debounce = debounce;
        self
    }

    /// List hidden entries.
    pub fn show_hidden(mut self, show: bool) -> Self {
        self.config.show_hidden = show;
        self
    }

    /// List containers only.
    pub fn folders_only(mut self, folders_only: bool) -> Self {
        self.config.folders_only = folders_only;
        self
    }

    /// Sibling comparison.
    pub fn sort(mut self, sort: SortPolicy) -> Self {
        self.config.sort = sort;
        self
    }

    /// Size of the icon cache.
    pub fn icon_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.icon_cache_capacity = capacity;
        self
    }

    /// Watch whole subtrees instead of single levels.
    pub fn recursive_watches(mut self, recursive: bool) -> Self {
        self.config.recursive_watches = recursive;
        self
    }

    /// Build the tree and start its workers.
    pub fn build(self) -> Result<ShellTree, TreeError> {
        let display = self.display.unwrap_or_else(|| Arc::new(NullDisplay));
        ShellTree::new(self.provider, display, self.config)
    }
}

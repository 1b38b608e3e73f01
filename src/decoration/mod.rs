//! Background resolution of node decorations.
//!
//! Icons and "has subfolder" checks can block on slow providers, so they run
//! on two single-worker pools. A worker only ever sees the identifier
//! snapshot taken when the request was made; its result comes back on a
//! channel tagged with a [`RequestId`] and is applied on the owning thread,
//! after checking that the request is still wanted and the node still exists.

pub mod cache;
pub mod pool;

pub use cache::IconCache;
pub use pool::WorkerPool;

use crate::error::TreeError;
use crate::namespace::{AbsoluteId, IconToken, NamespaceProvider};
use crate::tree::{ChildrenHint, Decoration, NodeHandle, TreeStore};
use crate::ui::DisplaySink;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Correlates a worker result with the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// A result posted by one of the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecorationResult {
    /// Icon lookup finished. `icon` is `None` if the provider failed.
    Icon {
        /// The originating request.
        request: RequestId,
        /// The identifier snapshot the icon was resolved for.
        id: AbsoluteId,
        /// The resolved icon.
        icon: Option<IconToken>,
    },
    /// Subfolder check finished. `has_subfolder` is `None` if the provider failed.
    Subfolder {
        /// The originating request.
        request: RequestId,
        /// Probe outcome.
        has_subfolder: Option<bool>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Icon,
    Subfolder,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    handle: NodeHandle,
    kind: RequestKind,
}

/// Owner of the two decoration pools and the icon cache.
pub struct DecorationResolver {
    provider: Arc<dyn NamespaceProvider>,
    icon_pool: WorkerPool,
    subfolder_pool: WorkerPool,
    results_tx: Sender<DecorationResult>,
    results_rx: Receiver<DecorationResult>,
    in_flight: HashMap<RequestId, InFlight>,
    next_request: u64,
    cache: IconCache,
}

impl DecorationResolver {
    /// Spawn both workers.
    pub fn new(
        provider: Arc<dyn NamespaceProvider>,
        icon_cache_capacity: usize,
    ) -> Result<Self, TreeError> {
        let spawn = |name: &str| {
            WorkerPool::new(name).map_err(|source| TreeError::WorkerSpawn {
                name: name.to_string(),
                source,
            })
        };
        let (results_tx, results_rx) = unbounded();

        Ok(Self {
            provider,
            icon_pool: spawn("icon-resolver")?,
            subfolder_pool: spawn("subfolder-check")?,
            results_tx,
            results_rx,
            in_flight: HashMap::new(),
            next_request: 0,
            cache: IconCache::new(icon_cache_capacity),
        })
    }

    /// Resolve the icon of `handle`.
    ///
    /// A cache hit is applied immediately; otherwise the lookup is queued on
    /// the icon worker. Does nothing if an icon request for `handle` is
    /// already in flight.
    pub fn request_icon(
        &mut self,
        store: &mut TreeStore,
        display: &dyn DisplaySink,
        handle: NodeHandle,
    ) -> Result<(), TreeError> {
        let id = store.resolve(handle)?;

        if let Some(icon) = self.cache.get(&id) {
            Self::apply_icon(store, display, handle, icon);
            return Ok(());
        }
        if self.is_pending(handle, RequestKind::Icon) {
            return Ok(());
        }

        let request = self.track(handle, RequestKind::Icon);
        let provider = Arc::clone(&self.provider);
        let results = self.results_tx.clone();

        let queued = self.icon_pool.submit(move || {
            let icon = match provider.resolve_icon(&id) {
                Ok(icon) => Some(icon),
                Err(e) => {
                    tracing::debug!("Icon lookup failed: {}", e);
                    None
                }
            };
            let _ = results.send(DecorationResult::Icon { request, id, icon });
        });
        if !queued {
            self.in_flight.remove(&request);
        }
        Ok(())
    }

    /// Probe whether `handle` has any sub-container.
    pub fn request_subfolder_check(
        &mut self,
        store: &TreeStore,
        handle: NodeHandle,
    ) -> Result<(), TreeError> {
        let id = store.resolve(handle)?;
        if self.is_pending(handle, RequestKind::Subfolder) {
            return Ok(());
        }

        let request = self.track(handle, RequestKind::Subfolder);
        let provider = Arc::clone(&self.provider);
        let results = self.results_tx.clone();

        let queued = self.subfolder_pool.submit(move || {
            let has_subfolder = match provider.has_subfolder(&id) {
                Ok(found) => Some(found),
                Err(e) => {
                    tracing::debug!("Subfolder check failed: {}", e);
                    None
                }
            };
            let _ = results.send(DecorationResult::Subfolder {
                request,
                has_subfolder,
            });
        });
        if !queued {
            self.in_flight.remove(&request);
        }
        Ok(())
    }

    /// Results posted by the workers since the last call.
    pub fn drain_results(&self) -> Vec<DecorationResult> {
        self.results_rx.try_iter().collect()
    }

    /// Apply one worker result.
    pub fn on_result(
        &mut self,
        store: &mut TreeStore,
        display: &dyn DisplaySink,
        result: DecorationResult,
    ) {
        match result {
            DecorationResult::Icon { request, id, icon } => {
                self.on_icon_result(store, display, request, id, icon)
            }
            DecorationResult::Subfolder {
                request,
                has_subfolder,
            } => self.on_subfolder_result(store, display, request, has_subfolder),
        }
    }

    /// Apply an icon result.
    ///
    /// Unknown requests are ignored. The cache is updated even if the node
    /// has gone away in the meantime.
    pub fn on_icon_result(
        &mut self,
        store: &mut TreeStore,
        display: &dyn DisplaySink,
        request: RequestId,
        id: AbsoluteId,
        icon: Option<IconToken>,
    ) {
        let Some(in_flight) = self.in_flight.remove(&request) else {
            tracing::trace!("Discarding result for {}", request);
            return;
        };
        let Some(icon) = icon else {
            return;
        };

        self.cache.put(id, icon);
        if store.contains(in_flight.handle) {
            Self::apply_icon(store, display, in_flight.handle, icon);
        }
    }

    /// Apply a subfolder check result.
    ///
    /// The result can only narrow the hint to [`ChildrenHint::No`], and never
    /// on a node that already has children.
    pub fn on_subfolder_result(
        &mut self,
        store: &mut TreeStore,
        display: &dyn DisplaySink,
        request: RequestId,
        has_subfolder: Option<bool>,
    ) {
        let Some(in_flight) = self.in_flight.remove(&request) else {
            tracing::trace!("Discarding result for {}", request);
            return;
        };
        if has_subfolder != Some(false) {
            return;
        }

        let Some(node) = store.get_mut(in_flight.handle) else {
            return;
        };
        if node.children.is_empty() && node.children_hint != ChildrenHint::No {
            node.children_hint = ChildrenHint::No;
            display.expandability_changed(in_flight.handle, false);
        }
    }

    /// Drop pending requests for nodes that have been removed.
    pub fn forget(&mut self, handles: impl IntoIterator<Item = NodeHandle>) {
        let handles: HashSet<NodeHandle> = handles.into_iter().collect();
        self.in_flight
            .retain(|_, in_flight| !handles.contains(&in_flight.handle));
    }

    /// Clear the decoration of `handle` and the cached icon for `id`.
    ///
    /// Requests for `handle` still in flight describe the item as it was, so
    /// their results are dropped too. Returns whether the node had a decoration.
    pub fn invalidate(&mut self, store: &mut TreeStore, handle: NodeHandle, id: &AbsoluteId) -> bool {
        self.cache.remove(id);
        self.in_flight
            .retain(|_, in_flight| in_flight.handle != handle);
        store
            .get_mut(handle)
            .and_then(|node| node.decoration.take())
            .is_some()
    }

    /// Empty the icon cache.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of cached icons.
    pub fn cached_icons(&self) -> usize {
        self.cache.len()
    }

    /// Number of requests whose results have not been applied yet.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn track(&mut self, handle: NodeHandle, kind: RequestKind) -> RequestId {
        self.next_request += 1;
        let request = RequestId(self.next_request);
        self.in_flight.insert(request, InFlight { handle, kind });
        request
    }

    fn is_pending(&self, handle: NodeHandle, kind: RequestKind) -> bool {
        self.in_flight
            .values()
            .any(|in_flight| in_flight.handle == handle && in_flight.kind == kind)
    }

    fn apply_icon(
        store: &mut TreeStore,
        display: &dyn DisplaySink,
        handle: NodeHandle,
        icon: IconToken,
    ) {
        let Some(node) = store.get_mut(handle) else {
            return;
        };
        let decoration = Some(Decoration { icon });
        if node.decoration != decoration {
            node.decoration = decoration;
            display.decoration_changed(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{ChildEntry, MemoryProvider};
    use crate::ui::{DisplayUpdate, RecordingDisplay};
    use std::time::Duration;

    fn drive() -> AbsoluteId {
        AbsoluteId::new("C:\\")
    }

    struct Fixture {
        provider: Arc<MemoryProvider>,
        resolver: DecorationResolver,
        store: TreeStore,
        display: RecordingDisplay,
        root: NodeHandle,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_root(&drive());
        provider.add_folder(&drive().join("Users"));
        provider.add_folder(&drive().join("Empty"));
        let resolver = DecorationResolver::new(provider.clone(), 16).unwrap();
        let mut store = TreeStore::new();
        let root = store.add_root(&*provider, drive()).unwrap();
        Fixture {
            provider,
            resolver,
            store,
            display: RecordingDisplay::new(),
            root,
        }
    }

    fn wait_for_result(resolver: &DecorationResolver) -> DecorationResult {
        for _ in 0..200 {
            if let Some(result) = resolver.drain_results().into_iter().next() {
                return result;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("worker never answered");
    }

    #[test]
    fn test_icon_result_applies_and_fills_cache() {
        let mut f = fixture();
        f.provider.set_icon(&drive(), IconToken(8));

        f.resolver
            .request_icon(&mut f.store, &f.display, f.root)
            .unwrap();
        assert_eq!(f.resolver.in_flight_count(), 1);

        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);

        assert_eq!(
            f.store.get(f.root).unwrap().decoration(),
            Some(Decoration { icon: IconToken(8) })
        );
        assert_eq!(f.display.take(), vec![DisplayUpdate::DecorationChanged(f.root)]);
        assert_eq!(f.resolver.cached_icons(), 1);

        // Second node with the same identifier hits the cache.
        let mut other = TreeStore::new();
        let again = other.add_root(&*f.provider, drive()).unwrap();
        f.resolver.request_icon(&mut other, &f.display, again).unwrap();
        assert_eq!(f.resolver.in_flight_count(), 0);
        assert_eq!(
            other.get(again).unwrap().decoration(),
            Some(Decoration { icon: IconToken(8) })
        );
    }

    #[test]
    fn test_result_for_removed_node_is_discarded() {
        let mut f = fixture();
        let users = f
            .store
            .add_child(f.root, &ChildEntry::folder("Users"), 0)
            .unwrap();

        f.resolver
            .request_icon(&mut f.store, &f.display, users)
            .unwrap();
        let removed = f.store.remove(users);
        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);

        assert_eq!(removed.len(), 1);
        assert!(!f.store.contains(users));
        assert_eq!(f.store.len(), 1);
        assert!(f.store.get(f.root).unwrap().decoration().is_none());
        assert!(f.display.updates().is_empty());
    }

    #[test]
    fn test_forgotten_request_is_ignored() {
        let mut f = fixture();
        f.resolver
            .request_subfolder_check(&f.store, f.root)
            .unwrap();
        f.resolver.forget([f.root]);
        assert_eq!(f.resolver.in_flight_count(), 0);

        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);
        assert!(f.display.updates().is_empty());
    }

    #[test]
    fn test_invalidate_drops_result_of_earlier_request() {
        let mut f = fixture();
        f.provider.set_icon(&drive(), IconToken(8));
        f.resolver
            .request_icon(&mut f.store, &f.display, f.root)
            .unwrap();

        f.provider.set_icon(&drive(), IconToken(9));
        assert!(!f.resolver.invalidate(&mut f.store, f.root, &drive()));
        assert_eq!(f.resolver.in_flight_count(), 0);

        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);
        assert!(f.store.get(f.root).unwrap().decoration().is_none());
        assert_eq!(f.resolver.cached_icons(), 0);
        assert!(f.display.updates().is_empty());

        // A fresh request picks up the new icon.
        f.resolver
            .request_icon(&mut f.store, &f.display, f.root)
            .unwrap();
        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);
        assert_eq!(
            f.store.get(f.root).unwrap().decoration(),
            Some(Decoration { icon: IconToken(9) })
        );
    }

    #[test]
    fn test_subfolder_check_only_narrows_to_no() {
        let mut f = fixture();
        let empty = f
            .store
            .add_child(f.root, &ChildEntry::folder("Empty"), 0)
            .unwrap();

        f.resolver.request_subfolder_check(&f.store, empty).unwrap();
        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);
        assert_eq!(f.store.get(empty).unwrap().children_hint(), ChildrenHint::No);
        assert_eq!(
            f.display.take(),
            vec![DisplayUpdate::ExpandabilityChanged {
                handle: empty,
                expandable: false
            }]
        );

        f.resolver.request_subfolder_check(&f.store, f.root).unwrap();
        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);
        assert_eq!(
            f.store.get(f.root).unwrap().children_hint(),
            ChildrenHint::Unknown
        );
        assert!(f.display.updates().is_empty());
    }

    #[test]
    fn test_provider_failure_keeps_default_icon() {
        let mut f = fixture();
        f.provider.fail_icon(&drive());

        f.resolver
            .request_icon(&mut f.store, &f.display, f.root)
            .unwrap();
        let result = wait_for_result(&f.resolver);
        f.resolver.on_result(&mut f.store, &f.display, result);

        assert!(f.store.get(f.root).unwrap().decoration().is_none());
        assert_eq!(f.resolver.cached_icons(), 0);
        assert_eq!(f.resolver.in_flight_count(), 0);
    }
}

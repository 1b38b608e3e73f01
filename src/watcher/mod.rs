//! Change watching with debounced batch delivery.
//!
//! `ChangeWatcher` registers watches with the namespace provider and collects
//! the raw notifications they produce. Every arrival re-arms the debounce
//! deadline, so a burst of notifications for one logical operation is
//! delivered as a single batch once the namespace goes quiet.

pub mod events;

pub use events::{ChangeEvent, UnrecognizedEvent};

use crate::namespace::{
    AbsoluteId, NamespaceProvider, NotificationSink, RawNotification, RegistrationId,
    WatchFilter, WatchHandle,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ActiveWatch {
    registration: RegistrationId,
    subtree: AbsoluteId,
}

/// Watch registry plus the debounced notification buffer.
pub struct ChangeWatcher {
    provider: Arc<dyn NamespaceProvider>,
    raw_tx: Sender<RawNotification>,
    raw_rx: Receiver<RawNotification>,
    active: HashMap<WatchHandle, ActiveWatch>,
    next_watch: u64,
    pending: Vec<RawNotification>,
    deadline: Option<Instant>,
    debounce: Duration,
}

impl ChangeWatcher {
    /// Creates a watcher that flushes after `debounce` of quiet.
    pub fn new(provider: Arc<dyn NamespaceProvider>, debounce: Duration) -> Self {
        let (raw_tx, raw_rx) = unbounded();
        Self {
            provider,
            raw_tx,
            raw_rx,
            active: HashMap::new(),
            next_watch: 0,
            pending: Vec::new(),
            deadline: None,
            debounce,
        }
    }

    /// Start watching `subtree`.
    ///
    /// Returns `None` (and logs) when the provider rejects the subtree; the
    /// caller carries on without live updates for it.
    pub fn start_watching(
        &mut self,
        subtree: &AbsoluteId,
        filter: WatchFilter,
    ) -> Option<WatchHandle> {
        self.next_watch += 1;
        let handle = WatchHandle(self.next_watch);
        let sink = NotificationSink::new(handle, self.raw_tx.clone());

        match self.provider.register_watch(subtree, filter, sink) {
            Some(registration) => {
                tracing::debug!("Started {} for {}", handle, subtree);
                self.active.insert(
                    handle,
                    ActiveWatch {
                        registration,
                        subtree: subtree.clone(),
                    },
                );
                Some(handle)
            }
            None => {
                tracing::warn!("Watch registration failed for {}", subtree);
                None
            }
        }
    }

    /// Stop a watch obtained from [`start_watching`](Self::start_watching).
    pub fn stop_watching(&mut self, handle: WatchHandle) {
        match self.active.remove(&handle) {
            Some(watch) => {
                tracing::debug!("Stopped {} for {}", handle, watch.subtree);
                self.provider.deregister(watch.registration);
            }
            None => tracing::warn!("Attempted to stop unknown {}", handle),
        }
    }

    /// Number of active watches.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Move queued raw notifications into the pending buffer.
    ///
    /// Returns the number of notifications taken.
    pub fn poll_notifications(&mut self, now: Instant) -> usize {
        let mut count = 0;
        while let Ok(raw) = self.raw_rx.try_recv() {
            self.on_raw_notification(raw, now);
            count += 1;
        }
        count
    }

    /// Buffer one raw notification and re-arm the debounce deadline.
    pub fn on_raw_notification(&mut self, raw: RawNotification, at: Instant) {
        self.pending.push(raw);
        self.deadline = Some(at + self.debounce);
    }

    /// Flush the pending batch if the deadline is at or before `now`.
    ///
    /// The buffer is emptied before translation, so anything arriving while
    /// the batch is applied starts a new batch. Notifications from watches
    /// stopped in the meantime are skipped and untranslatable ones are
    /// logged and dropped.
    pub fn flush_if_ready_at(&mut self, now: Instant) -> Vec<ChangeEvent> {
        match self.deadline {
            Some(deadline) if deadline <= now => {}
            _ => return Vec::new(),
        }

        self.deadline = None;
        let raw_batch = std::mem::take(&mut self.pending);
        let total = raw_batch.len();

        let events: Vec<ChangeEvent> = raw_batch
            .into_iter()
            .filter(|raw| self.active.contains_key(&raw.watch))
            .filter_map(|raw| match ChangeEvent::try_from(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Dropping change notification: {}", e);
                    None
                }
            })
            .collect();

        tracing::debug!("Flushed {} of {} raw notifications", events.len(), total);
        events
    }

    /// Number of buffered notifications.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is buffered or queued.
    pub fn is_quiet(&self) -> bool {
        self.pending.is_empty() && self.raw_rx.is_empty()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if !self.active.is_empty() && !std::thread::panicking() {
            let outstanding: Vec<String> = self
                .active
                .iter()
                .map(|(handle, watch)| format!("{} ({})", handle, watch.subtree))
                .collect();
            panic!(
                "ChangeWatcher dropped with outstanding watches: {}",
                outstanding.join(", ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{MemoryProvider, RawChangeCode};

    fn root() -> AbsoluteId {
        AbsoluteId::new("C:\\")
    }

    fn setup() -> (Arc<MemoryProvider>, ChangeWatcher) {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_root(&root());
        let watcher = ChangeWatcher::new(provider.clone(), Duration::from_millis(100));
        (provider, watcher)
    }

    #[test]
    fn test_burst_is_flushed_once_in_arrival_order() {
        let (provider, mut watcher) = setup();
        let watch = watcher
            .start_watching(&root(), WatchFilter::default())
            .unwrap();

        let names = ["a", "b", "c", "d", "e"];
        for name in names {
            provider.create_folder(&root().join(name));
        }

        let start = Instant::now();
        for (offset, _) in names.iter().enumerate() {
            let raw = watcher.raw_rx.try_recv().unwrap();
            watcher.on_raw_notification(raw, start + Duration::from_millis(offset as u64 * 30));
        }

        // Each arrival pushed the deadline out again.
        assert!(watcher
            .flush_if_ready_at(start + Duration::from_millis(150))
            .is_empty());
        assert_eq!(watcher.pending_len(), 5);

        let batch = watcher.flush_if_ready_at(start + Duration::from_millis(220));
        let expected: Vec<_> = names
            .iter()
            .map(|name| ChangeEvent::Added(root().join(*name)))
            .collect();
        assert_eq!(batch, expected);
        assert_eq!(watcher.pending_len(), 0);
        assert!(watcher
            .flush_if_ready_at(start + Duration::from_secs(10))
            .is_empty());

        watcher.stop_watching(watch);
    }

    #[test]
    fn test_notifications_from_stopped_watch_are_skipped() {
        let (provider, mut watcher) = setup();
        provider.add_folder(&root().join("Users"));
        let outer = watcher
            .start_watching(&root(), WatchFilter::default())
            .unwrap();
        let inner = watcher
            .start_watching(&root().join("Users"), WatchFilter::default())
            .unwrap();

        provider.create_folder(&root().join("Users").join("Public"));
        let now = Instant::now();
        assert_eq!(watcher.poll_notifications(now), 1);

        watcher.stop_watching(inner);
        assert!(watcher
            .flush_if_ready_at(now + Duration::from_millis(100))
            .is_empty());

        watcher.stop_watching(outer);
        assert_eq!(provider.deregistrations(), 2);
    }

    #[test]
    fn test_unrecognized_codes_are_dropped() {
        let (provider, mut watcher) = setup();
        let watch = watcher
            .start_watching(&root(), WatchFilter::default())
            .unwrap();

        provider.emit(RawChangeCode::Other(99), &root().join("x"), None);
        provider.touch(&root().join("x"));

        let now = Instant::now();
        watcher.poll_notifications(now);
        let batch = watcher.flush_if_ready_at(now + Duration::from_millis(100));
        assert_eq!(batch, vec![ChangeEvent::Modified(root().join("x"))]);

        watcher.stop_watching(watch);
    }

    #[test]
    fn test_rejected_watch_returns_none() {
        let (provider, mut watcher) = setup();
        provider.reject_watch(&root());
        assert!(watcher
            .start_watching(&root(), WatchFilter::default())
            .is_none());
        assert_eq!(watcher.active_count(), 0);
    }

    #[test]
    #[should_panic(expected = "outstanding watches")]
    fn test_drop_with_outstanding_watch_panics() {
        let (_provider, mut watcher) = setup();
        watcher.start_watching(&root(), WatchFilter::default());
        drop(watcher);
    }
}

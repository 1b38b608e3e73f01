//! Namespace provider backed by real directories.
//!
//! Every registration shares one native watcher and one poll watcher; the
//! poll watcher takes over paths where native watching fails (NFS, WSL,
//! network drives). Backend events go through a router thread that pairs the
//! two halves of a rename and hands each notification to the registrations
//! watching the deepest folder that covers it.

use crate::error::NamespaceError;
use crate::namespace::{
    AbsoluteId, ChildEntry, EntryKind, FilterSet, IconToken, ItemComponent, NamespaceProvider,
    NotificationSink, RawChangeCode, RegistrationId, WatchFilter,
};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long the first half of a rename waits for its second half before it
/// is reported as the entry leaving.
const RENAME_PAIRING_WINDOW: Duration = Duration::from_millis(100);

/// Router wake-up interval while no rename half is pending.
const ROUTER_IDLE_TICK: Duration = Duration::from_secs(1);

/// Errors that can occur while setting up a filesystem watch.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The watcher backend could not be created.
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    /// The backend refused to watch a path.
    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        /// Path that was being watched.
        path: PathBuf,
        /// Backend error.
        source: notify::Error,
    },

    /// The event router thread could not be started.
    #[error("Failed to start event router: {0}")]
    RouterSpawn(#[from] io::Error),
}

struct Registration {
    path: PathBuf,
    recursive: bool,
    polling: bool,
    sink: NotificationSink,
}

impl Registration {
    /// Whether an event about `path` falls under this registration. Events
    /// about the watched folder itself only count with `include_self`.
    fn covers(&self, path: &Path, include_self: bool) -> bool {
        if path == self.path {
            return include_self;
        }
        if self.recursive {
            path.starts_with(&self.path)
        } else {
            path.parent() == Some(self.path.as_path())
        }
    }
}

type Routes = Arc<Mutex<HashMap<RegistrationId, Registration>>>;

/// Sinks of the registrations watching the deepest folder that covers `path`.
fn targets(
    routes: &HashMap<RegistrationId, Registration>,
    path: &Path,
    include_self: bool,
) -> Vec<NotificationSink> {
    let covering: Vec<&Registration> = routes
        .values()
        .filter(|registration| registration.covers(path, include_self))
        .collect();
    let Some(depth) = covering
        .iter()
        .map(|registration| registration.path.components().count())
        .max()
    else {
        return Vec::new();
    };
    covering
        .into_iter()
        .filter(|registration| registration.path.components().count() == depth)
        .map(|registration| registration.sink.clone())
        .collect()
}

struct RenameHalf {
    path: PathBuf,
    since: Instant,
}

/// Turns backend events into raw notifications on the registered sinks.
///
/// Backends that tag rename halves with a tracker (inotify) report a rename
/// as `From`, `To` and then `Both`; only `Both` is forwarded. Backends
/// without trackers report `From` directly followed by `To`, which are
/// paired in order. A first half that stays alone past the pairing window
/// means the entry left the watched area and is reported as deleted; a
/// lone second half means it arrived from outside and is reported as created.
struct EventRouter {
    routes: Routes,
    tracked: HashMap<usize, RenameHalf>,
    untracked: Option<RenameHalf>,
}

impl EventRouter {
    fn new(routes: Routes) -> Self {
        Self {
            routes,
            tracked: HashMap::new(),
            untracked: None,
        }
    }

    fn handle(&mut self, event: Event, now: Instant) {
        let tracker = event.tracker();
        let EventKind::Modify(ModifyKind::Name(mode)) = event.kind else {
            self.forward(&event, true);
            return;
        };

        match (mode, tracker, event.paths.as_slice()) {
            (RenameMode::From, Some(tracker), [from]) => {
                self.tracked.insert(
                    tracker,
                    RenameHalf {
                        path: from.clone(),
                        since: now,
                    },
                );
            }
            (RenameMode::From, None, [from]) => {
                self.flush_untracked();
                self.untracked = Some(RenameHalf {
                    path: from.clone(),
                    since: now,
                });
            }
            (RenameMode::To, Some(tracker), [_]) if self.tracked.contains_key(&tracker) => {
                // Both follows.
            }
            (RenameMode::To, None, [to]) if self.untracked.is_some() => {
                if let Some(from) = self.untracked.take() {
                    self.rename(&from.path, to);
                }
            }
            (RenameMode::Both, _, [from, to]) => {
                if let Some(tracker) = tracker {
                    self.tracked.remove(&tracker);
                }
                self.rename(from, to);
            }
            _ => self.forward(&event, false),
        }
    }

    /// Report first halves whose pairing window has passed.
    fn expire(&mut self, now: Instant) {
        let expired: Vec<usize> = self
            .tracked
            .iter()
            .filter(|(_, half)| now.duration_since(half.since) >= RENAME_PAIRING_WINDOW)
            .map(|(tracker, _)| *tracker)
            .collect();
        for tracker in expired {
            if let Some(half) = self.tracked.remove(&tracker) {
                self.vanished(&half.path);
            }
        }

        if self
            .untracked
            .as_ref()
            .is_some_and(|half| now.duration_since(half.since) >= RENAME_PAIRING_WINDOW)
        {
            self.flush_untracked();
        }
    }

    /// When the oldest pending half expires.
    fn next_deadline(&self) -> Option<Instant> {
        self.tracked
            .values()
            .chain(self.untracked.iter())
            .map(|half| half.since + RENAME_PAIRING_WINDOW)
            .min()
    }

    fn flush_untracked(&mut self) {
        if let Some(half) = self.untracked.take() {
            self.vanished(&half.path);
        }
    }

    fn vanished(&self, path: &Path) {
        if !path.exists() {
            self.deliver(RawChangeCode::Delete, path, None, false);
        }
    }

    fn rename(&self, from: &Path, to: &Path) {
        let is_dir = to.is_dir();
        if from.parent() == to.parent() {
            let code = if is_dir {
                RawChangeCode::RenameFolder
            } else {
                RawChangeCode::RenameItem
            };
            self.deliver(code, from, Some(to), false);
            return;
        }

        // A move is reported to whoever watches each side.
        let (gone, arrived) = if is_dir {
            (RawChangeCode::RmDir, RawChangeCode::MkDir)
        } else {
            (RawChangeCode::Delete, RawChangeCode::Create)
        };
        self.deliver(gone, from, None, false);
        self.deliver(arrived, to, None, false);
    }

    fn forward(&self, event: &Event, include_self: bool) {
        for path in &event.paths {
            if let Some(code) = raw_code(&event.kind, path) {
                self.deliver(code, path, None, include_self);
            }
        }
    }

    fn deliver(&self, code: RawChangeCode, path: &Path, secondary: Option<&Path>, include_self: bool) {
        let routes = self.routes.lock();
        for sink in targets(&routes, path, include_self) {
            sink.notify(
                code,
                AbsoluteId::from_path(path),
                secondary.map(AbsoluteId::from_path),
            );
        }
    }
}

fn run_router(
    mut router: EventRouter,
    events: Receiver<Result<Event, notify::Error>>,
    stop: Receiver<()>,
) {
    loop {
        let timeout = router
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(ROUTER_IDLE_TICK);

        select! {
            recv(events) -> message => match message {
                Ok(Ok(event)) => router.handle(event, Instant::now()),
                Ok(Err(e)) => tracing::warn!("Watcher backend error: {}", e),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
            default(timeout) => {}
        }
        router.expire(Instant::now());
    }
    tracing::debug!("Filesystem event router stopped");
}

/// The watchers shared by every registration and the router they feed.
struct Backend {
    native: Option<RecommendedWatcher>,
    poll: PollWatcher,
    stop: Option<Sender<()>>,
    router: Option<JoinHandle<()>>,
}

impl Backend {
    fn start(routes: Routes, poll_interval: Duration) -> Result<Self, WatcherError> {
        let (tx, rx) = unbounded();
        let native_tx = tx.clone();

        let native_config = Config::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_compare_contents(false);
        let native = match RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let _ = native_tx.send(res);
            },
            native_config,
        ) {
            Ok(native) => Some(native),
            Err(e) => {
                tracing::warn!("Native watcher unavailable: {}, using polling only", e);
                None
            }
        };

        let poll_config = Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(false);
        let poll = PollWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let _ = tx.send(res);
            },
            poll_config,
        )?;

        let (stop_tx, stop_rx) = unbounded();
        let router = EventRouter::new(routes);
        let handle = thread::Builder::new()
            .name("fs-event-router".to_string())
            .spawn(move || run_router(router, rx, stop_rx))?;

        Ok(Self {
            native,
            poll,
            stop: Some(stop_tx),
            router: Some(handle),
        })
    }

    /// Watch `path`, natively if possible. Returns whether polling is used.
    fn watch(&mut self, path: &Path, mode: RecursiveMode) -> Result<bool, WatcherError> {
        if let Some(native) = self.native.as_mut() {
            match native.watch(path, mode) {
                Ok(()) => {
                    tracing::debug!("Using native watcher for {}", path.display());
                    return Ok(false);
                }
                Err(e) => {
                    tracing::warn!(
                        "Native watcher failed for {}: {}, falling back to polling",
                        path.display(),
                        e
                    );
                }
            }
        }

        tracing::debug!("Using poll watcher for {}", path.display());
        self.poll
            .watch(path, mode)
            .map_err(|source| WatcherError::WatchPath {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(true)
    }

    fn unwatch(&mut self, path: &Path, polling: bool) {
        let result = match (polling, self.native.as_mut()) {
            (true, _) => self.poll.unwatch(path),
            (false, Some(native)) => native.unwatch(path),
            (false, None) => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!("Unwatch of {} failed: {}", path.display(), e);
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(router) = self.router.take() {
            if router.join().is_err() {
                tracing::error!("Filesystem event router panicked");
            }
        }
    }
}

/// Provider listing and watching the local filesystem.
pub struct FileSystemProvider {
    routes: Routes,
    backend: Mutex<Option<Backend>>,
    next_registration: AtomicU64,
    poll_interval: Duration,
}

impl FileSystemProvider {
    /// Create a provider; `poll_interval` applies to the polling fallback.
    ///
    /// The watchers start with the first registration.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            backend: Mutex::new(None),
            next_registration: AtomicU64::new(1),
            poll_interval,
        }
    }

    /// Number of live registrations.
    pub fn active_watches(&self) -> usize {
        self.routes.lock().len()
    }

    /// Watch `path` on the shared backend unless another registration
    /// already does. Returns whether the path is polled.
    fn watch_path(
        &self,
        backend: &mut Option<Backend>,
        path: &Path,
        filter: WatchFilter,
    ) -> Result<bool, WatcherError> {
        let shared = self
            .routes
            .lock()
            .values()
            .find(|registration| registration.path == path)
            .map(|registration| registration.polling);
        if let Some(polling) = shared {
            return Ok(polling);
        }

        let started = match backend.take() {
            Some(started) => started,
            None => Backend::start(Arc::clone(&self.routes), self.poll_interval)?,
        };
        let mode = if filter.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        backend.insert(started).watch(path, mode)
    }
}

impl Default for FileSystemProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

/// Map a `notify` event kind to the provider vocabulary.
///
/// Access events are dropped. Rename halves that reach this point are
/// unpaired and become a create or a delete depending on whether the path
/// still exists.
fn raw_code(kind: &EventKind, path: &Path) -> Option<RawChangeCode> {
    let code = match kind {
        EventKind::Create(CreateKind::Folder) => RawChangeCode::MkDir,
        EventKind::Create(CreateKind::File) => RawChangeCode::Create,
        EventKind::Create(_) => {
            if path.is_dir() {
                RawChangeCode::MkDir
            } else {
                RawChangeCode::Create
            }
        }
        EventKind::Remove(RemoveKind::Folder) => RawChangeCode::RmDir,
        EventKind::Remove(_) => RawChangeCode::Delete,
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.is_dir() {
                RawChangeCode::MkDir
            } else if path.exists() {
                RawChangeCode::Create
            } else {
                RawChangeCode::Delete
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => RawChangeCode::Attributes,
        EventKind::Modify(_) => RawChangeCode::UpdateItem,
        EventKind::Access(_) => return None,
        EventKind::Any => RawChangeCode::Other(0),
        EventKind::Other => RawChangeCode::Other(1),
    };
    Some(code)
}

#[cfg(windows)]
fn is_hidden(path: &Path, metadata: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
        || path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

#[cfg(not(windows))]
fn is_hidden(path: &Path, _metadata: &fs::Metadata) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

fn entry_for(id: &AbsoluteId, path: &Path, metadata: &fs::Metadata) -> ChildEntry {
    let (component, kind) = match id.last_component() {
        Some(component) => (component.clone(), EntryKind::FileSystem),
        None => (ItemComponent::new(id.root()), EntryKind::Drive),
    };
    ChildEntry {
        display_name: component.to_string(),
        id: component,
        is_container: metadata.is_dir(),
        kind,
        hidden: is_hidden(path, metadata),
    }
}

impl NamespaceProvider for FileSystemProvider {
    fn list_children(
        &self,
        id: &AbsoluteId,
        filter: FilterSet,
    ) -> Result<Vec<ChildEntry>, NamespaceError> {
        let dir = id.to_path_buf();
        let entries = fs::read_dir(&dir).map_err(|e| NamespaceError::from_io(id, e))?;

        let mut children = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(name) = path.file_name() else {
                continue;
            };
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry {}: {}", path.display(), e);
                    continue;
                }
            };
            let child_id = id.join(name.to_string_lossy().into_owned());
            let child = entry_for(&child_id, &path, &metadata);
            if filter.accepts(&child) {
                children.push(child);
            }
        }
        Ok(children)
    }

    fn describe_item(&self, id: &AbsoluteId) -> Result<ChildEntry, NamespaceError> {
        let path = id.to_path_buf();
        let metadata = fs::metadata(&path).map_err(|e| NamespaceError::from_io(id, e))?;
        Ok(entry_for(id, &path, &metadata))
    }

    fn resolve_display_name(&self, id: &AbsoluteId) -> Result<String, NamespaceError> {
        let path = id.to_path_buf();
        fs::metadata(&path).map_err(|e| NamespaceError::from_io(id, e))?;
        Ok(match id.last_component() {
            Some(component) => component.to_string(),
            None => id.to_string(),
        })
    }

    fn resolve_icon(&self, id: &AbsoluteId) -> Result<IconToken, NamespaceError> {
        let metadata =
            fs::symlink_metadata(id.to_path_buf()).map_err(|e| NamespaceError::from_io(id, e))?;
        let icon = if metadata.file_type().is_symlink() {
            IconToken(4)
        } else if metadata.is_dir() {
            IconToken::DEFAULT_FOLDER
        } else {
            IconToken(0)
        };
        Ok(icon)
    }

    fn has_subfolder(&self, id: &AbsoluteId) -> Result<bool, NamespaceError> {
        let entries = fs::read_dir(id.to_path_buf()).map_err(|e| NamespaceError::from_io(id, e))?;
        Ok(entries
            .filter_map(|e| e.ok())
            .any(|entry| entry.path().is_dir()))
    }

    fn register_watch(
        &self,
        subtree: &AbsoluteId,
        filter: WatchFilter,
        sink: NotificationSink,
    ) -> Option<RegistrationId> {
        let path = subtree.to_path_buf();
        let mut backend = self.backend.lock();
        match self.watch_path(&mut backend, &path, filter) {
            Ok(polling) => {
                let registration =
                    RegistrationId(self.next_registration.fetch_add(1, Ordering::Relaxed));
                self.routes.lock().insert(
                    registration,
                    Registration {
                        path,
                        recursive: filter.recursive,
                        polling,
                        sink,
                    },
                );
                Some(registration)
            }
            Err(e) => {
                tracing::warn!("Couldn't monitor {} for changes: {}", path.display(), e);
                None
            }
        }
    }

    fn deregister(&self, registration: RegistrationId) {
        let mut backend = self.backend.lock();
        let (removed, shared) = {
            let mut routes = self.routes.lock();
            let Some(removed) = routes.remove(&registration) else {
                tracing::warn!("Deregistering unknown registration {:?}", registration);
                return;
            };
            let shared = routes.values().any(|other| other.path == removed.path);
            (removed, shared)
        };
        if shared {
            return;
        }
        if let Some(backend) = backend.as_mut() {
            backend.unwatch(&removed.path, removed.polling);
        }
    }

    #[cfg(windows)]
    fn same_component(&self, a: &str, b: &str) -> bool {
        a.to_lowercase() == b.to_lowercase()
    }
}

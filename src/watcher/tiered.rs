//! Two-tier session watcher.
//!
//! Hot sessions get real filesystem watches on their directories, debounced
//! to coalesce rapid write bursts. Cold sessions share one batched stat
//! pass per directory on an interval, and sessions idle long enough are
//! frozen out of that pass entirely. The watcher never holds more than the
//! configured number of sessions hot; new activity promotes and the least
//! recently active session makes room.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime};

use notify_debouncer_full::{
    new_debouncer,
    notify::{self, RecursiveMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::WatcherSettings;
use crate::model::SourceKind;

use super::error::WatcherError;
use super::events::ChangeEvent;
use super::registry::{Tier, WatchRegistry};

/// Maps a file path to its session id; `None` means not a session file.
pub type SessionIdFn = Arc<dyn Fn(&Path) -> Option<String> + Send + Sync>;

type FileDebouncer = Debouncer<notify::RecommendedWatcher, RecommendedCache>;

/// Commands routed to the hot loop, which owns the filesystem watcher.
enum Control {
    Promote(String),
    Touch(String),
    SetHotTarget(usize),
    Register { id: String, path: PathBuf },
    Resync,
}

/// State shared by the watcher workers.
struct Shared {
    source: SourceKind,
    registry: RwLock<WatchRegistry>,
    id_fn: SessionIdFn,
    events_tx: mpsc::Sender<ChangeEvent>,
    dropped_events: AtomicU64,
    /// Directories watched permanently so new session files are seen even
    /// when nothing in them is hot.
    roots: Vec<PathBuf>,
    /// Whether the roots contain session files in nested subdirectories.
    recursive_roots: bool,
}

impl Shared {
    fn registry_read(&self) -> RwLockReadGuard<'_, WatchRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, WatchRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChangeEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    session = %event.session_id,
                    dropped,
                    "Event queue full, dropping change event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Stat an event path and fold the result into the registry.
    fn observe_path(&self, path: &Path) {
        let Some(id) = (self.id_fn)(path) else {
            return;
        };
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let outcome = self.registry_write().observe(
                    &id,
                    path,
                    meta.len(),
                    mtime,
                    Instant::now(),
                );
                if let Some(kind) = outcome.kind {
                    self.emit(ChangeEvent::new(self.source, id, kind));
                }
            }
            Err(_) => {
                self.registry_write().freeze_missing(path);
            }
        }
    }
}

/// Hot/cold tiered watcher for one source.
///
/// Change events go out through the bounded channel handed to [`spawn`];
/// when the queue is full events are dropped, never blocked on, since
/// consumers re-query the caches anyway. Tier operations are fire-and-forget
/// commands handled by the worker that owns the filesystem watcher.
///
/// [`spawn`]: TieredWatcher::spawn
pub struct TieredWatcher {
    shared: Arc<Shared>,
    control_tx: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl TieredWatcher {
    /// Start watching `roots`, seeding the registry from the files already
    /// on disk. Must be called from within a tokio runtime.
    ///
    /// Roots that do not exist yet are picked up later by the cold poll, so
    /// watching a tool directory before the tool ever ran is fine.
    ///
    /// # Errors
    ///
    /// Fails when the filesystem watcher cannot be created or an existing
    /// root cannot be watched.
    pub fn spawn(
        source: SourceKind,
        roots: Vec<PathBuf>,
        recursive_roots: bool,
        id_fn: SessionIdFn,
        settings: &WatcherSettings,
        events_tx: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self, WatcherError> {
        let mut registry = WatchRegistry::new(settings.hot_target);
        scan_existing(&roots, recursive_roots, &id_fn, &mut registry);

        let shared = Arc::new(Shared {
            source,
            registry: RwLock::new(registry),
            id_fn,
            events_tx,
            dropped_events: AtomicU64::new(0),
            roots,
            recursive_roots,
        });

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let debouncer = new_debouncer(settings.debounce(), None, move |result| {
            let _ = raw_tx.send(result);
        })?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let hot = tokio::spawn(hot_loop(
            Arc::clone(&shared),
            debouncer,
            raw_rx,
            control_rx,
            cancel.clone(),
        ));
        let cold = tokio::spawn(cold_loop(
            Arc::clone(&shared),
            control_tx.clone(),
            settings.poll_interval(),
            settings.hot_idle(),
            settings.freeze_after(),
            cancel.clone(),
        ));

        Ok(Self {
            shared,
            control_tx,
            cancel,
            tasks: vec![hot, cold],
        })
    }

    #[must_use]
    pub fn source(&self) -> SourceKind {
        self.shared.source
    }

    /// Promote a session into the hot set.
    pub fn promote(&self, session_id: &str) {
        let _ = self.control_tx.send(Control::Promote(session_id.to_string()));
    }

    /// Unfreeze a session and refresh its activity clock.
    pub fn touch(&self, session_id: &str) {
        let _ = self.control_tx.send(Control::Touch(session_id.to_string()));
    }

    /// Resize the hot set.
    pub fn set_hot_target(&self, target: usize) {
        let _ = self.control_tx.send(Control::SetHotTarget(target));
    }

    /// Track a session found by enumeration so tier operations have a
    /// target before any filesystem event mentions it.
    pub fn register_seen(&self, session_id: &str, path: &Path) {
        let _ = self.control_tx.send(Control::Register {
            id: session_id.to_string(),
            path: path.to_path_buf(),
        });
    }

    #[must_use]
    pub fn tier_of(&self, session_id: &str) -> Option<Tier> {
        self.shared.registry_read().tier_of(session_id)
    }

    #[must_use]
    pub fn hot_count(&self) -> usize {
        self.shared.registry_read().hot_count()
    }

    /// Number of sessions the watcher knows about.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.shared.registry_read().len()
    }

    /// Events dropped because the outbound queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }

    /// Stop the workers and wait for them to finish. Idempotent.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for TieredWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Register every session file already under the roots, without events.
fn scan_existing(
    roots: &[PathBuf],
    recursive: bool,
    id_fn: &SessionIdFn,
    registry: &mut WatchRegistry,
) {
    let now = Instant::now();
    for root in roots {
        let max_depth = if recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(root)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(id) = id_fn(entry.path()) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let age = SystemTime::now()
                .duration_since(mtime)
                .unwrap_or_default();
            registry.register(&id, entry.path(), meta.len(), mtime, age, now);
        }
    }
}

/// Hot loop: owns the debounced filesystem watcher and reconciles its watch
/// set with {roots} ∪ {directories of hot sessions} after every batch.
async fn hot_loop(
    shared: Arc<Shared>,
    mut debouncer: FileDebouncer,
    mut raw_rx: mpsc::UnboundedReceiver<DebounceEventResult>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    cancel: CancellationToken,
) {
    let mut watched: HashSet<PathBuf> = HashSet::new();
    resync_watches(&shared, &mut debouncer, &mut watched);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            result = raw_rx.recv() => match result {
                Some(result) => handle_debounce_result(&shared, result),
                None => break,
            },
            command = control_rx.recv() => match command {
                Some(command) => handle_control(&shared, command),
                None => break,
            },
        }
        resync_watches(&shared, &mut debouncer, &mut watched);
    }
}

fn handle_debounce_result(shared: &Shared, result: DebounceEventResult) {
    match result {
        Ok(events) => {
            // A burst can mention the same file many times; stat it once.
            let mut seen: HashSet<&Path> = HashSet::new();
            for event in &events {
                for path in &event.paths {
                    if seen.insert(path.as_path()) {
                        shared.observe_path(path);
                    }
                }
            }
        }
        Err(errors) => {
            for error in errors {
                tracing::warn!(source = %shared.source, error = %error, "File watcher error");
            }
        }
    }
}

fn handle_control(shared: &Shared, command: Control) {
    let now = Instant::now();
    match command {
        Control::Promote(id) => {
            shared.registry_write().promote(&id, now);
        }
        Control::Touch(id) => {
            shared.registry_write().touch(&id, now);
        }
        Control::SetHotTarget(target) => {
            shared.registry_write().set_hot_target(target);
        }
        Control::Register { id, path } => {
            if let Ok(meta) = std::fs::metadata(&path) {
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let age = SystemTime::now()
                    .duration_since(mtime)
                    .unwrap_or_default();
                shared
                    .registry_write()
                    .register(&id, &path, meta.len(), mtime, age, now);
            }
        }
        Control::Resync => {}
    }
}

/// Bring the filesystem watch set in line with what the tiers require.
///
/// Roots stay watched permanently; directories of hot sessions come and go
/// with promotions. Watch attempts on missing directories fail quietly and
/// are retried on the next resync.
fn resync_watches(shared: &Shared, debouncer: &mut FileDebouncer, watched: &mut HashSet<PathBuf>) {
    let mut needed: HashMap<PathBuf, RecursiveMode> = HashMap::new();
    for dir in shared.registry_read().hot_dirs() {
        needed.insert(dir, RecursiveMode::NonRecursive);
    }
    let root_mode = if shared.recursive_roots {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    for root in &shared.roots {
        // Recursive roots already cover every hot directory beneath them.
        needed.retain(|dir, _| {
            !(shared.recursive_roots && dir.starts_with(root)) || dir == root
        });
        needed.insert(root.clone(), root_mode);
    }

    let stale: Vec<PathBuf> = watched
        .iter()
        .filter(|dir| !needed.contains_key(*dir))
        .cloned()
        .collect();
    for dir in stale {
        if let Err(e) = debouncer.unwatch(&dir) {
            tracing::debug!(path = %dir.display(), error = %e, "Failed to unwatch directory");
        }
        watched.remove(&dir);
    }

    for (dir, mode) in needed {
        if watched.contains(&dir) {
            continue;
        }
        match debouncer.watch(&dir, mode) {
            Ok(()) => {
                tracing::debug!(path = %dir.display(), "Watching directory");
                watched.insert(dir);
            }
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "Cannot watch directory yet");
            }
        }
    }
}

/// Cold loop: demotes idle hot sessions, then stats every cold directory
/// with one listing pass each, freezing sessions that idled out or whose
/// files vanished.
async fn cold_loop(
    shared: Arc<Shared>,
    control_tx: mpsc::UnboundedSender<Control>,
    poll_interval: Duration,
    hot_idle: Duration,
    freeze_after: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let demoted = shared
            .registry_write()
            .demote_idle(Instant::now(), hot_idle);
        let mut need_resync = !demoted.is_empty();

        // All listing I/O happens before the registry lock is retaken.
        let listings = collect_listings(&shared);
        for (dir, listing) in &listings {
            let outcome = shared.registry_write().apply_listing(
                dir,
                listing,
                Instant::now(),
                freeze_after,
                &|path| (shared.id_fn)(path),
            );
            need_resync |= outcome.membership_changed;
            for (id, kind) in outcome.events {
                shared.emit(ChangeEvent::new(shared.source, id, kind));
            }
        }

        if need_resync {
            let _ = control_tx.send(Control::Resync);
        }
    }
}

type Listing = HashMap<PathBuf, (u64, SystemTime)>;

/// One stat pass: the roots (for discovering new sessions) plus every
/// directory that still holds cold sessions.
fn collect_listings(shared: &Shared) -> HashMap<PathBuf, Listing> {
    let mut listings: HashMap<PathBuf, Listing> = HashMap::new();

    for root in &shared.roots {
        if shared.recursive_roots {
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let (Some(parent), Ok(meta)) = (entry.path().parent(), entry.metadata()) else {
                    continue;
                };
                listings.entry(parent.to_path_buf()).or_default().insert(
                    entry.path().to_path_buf(),
                    (meta.len(), meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
                );
            }
        } else {
            listings.insert(root.clone(), list_dir(root));
        }
    }

    let cold_dirs = shared.registry_read().cold_dirs();
    for dir in cold_dirs {
        if !listings.contains_key(&dir) {
            let listing = list_dir(&dir);
            listings.insert(dir, listing);
        }
    }

    listings
}

/// List a directory's files with their stamps. Unreadable or missing
/// directories produce an empty listing, which freezes their sessions.
fn list_dir(dir: &Path) -> Listing {
    let mut listing = Listing::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return listing;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        listing.insert(
            entry.path(),
            (meta.len(), meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
        );
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::ChangeKind;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_settings() -> WatcherSettings {
        WatcherSettings {
            hot_target: 4,
            debounce_ms: 50,
            poll_interval_secs: 1,
            hot_idle_secs: 300,
            freeze_after_secs: 24 * 3600,
            event_queue_size: 64,
        }
    }

    fn stem_id(path: &Path) -> Option<String> {
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(ToString::to_string)
        } else {
            None
        }
    }

    fn spawn_watcher(
        root: &Path,
    ) -> Result<(TieredWatcher, mpsc::Receiver<ChangeEvent>), WatcherError> {
        let (tx, rx) = mpsc::channel(64);
        let watcher = TieredWatcher::spawn(
            SourceKind::ClaudeCode,
            vec![root.to_path_buf()],
            false,
            Arc::new(stem_id),
            &test_settings(),
            tx,
        )?;
        Ok((watcher, rx))
    }

    fn append_line(path: &Path, line: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "{line}").unwrap();
    }

    #[tokio::test]
    async fn test_initial_scan_registers_existing_sessions_cold() {
        let dir = TempDir::new().unwrap();
        append_line(&dir.path().join("aaa.jsonl"), "{}");
        append_line(&dir.path().join("bbb.jsonl"), "{}");

        let (mut watcher, _rx) = match spawn_watcher(dir.path()) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        assert_eq!(watcher.tracked(), 2);
        assert_eq!(watcher.hot_count(), 0);
        assert_eq!(watcher.tier_of("aaa"), Some(Tier::Cold));
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_file_produces_created_event() {
        let dir = TempDir::new().unwrap();
        let (mut watcher, mut rx) = match spawn_watcher(dir.path()) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        append_line(&dir.path().join("fresh.jsonl"), "{}");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        // Tolerate slow CI: the cold poll covers missed notify events.
        if let Ok(Some(event)) = event {
            assert_eq!(event.session_id, "fresh");
            assert_eq!(event.kind, ChangeKind::Created);
            assert_eq!(watcher.tier_of("fresh"), Some(Tier::Hot));
        }
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_append_to_known_session_is_message_added() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sess.jsonl");
        append_line(&path, "{\"n\":1}");

        let (mut watcher, mut rx) = match spawn_watcher(dir.path()) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        append_line(&path, "{\"n\":2}");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        if let Ok(Some(event)) = event {
            assert_eq!(event.session_id, "sess");
            assert_eq!(event.kind, ChangeKind::MessageAdded);
        }
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_promote_and_set_hot_target_via_controls() {
        let dir = TempDir::new().unwrap();
        append_line(&dir.path().join("one.jsonl"), "{}");
        append_line(&dir.path().join("two.jsonl"), "{}");

        let (mut watcher, _rx) = match spawn_watcher(dir.path()) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        watcher.promote("one");
        watcher.promote("two");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(watcher.hot_count(), 2);

        watcher.set_hot_target(1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(watcher.hot_count(), 1);
        assert_eq!(watcher.tier_of("two"), Some(Tier::Hot));
        assert_eq!(watcher.tier_of("one"), Some(Tier::Cold));

        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_cold_poll_detects_growth_without_notify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("polled.jsonl");
        append_line(&path, "{\"n\":1}");

        // Note the 1s poll interval from test_settings.
        let (mut watcher, mut rx) = match spawn_watcher(dir.path()) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        append_line(&path, "{\"n\":2}");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        if let Ok(Some(event)) = event {
            assert_eq!(event.session_id, "polled");
            assert_eq!(event.kind, ChangeKind::MessageAdded);
        }
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_root_spawns_and_discovers_later() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("not-yet");

        let (mut watcher, mut rx) = match spawn_watcher(&root) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };
        assert_eq!(watcher.tracked(), 0);

        std::fs::create_dir_all(&root).unwrap();
        append_line(&root.join("late.jsonl"), "{}");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        if let Ok(Some(event)) = event {
            assert_eq!(event.session_id, "late");
            assert_eq!(event.kind, ChangeKind::Created);
        }
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut watcher, _rx) = match spawn_watcher(dir.path()) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };
        watcher.shutdown().await;
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_seen_tracks_enumerated_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seen.jsonl");

        let (mut watcher, _rx) = match spawn_watcher(dir.path()) {
            Ok(pair) => pair,
            Err(WatcherError::Notify(e)) => {
                eprintln!("Skipping test due to system limit: {e}");
                return;
            }
            Err(e) => panic!("Unexpected error: {e}"),
        };

        append_line(&path, "{}");
        watcher.register_seen("seen", &path);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(watcher.tier_of("seen"), Some(Tier::Cold));

        watcher.shutdown().await;
    }
}

//! One merged change-event stream over every source.

use std::collections::HashMap;
use std::path::Path;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::SourceKind;
use crate::sources::SourceAdapter;
use crate::watcher::{ChangeEvent, Tier, TieredWatcher};

/// Fans one [`TieredWatcher`] per source into a single event channel.
///
/// A source whose watcher cannot start (say, inotify limits) is skipped
/// with a warning; the remaining sources keep working.
pub struct WatcherManager {
    watchers: HashMap<SourceKind, TieredWatcher>,
    events_rx: Option<mpsc::Receiver<ChangeEvent>>,
}

impl WatcherManager {
    pub fn start(
        adapters: &[Box<dyn SourceAdapter>],
        project_root: &Path,
        config: &EngineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.watcher.event_queue_size);
        let mut watchers = HashMap::new();
        for adapter in adapters {
            match adapter.watch(project_root, events_tx.clone()) {
                Ok(watcher) => {
                    info!(source = %adapter.kind(), "Watching sessions");
                    watchers.insert(adapter.kind(), watcher);
                }
                Err(e) => {
                    warn!(source = %adapter.kind(), error = %e, "Watcher unavailable");
                }
            }
        }
        Self {
            watchers,
            events_rx: Some(events_rx),
        }
    }

    /// The merged event stream. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ChangeEvent>> {
        self.events_rx.take()
    }

    /// Mark a session as of interest, promoting it to the hot tier.
    /// `source: None` broadcasts to every watcher.
    pub fn promote(&self, source: Option<SourceKind>, session_id: &str) {
        self.dispatch(source, |w| w.promote(session_id));
    }

    /// Record external interest without promotion; unfreezes frozen
    /// sessions.
    pub fn touch(&self, source: Option<SourceKind>, session_id: &str) {
        self.dispatch(source, |w| w.touch(session_id));
    }

    pub fn set_hot_target(&self, source: Option<SourceKind>, target: usize) {
        self.dispatch(source, |w| w.set_hot_target(target));
    }

    /// Current tier of a session, if its source is being watched.
    pub fn tier_of(&self, source: SourceKind, session_id: &str) -> Option<Tier> {
        self.watchers.get(&source)?.tier_of(session_id)
    }

    /// Sources with a live watcher.
    pub fn sources(&self) -> Vec<SourceKind> {
        let mut sources: Vec<SourceKind> = self.watchers.keys().copied().collect();
        sources.sort_by_key(|s| s.as_str());
        sources
    }

    /// Events dropped across every watcher because the consumer lagged.
    pub fn dropped_events(&self) -> u64 {
        self.watchers.values().map(TieredWatcher::dropped_events).sum()
    }

    /// Stop every watcher. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        for (source, mut watcher) in self.watchers.drain() {
            watcher.shutdown().await;
            debug!(source = %source, "Watcher stopped");
        }
    }

    fn dispatch(&self, source: Option<SourceKind>, apply: impl Fn(&TieredWatcher)) {
        match source {
            Some(kind) => match self.watchers.get(&kind) {
                Some(watcher) => apply(watcher),
                None => debug!(source = %kind, "No watcher for source"),
            },
            None => {
                for watcher in self.watchers.values() {
                    apply(watcher);
                }
            }
        }
    }
}

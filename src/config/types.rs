//! Engine configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the session engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Cache sizing.
    pub cache: CacheSettings,
    /// Tiered watcher tuning.
    pub watcher: WatcherSettings,
    /// File and line size limits.
    pub limits: LimitSettings,
}

/// Sizing for the per-adapter metadata and message caches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum entries per cache before least-recently-used eviction.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_entries: 2048 }
    }
}

/// Tuning for the hot/cold tiered watcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherSettings {
    /// How many sessions may hold filesystem watches at once.
    pub hot_target: usize,
    /// Debounce window for raw filesystem events, in milliseconds.
    pub debounce_ms: u64,
    /// Cold-tier polling interval, in seconds.
    pub poll_interval_secs: u64,
    /// Hot sessions idle longer than this are demoted, in seconds.
    pub hot_idle_secs: u64,
    /// Cold sessions idle longer than this are frozen, in seconds.
    pub freeze_after_secs: u64,
    /// Capacity of the outbound change-event queue.
    pub event_queue_size: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            hot_target: 8,
            debounce_ms: 100,
            poll_interval_secs: 30,
            hot_idle_secs: 300,
            freeze_after_secs: 24 * 60 * 60,
            event_queue_size: 256,
        }
    }
}

impl WatcherSettings {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn hot_idle(&self) -> Duration {
        Duration::from_secs(self.hot_idle_secs)
    }

    #[must_use]
    pub fn freeze_after(&self) -> Duration {
        Duration::from_secs(self.freeze_after_secs)
    }
}

/// Byte limits applied while reading session files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitSettings {
    /// Longest single log line the reader will parse.
    pub max_line_bytes: usize,
    /// Files at least this big get a performance warning in list views.
    pub large_file_bytes: u64,
    /// Files at least this big should not be auto-reloaded.
    pub huge_file_bytes: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_line_bytes: 10 * 1024 * 1024,
            large_file_bytes: 100 * 1024 * 1024,
            huge_file_bytes: 500 * 1024 * 1024,
        }
    }
}

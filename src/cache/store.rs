//! Bounded per-file cache keyed by path, validated by size and mtime.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

/// The on-disk facts a cache entry was built from.
///
/// A cached value is only served when both fields still match exactly; a
/// changed mtime with an unchanged size still invalidates, since an editor
/// can rewrite a file to the same length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationStamp {
    pub size: u64,
    pub mtime: SystemTime,
}

impl ValidationStamp {
    /// Stat `path` and build its stamp.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be statted, including when it no longer
    /// exists.
    pub fn for_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            mtime: meta.modified()?,
        })
    }
}

/// One cached parse result plus what is needed to resume or validate it.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stamp: ValidationStamp,
    /// Byte offset consumed so far; 0 means the value cannot be resumed.
    offset: u64,
    /// Logical access tick for least-recently-used eviction.
    last_access: u64,
}

/// Outcome of a cache probe.
#[derive(Debug)]
pub enum CacheLookup<T> {
    /// Entry is current; the value is an independent copy.
    Hit(T),
    /// File grew past the cached offset; resume parsing from `offset` on a
    /// copy of the cached value.
    Resumable { value: T, offset: u64 },
    /// No usable entry: absent, shrunk, rewritten, or not resumable.
    Missing,
}

/// Bounded map of parse results, one entry per session file.
///
/// Values are deep-copied on the way out, so callers can never observe a
/// later refresh mutating what they hold. All locking is internal and no
/// lock is ever held across file I/O.
pub struct SessionCache<T> {
    inner: RwLock<CacheInner<T>>,
    capacity: usize,
}

struct CacheInner<T> {
    entries: HashMap<PathBuf, CacheEntry<T>>,
    tick: u64,
}

impl<T: Clone> SessionCache<T> {
    /// Create a cache bounded to `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Probe the cache for `path` given the file's current stamp.
    pub fn lookup(&self, path: &Path, current: ValidationStamp) -> CacheLookup<T> {
        let mut inner = self.write_lock();
        inner.tick += 1;
        let tick = inner.tick;

        let Some(entry) = inner.entries.get_mut(path) else {
            return CacheLookup::Missing;
        };

        if entry.stamp == current {
            entry.last_access = tick;
            return CacheLookup::Hit(entry.value.clone());
        }

        if current.size > entry.stamp.size && entry.offset > 0 {
            entry.last_access = tick;
            return CacheLookup::Resumable {
                value: entry.value.clone(),
                offset: entry.offset,
            };
        }

        CacheLookup::Missing
    }

    /// Insert or replace the entry for `path`, evicting the least recently
    /// used entries once over capacity.
    pub fn insert(&self, path: &Path, value: T, stamp: ValidationStamp, offset: u64) {
        let mut inner = self.write_lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                value,
                stamp,
                offset,
                last_access: tick,
            },
        );

        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(p, _)| p.clone())
            else {
                break;
            };
            tracing::trace!(path = %oldest.display(), "Evicting least recently used cache entry");
            inner.entries.remove(&oldest);
        }
    }

    /// Drop the entry for `path`, if any.
    pub fn remove(&self, path: &Path) {
        self.write_lock().entries.remove(path);
    }

    /// Drop entries under `dir` whose files are no longer in `live`.
    ///
    /// Called after a directory re-enumeration so deleted sessions do not
    /// pin stale parses in memory.
    pub fn prune_under(&self, dir: &Path, live: &HashSet<PathBuf>) {
        let mut inner = self.write_lock();
        inner
            .entries
            .retain(|path, _| !path.starts_with(dir) || live.contains(path));
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when an entry for `path` exists, regardless of freshness.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.read_lock().entries.contains_key(path)
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, CacheInner<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, CacheInner<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

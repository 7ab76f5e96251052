//! Tier bookkeeping for watched sessions.
//!
//! `WatchRegistry` is the pure state machine behind the tiered watcher: it
//! owns no I/O and takes explicit clock arguments, so every transition is
//! unit-testable. The watcher workers stat files and list directories, then
//! feed the observations in here.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use super::events::ChangeKind;

/// Watch tier of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Its directory holds a filesystem watch.
    Hot,
    /// Covered by interval polling.
    Cold,
    /// Neither watched nor polled until touched again.
    Frozen,
}

/// Tracked state of one session file.
#[derive(Debug, Clone)]
pub struct SessionTrack {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: SystemTime,
    pub last_activity: Instant,
    pub tier: Tier,
}

/// Result of feeding one observed file state into the registry.
#[derive(Debug)]
pub struct ObserveOutcome {
    /// Event to emit, if the observation was a real change.
    pub kind: Option<ChangeKind>,
    /// Whether the hot set changed, requiring a watch resync.
    pub membership_changed: bool,
}

/// Result of applying one directory listing.
#[derive(Debug, Default)]
pub struct ListingOutcome {
    pub events: Vec<(String, ChangeKind)>,
    pub membership_changed: bool,
}

/// Session registry with hot/cold/frozen tier transitions.
pub struct WatchRegistry {
    sessions: HashMap<String, SessionTrack>,
    by_path: HashMap<PathBuf, String>,
    hot_target: usize,
}

impl WatchRegistry {
    #[must_use]
    pub fn new(hot_target: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_path: HashMap::new(),
            hot_target,
        }
    }

    /// Track a session in the cold tier without emitting anything.
    ///
    /// Used by the initial scan. `age` is how long ago the file was last
    /// modified; sessions idle past the freeze threshold will then freeze on
    /// the first sweep instead of being polled for a day first. Returns
    /// `false` when the id was already tracked.
    pub fn register(
        &mut self,
        id: &str,
        path: &Path,
        size: u64,
        mtime: SystemTime,
        age: Duration,
        now: Instant,
    ) -> bool {
        if self.sessions.contains_key(id) {
            return false;
        }
        let last_activity = now.checked_sub(age).unwrap_or(now);
        self.insert_track(id, path, size, mtime, last_activity, Tier::Cold);
        true
    }

    /// Feed one statted file state in, typically after a filesystem event.
    ///
    /// Unknown paths are registered and reported as created; known paths
    /// diff against the stored stamp. Real changes count as activity and
    /// promote the session.
    pub fn observe(
        &mut self,
        id: &str,
        path: &Path,
        size: u64,
        mtime: SystemTime,
        now: Instant,
    ) -> ObserveOutcome {
        if let Some(track) = self.sessions.get_mut(id) {
            if track.size == size && track.mtime == mtime {
                return ObserveOutcome {
                    kind: None,
                    membership_changed: false,
                };
            }
            let kind = if size > track.size {
                ChangeKind::MessageAdded
            } else {
                ChangeKind::Updated
            };
            track.size = size;
            track.mtime = mtime;
            let membership_changed = self.make_hot(id, now);
            return ObserveOutcome {
                kind: Some(kind),
                membership_changed,
            };
        }

        self.insert_track(id, path, size, mtime, now, Tier::Cold);
        let membership_changed = self.make_hot(id, now);
        ObserveOutcome {
            kind: Some(ChangeKind::Created),
            membership_changed,
        }
    }

    /// Freeze the session at `path` because its file is gone.
    ///
    /// Returns whether the hot set changed.
    pub fn freeze_missing(&mut self, path: &Path) -> bool {
        let Some(id) = self.by_path.get(path).cloned() else {
            return false;
        };
        let Some(track) = self.sessions.get_mut(&id) else {
            return false;
        };
        let was_hot = track.tier == Tier::Hot;
        track.tier = Tier::Frozen;
        tracing::debug!(session = %id, "Session frozen, file disappeared");
        was_hot
    }

    /// Unfreeze and refresh activity without forcing a hot promotion.
    pub fn touch(&mut self, id: &str, now: Instant) -> bool {
        let Some(track) = self.sessions.get_mut(id) else {
            return false;
        };
        track.last_activity = now;
        if track.tier == Tier::Frozen {
            track.tier = Tier::Cold;
        }
        true
    }

    /// Promote a session into the hot set, demoting the least recently
    /// active hot session if that would exceed the target.
    ///
    /// Returns whether the hot set changed.
    pub fn promote(&mut self, id: &str, now: Instant) -> bool {
        self.make_hot(id, now)
    }

    /// Change the hot-set size, demoting excess sessions on shrink.
    pub fn set_hot_target(&mut self, target: usize) -> bool {
        self.hot_target = target;
        let mut changed = false;
        while self.hot_count() > self.hot_target {
            if !self.demote_least_recent() {
                break;
            }
            changed = true;
        }
        changed
    }

    /// Demote hot sessions idle longer than `idle`. Returns demoted ids.
    pub fn demote_idle(&mut self, now: Instant, idle: Duration) -> Vec<String> {
        let mut demoted: Vec<String> = self
            .sessions
            .values()
            .filter(|t| t.tier == Tier::Hot && now.duration_since(t.last_activity) >= idle)
            .map(|t| t.id.clone())
            .collect();
        demoted.sort();
        for id in &demoted {
            if let Some(track) = self.sessions.get_mut(id) {
                track.tier = Tier::Cold;
                tracing::debug!(session = %id, "Session demoted to cold tier");
            }
        }
        demoted
    }

    /// Apply one cold-poll directory listing.
    ///
    /// `listing` maps the directory's files to their current `(size, mtime)`.
    /// New session files are registered and promoted; changed cold sessions
    /// produce events and promote; unchanged cold sessions past the freeze
    /// threshold freeze; cold sessions missing from the listing freeze
    /// immediately. Hot and frozen sessions are left alone.
    pub fn apply_listing(
        &mut self,
        dir: &Path,
        listing: &HashMap<PathBuf, (u64, SystemTime)>,
        now: Instant,
        freeze_after: Duration,
        id_for: &dyn Fn(&Path) -> Option<String>,
    ) -> ListingOutcome {
        let mut outcome = ListingOutcome::default();

        let mut new_files: Vec<(String, PathBuf, u64, SystemTime)> = listing
            .iter()
            .filter(|(path, _)| !self.by_path.contains_key(*path))
            .filter_map(|(path, &(size, mtime))| {
                id_for(path).map(|id| (id, path.clone(), size, mtime))
            })
            .collect();
        new_files.sort();
        for (id, path, size, mtime) in new_files {
            if self.sessions.contains_key(&id) {
                continue;
            }
            self.insert_track(&id, &path, size, mtime, now, Tier::Cold);
            outcome.membership_changed |= self.make_hot(&id, now);
            outcome.events.push((id, ChangeKind::Created));
        }

        let mut cold_here: Vec<String> = self
            .sessions
            .values()
            .filter(|t| t.tier == Tier::Cold && t.path.parent() == Some(dir))
            .map(|t| t.id.clone())
            .collect();
        cold_here.sort();

        enum Decision {
            Vanished,
            Changed(ChangeKind, u64, SystemTime),
            Freeze,
            Unchanged,
        }

        for id in cold_here {
            let decision = match self.sessions.get(&id) {
                Some(track) => match listing.get(&track.path) {
                    None => Decision::Vanished,
                    Some(&(size, mtime)) if size != track.size || mtime != track.mtime => {
                        let kind = if size > track.size {
                            ChangeKind::MessageAdded
                        } else {
                            ChangeKind::Updated
                        };
                        Decision::Changed(kind, size, mtime)
                    }
                    Some(_) if now.duration_since(track.last_activity) >= freeze_after => {
                        Decision::Freeze
                    }
                    Some(_) => Decision::Unchanged,
                },
                None => Decision::Unchanged,
            };

            match decision {
                Decision::Vanished => {
                    if let Some(track) = self.sessions.get_mut(&id) {
                        track.tier = Tier::Frozen;
                        tracing::debug!(session = %id, "Session frozen, file disappeared");
                    }
                }
                Decision::Changed(kind, size, mtime) => {
                    if let Some(track) = self.sessions.get_mut(&id) {
                        track.size = size;
                        track.mtime = mtime;
                    }
                    outcome.membership_changed |= self.make_hot(&id, now);
                    outcome.events.push((id, kind));
                }
                Decision::Freeze => {
                    if let Some(track) = self.sessions.get_mut(&id) {
                        track.tier = Tier::Frozen;
                        tracing::debug!(session = %id, "Session frozen after idling");
                    }
                }
                Decision::Unchanged => {}
            }
        }

        outcome
    }

    /// Directories that must hold filesystem watches for the hot set.
    #[must_use]
    pub fn hot_dirs(&self) -> HashSet<PathBuf> {
        self.sessions
            .values()
            .filter(|t| t.tier == Tier::Hot)
            .filter_map(|t| t.path.parent().map(Path::to_path_buf))
            .collect()
    }

    /// Directories the cold poll must list.
    #[must_use]
    pub fn cold_dirs(&self) -> HashSet<PathBuf> {
        self.sessions
            .values()
            .filter(|t| t.tier == Tier::Cold)
            .filter_map(|t| t.path.parent().map(Path::to_path_buf))
            .collect()
    }

    #[must_use]
    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.sessions.get(id).map(|t| t.tier)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SessionTrack> {
        self.sessions.get(id)
    }

    #[must_use]
    pub fn hot_count(&self) -> usize {
        self.sessions.values().filter(|t| t.tier == Tier::Hot).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn insert_track(
        &mut self,
        id: &str,
        path: &Path,
        size: u64,
        mtime: SystemTime,
        last_activity: Instant,
        tier: Tier,
    ) {
        self.sessions.insert(
            id.to_string(),
            SessionTrack {
                id: id.to_string(),
                path: path.to_path_buf(),
                size,
                mtime,
                last_activity,
                tier,
            },
        );
        self.by_path.insert(path.to_path_buf(), id.to_string());
    }

    /// Move a session into the hot set, enforcing the target size.
    fn make_hot(&mut self, id: &str, now: Instant) -> bool {
        let Some(track) = self.sessions.get_mut(id) else {
            return false;
        };
        track.last_activity = now;
        if track.tier == Tier::Hot {
            return false;
        }
        track.tier = Tier::Hot;
        while self.hot_count() > self.hot_target {
            if !self.demote_least_recent() {
                break;
            }
        }
        // The promotion may have been undone by a zero target.
        self.tier_of(id) == Some(Tier::Hot)
    }

    fn demote_least_recent(&mut self) -> bool {
        let Some(id) = self
            .sessions
            .values()
            .filter(|t| t.tier == Tier::Hot)
            .min_by_key(|t| (t.last_activity, t.id.clone()))
            .map(|t| t.id.clone())
        else {
            return false;
        };
        if let Some(track) = self.sessions.get_mut(&id) {
            track.tier = Tier::Cold;
            tracing::debug!(session = %id, "Session demoted to cold tier");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mtime(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn registry_with(n: usize, target: usize, now: Instant) -> WatchRegistry {
        let mut registry = WatchRegistry::new(target);
        for i in 0..n {
            registry.register(
                &format!("s{i}"),
                Path::new(&format!("/proj/s{i}.jsonl")),
                100,
                mtime(1),
                Duration::ZERO,
                now,
            );
        }
        registry
    }

    #[test]
    fn test_register_is_cold_and_idempotent() {
        let now = Instant::now();
        let mut registry = WatchRegistry::new(4);
        assert!(registry.register(
            "s1",
            Path::new("/proj/s1.jsonl"),
            10,
            mtime(1),
            Duration::ZERO,
            now
        ));
        assert!(!registry.register(
            "s1",
            Path::new("/proj/s1.jsonl"),
            10,
            mtime(1),
            Duration::ZERO,
            now
        ));
        assert_eq!(registry.tier_of("s1"), Some(Tier::Cold));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_observe_new_path_is_created_and_hot() {
        let now = Instant::now();
        let mut registry = WatchRegistry::new(4);
        let outcome = registry.observe("s1", Path::new("/proj/s1.jsonl"), 10, mtime(1), now);
        assert_eq!(outcome.kind, Some(ChangeKind::Created));
        assert!(outcome.membership_changed);
        assert_eq!(registry.tier_of("s1"), Some(Tier::Hot));
    }

    #[test]
    fn test_observe_growth_is_message_added() {
        let now = Instant::now();
        let mut registry = registry_with(1, 4, now);
        let outcome = registry.observe("s0", Path::new("/proj/s0.jsonl"), 250, mtime(2), now);
        assert_eq!(outcome.kind, Some(ChangeKind::MessageAdded));
        assert_eq!(registry.tier_of("s0"), Some(Tier::Hot));
    }

    #[test]
    fn test_observe_same_size_rewrite_is_updated() {
        let now = Instant::now();
        let mut registry = registry_with(1, 4, now);
        let outcome = registry.observe("s0", Path::new("/proj/s0.jsonl"), 100, mtime(9), now);
        assert_eq!(outcome.kind, Some(ChangeKind::Updated));
    }

    #[test]
    fn test_observe_unchanged_is_silent() {
        let now = Instant::now();
        let mut registry = registry_with(1, 4, now);
        let outcome = registry.observe("s0", Path::new("/proj/s0.jsonl"), 100, mtime(1), now);
        assert_eq!(outcome.kind, None);
        assert_eq!(registry.tier_of("s0"), Some(Tier::Cold));
    }

    #[test]
    fn test_hot_set_is_bounded_with_lru_demotion() {
        let base = Instant::now();
        let mut registry = registry_with(6, 3, base);

        for (i, id) in ["s0", "s1", "s2", "s3", "s4", "s5"].iter().enumerate() {
            registry.promote(id, base + Duration::from_secs(i as u64 + 1));
        }

        assert_eq!(registry.hot_count(), 3);
        // The three most recently promoted are hot, the rest were demoted.
        assert_eq!(registry.tier_of("s3"), Some(Tier::Hot));
        assert_eq!(registry.tier_of("s4"), Some(Tier::Hot));
        assert_eq!(registry.tier_of("s5"), Some(Tier::Hot));
        assert_eq!(registry.tier_of("s0"), Some(Tier::Cold));
    }

    #[test]
    fn test_shrinking_hot_target_demotes_excess() {
        let base = Instant::now();
        let mut registry = registry_with(4, 4, base);
        for (i, id) in ["s0", "s1", "s2", "s3"].iter().enumerate() {
            registry.promote(id, base + Duration::from_secs(i as u64 + 1));
        }
        assert_eq!(registry.hot_count(), 4);

        assert!(registry.set_hot_target(2));
        assert_eq!(registry.hot_count(), 2);
        assert_eq!(registry.tier_of("s2"), Some(Tier::Hot));
        assert_eq!(registry.tier_of("s3"), Some(Tier::Hot));
    }

    #[test]
    fn test_zero_hot_target_keeps_everything_cold() {
        let now = Instant::now();
        let mut registry = registry_with(2, 0, now);
        assert!(!registry.promote("s0", now));
        assert_eq!(registry.hot_count(), 0);
        assert_eq!(registry.tier_of("s0"), Some(Tier::Cold));
    }

    #[test]
    fn test_demote_idle_hot_sessions() {
        let base = Instant::now();
        let mut registry = registry_with(2, 4, base);
        registry.promote("s0", base);
        registry.promote("s1", base + Duration::from_secs(100));

        let demoted = registry.demote_idle(base + Duration::from_secs(130), Duration::from_secs(60));
        assert_eq!(demoted, vec!["s0".to_string()]);
        assert_eq!(registry.tier_of("s0"), Some(Tier::Cold));
        assert_eq!(registry.tier_of("s1"), Some(Tier::Hot));
    }

    #[test]
    fn test_touch_unfreezes_without_promoting() {
        let now = Instant::now();
        let mut registry = registry_with(1, 4, now);
        registry.freeze_missing(Path::new("/proj/s0.jsonl"));
        assert_eq!(registry.tier_of("s0"), Some(Tier::Frozen));

        assert!(registry.touch("s0", now));
        assert_eq!(registry.tier_of("s0"), Some(Tier::Cold));
    }

    #[test]
    fn test_touch_unknown_session_is_noop() {
        let mut registry = WatchRegistry::new(4);
        assert!(!registry.touch("ghost", Instant::now()));
    }

    #[test]
    fn test_old_registered_session_freezes_on_first_sweep() {
        let now = Instant::now();
        let mut registry = WatchRegistry::new(4);
        registry.register(
            "old",
            Path::new("/proj/old.jsonl"),
            100,
            mtime(1),
            Duration::from_secs(48 * 3600),
            now,
        );

        let mut listing = HashMap::new();
        listing.insert(PathBuf::from("/proj/old.jsonl"), (100, mtime(1)));
        let outcome = registry.apply_listing(
            Path::new("/proj"),
            &listing,
            now,
            Duration::from_secs(24 * 3600),
            &|_| None,
        );
        assert!(outcome.events.is_empty());
        assert_eq!(registry.tier_of("old"), Some(Tier::Frozen));
    }

    #[test]
    fn test_apply_listing_detects_new_changed_and_vanished() {
        let now = Instant::now();
        let mut registry = registry_with(2, 4, now);

        let mut listing = HashMap::new();
        // s0 grew, s1 vanished, fresh.jsonl is new.
        listing.insert(PathBuf::from("/proj/s0.jsonl"), (400, mtime(5)));
        listing.insert(PathBuf::from("/proj/fresh.jsonl"), (10, mtime(5)));

        let id_for = |path: &Path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(ToString::to_string)
        };
        let outcome = registry.apply_listing(
            Path::new("/proj"),
            &listing,
            now,
            Duration::from_secs(24 * 3600),
            &id_for,
        );

        assert!(outcome.membership_changed);
        assert!(outcome
            .events
            .contains(&("fresh".to_string(), ChangeKind::Created)));
        assert!(outcome
            .events
            .contains(&("s0".to_string(), ChangeKind::MessageAdded)));
        assert_eq!(registry.tier_of("s1"), Some(Tier::Frozen));
        assert_eq!(registry.tier_of("s0"), Some(Tier::Hot));
        assert_eq!(registry.tier_of("fresh"), Some(Tier::Hot));
    }

    #[test]
    fn test_apply_listing_skips_hot_sessions() {
        let now = Instant::now();
        let mut registry = registry_with(1, 4, now);
        registry.promote("s0", now);

        // The hot session's file changed, but the poll must leave it to the
        // filesystem watch.
        let mut listing = HashMap::new();
        listing.insert(PathBuf::from("/proj/s0.jsonl"), (999, mtime(9)));
        let outcome = registry.apply_listing(
            Path::new("/proj"),
            &listing,
            now,
            Duration::from_secs(24 * 3600),
            &|_| None,
        );
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_event_on_frozen_session_revives_it() {
        let now = Instant::now();
        let mut registry = registry_with(1, 4, now);
        registry.freeze_missing(Path::new("/proj/s0.jsonl"));

        let outcome = registry.observe("s0", Path::new("/proj/s0.jsonl"), 300, mtime(3), now);
        assert_eq!(outcome.kind, Some(ChangeKind::MessageAdded));
        assert_eq!(registry.tier_of("s0"), Some(Tier::Hot));
    }

    #[test]
    fn test_hot_and_cold_dirs() {
        let now = Instant::now();
        let mut registry = WatchRegistry::new(4);
        registry.register(
            "a",
            Path::new("/proj/x/a.jsonl"),
            1,
            mtime(1),
            Duration::ZERO,
            now,
        );
        registry.register(
            "b",
            Path::new("/proj/y/b.jsonl"),
            1,
            mtime(1),
            Duration::ZERO,
            now,
        );
        registry.promote("a", now);

        assert!(registry.hot_dirs().contains(Path::new("/proj/x")));
        assert!(!registry.hot_dirs().contains(Path::new("/proj/y")));
        assert!(registry.cold_dirs().contains(Path::new("/proj/y")));
    }
}

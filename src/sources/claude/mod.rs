//! Claude Code session source.
//!
//! Sessions live under `~/.claude/projects/<munged-project-path>/`, one
//! `<uuid>.jsonl` per session, where the munged name is the absolute project
//! path with `/` replaced by `-`. Worktrees and nested checkouts get their
//! own sibling directories sharing the project prefix.

mod parser;
mod records;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{refresh, SessionCache, ValidationStamp};
use crate::config::EngineConfig;
use crate::model::{
    sort_recent_first, Message, SessionCategory, SessionSummary, SizeClass, SourceKind, UsageStats,
};
use crate::sources::claude::parser::{
    parse_messages_full, parse_messages_incremental, parse_metadata_full,
    parse_metadata_incremental, CachedMetadata,
};
use crate::sources::{MessageLog, SourceAdapter, SourceError, WatchScope};
use crate::watcher::{ChangeEvent, TieredWatcher};

pub struct ClaudeCodeAdapter {
    projects_dir: PathBuf,
    config: EngineConfig,
    metadata_cache: SessionCache<CachedMetadata>,
    message_cache: SessionCache<MessageLog>,
}

impl ClaudeCodeAdapter {
    pub fn new(config: &EngineConfig) -> Result<Self, SourceError> {
        let home = dirs::home_dir().ok_or(SourceError::HomeDirUnavailable)?;
        Ok(Self::with_root(
            home.join(".claude").join("projects"),
            config,
        ))
    }

    /// Build against an explicit projects directory instead of the home
    /// layout.
    #[must_use]
    pub fn with_root(projects_dir: PathBuf, config: &EngineConfig) -> Self {
        Self {
            projects_dir,
            config: config.clone(),
            metadata_cache: SessionCache::new(config.cache.max_entries),
            message_cache: SessionCache::new(config.cache.max_entries),
        }
    }

    fn collect_dir_sessions(&self, dir: &Path, out: &mut Vec<SessionSummary>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Project directory not readable");
                return;
            }
        };

        let mut live = HashSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(id) = session_file_id(&path) else {
                continue;
            };
            live.insert(path.clone());
            match self.load_summary(&path, &id) {
                Ok(summary) => {
                    // Sessions with no conversation at all (and no compaction
                    // summary to stand in for one) are noise in a listing.
                    if summary.metadata.message_count > 0
                        || summary.metadata.category == SessionCategory::Compacted
                    {
                        out.push(summary);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session");
                }
            }
        }

        self.metadata_cache.prune_under(dir, &live);
        self.message_cache.prune_under(dir, &live);
    }

    fn load_metadata(
        &self,
        path: &Path,
        session_id: &str,
    ) -> Result<(CachedMetadata, ValidationStamp), SourceError> {
        let stamp = ValidationStamp::for_path(path).map_err(|e| SourceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let max_line = self.config.limits.max_line_bytes;
        let cached = refresh(
            &self.metadata_cache,
            path,
            stamp,
            |p| parse_metadata_full(p, session_id, max_line),
            |p, prev, offset| parse_metadata_incremental(p, prev, offset, max_line),
        )?;
        Ok((cached, stamp))
    }

    fn load_summary(&self, path: &Path, session_id: &str) -> Result<SessionSummary, SourceError> {
        let (cached, stamp) = self.load_metadata(path, session_id)?;
        Ok(SessionSummary {
            metadata: cached.meta,
            file_size: stamp.size,
            modified: stamp.mtime,
            size_class: SizeClass::classify(
                stamp.size,
                self.config.limits.large_file_bytes,
                self.config.limits.huge_file_bytes,
            ),
        })
    }

    fn load_messages(&self, path: &Path) -> Result<MessageLog, SourceError> {
        let stamp = ValidationStamp::for_path(path).map_err(|e| SourceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let max_line = self.config.limits.max_line_bytes;
        refresh(
            &self.message_cache,
            path,
            stamp,
            |p| parse_messages_full(p, max_line),
            |p, prev, offset| parse_messages_incremental(p, prev, offset, max_line),
        )
    }

    /// Locate a session file by id across every project directory.
    fn session_path(&self, session_id: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.projects_dir).ok()?;
        for entry in entries.flatten() {
            let candidate = entry.path().join(format!("{session_id}.jsonl"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn watch_roots(&self, project_root: &Path) -> Vec<PathBuf> {
        let mut roots = vec![self.projects_dir.join(project_dir_name(project_root))];
        roots.extend(self.related_project_dirs(project_root));
        roots
    }
}

impl SourceAdapter for ClaudeCodeAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::ClaudeCode
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<SessionSummary>, SourceError> {
        let mut summaries = Vec::new();
        for dir in self.watch_roots(project_root) {
            self.collect_dir_sessions(&dir, &mut summaries);
        }
        sort_recent_first(&mut summaries);
        Ok(summaries)
    }

    fn messages(&self, session_id: &str) -> Result<Vec<Message>, SourceError> {
        let path = self
            .session_path(session_id)
            .ok_or_else(|| SourceError::SessionNotFound(session_id.to_string()))?;
        Ok(self.load_messages(&path)?.messages)
    }

    fn usage(&self, session_id: &str) -> Result<UsageStats, SourceError> {
        let path = self
            .session_path(session_id)
            .ok_or_else(|| SourceError::SessionNotFound(session_id.to_string()))?;
        let messages = self.load_messages(&path)?.messages;
        // Token totals come from the metadata pass so usage attached to
        // records that never become messages still counts.
        let (cached, _) = self.load_metadata(&path, session_id)?;
        Ok(UsageStats::from_messages(&messages).with_totals(cached.meta.usage, cached.acc.per_model))
    }

    fn session_by_id(&self, session_id: &str) -> Result<Option<SessionSummary>, SourceError> {
        let Some(path) = self.session_path(session_id) else {
            return Ok(None);
        };
        self.load_summary(&path, session_id).map(Some)
    }

    fn related_project_dirs(&self, project_root: &Path) -> Vec<PathBuf> {
        let prefix = format!("{}-", project_dir_name(project_root));
        let Ok(entries) = fs::read_dir(&self.projects_dir) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        dirs
    }

    fn watch(
        &self,
        project_root: &Path,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<TieredWatcher, SourceError> {
        let watcher = TieredWatcher::spawn(
            SourceKind::ClaudeCode,
            self.watch_roots(project_root),
            false,
            Arc::new(|path: &Path| session_file_id(path)),
            &self.config.watcher,
            events,
        )?;
        Ok(watcher)
    }

    fn watch_scope(&self) -> WatchScope {
        WatchScope::PerProject
    }
}

/// Project directory name for an absolute project path.
fn project_dir_name(project_root: &Path) -> String {
    project_root.display().to_string().replace('/', "-")
}

/// Session id for a path that looks like a session file, `None` otherwise.
/// Claude Code names session files `<uuid>.jsonl`.
fn session_file_id(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    Uuid::parse_str(stem).ok()?;
    Some(stem.to_string())
}

//! Gemini CLI session source.
//!
//! Chats live under `~/.gemini/tmp/<project-hash>/chats/session-*.json`,
//! where the hash is the lowercase hex SHA-256 of the absolute project
//! path. Files are rewritten in place, so every observed change costs one
//! full parse; the caches only spare the unchanged case.

mod parser;
mod records;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{refresh, SessionCache, ValidationStamp};
use crate::config::EngineConfig;
use crate::model::{sort_recent_first, Message, SessionSummary, SizeClass, SourceKind, UsageStats};
use crate::sources::gemini::parser::{parse_messages, parse_metadata, CachedMetadata};
use crate::sources::{MessageLog, SourceAdapter, SourceError, WatchScope};
use crate::watcher::{ChangeEvent, TieredWatcher};

pub struct GeminiAdapter {
    tmp_dir: PathBuf,
    config: EngineConfig,
    metadata_cache: SessionCache<CachedMetadata>,
    message_cache: SessionCache<MessageLog>,
}

impl GeminiAdapter {
    pub fn new(config: &EngineConfig) -> Result<Self, SourceError> {
        let home = dirs::home_dir().ok_or(SourceError::HomeDirUnavailable)?;
        Ok(Self::with_root(home.join(".gemini").join("tmp"), config))
    }

    /// Build against an explicit tmp directory instead of the home layout.
    #[must_use]
    pub fn with_root(tmp_dir: PathBuf, config: &EngineConfig) -> Self {
        Self {
            tmp_dir,
            config: config.clone(),
            metadata_cache: SessionCache::new(config.cache.max_entries),
            message_cache: SessionCache::new(config.cache.max_entries),
        }
    }

    fn chats_dir(&self, project_root: &Path) -> PathBuf {
        self.tmp_dir.join(project_hash(project_root)).join("chats")
    }

    fn session_path(&self, session_id: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.tmp_dir).ok()?;
        for entry in entries.flatten() {
            let candidate = entry
                .path()
                .join("chats")
                .join(format!("{session_id}.json"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
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
        // Offset stays 0, so the resume path never fires and staleness
        // always means a full reparse.
        let cached = refresh(
            &self.metadata_cache,
            path,
            stamp,
            |p| parse_metadata(p, session_id),
            |p, _prev, _offset| parse_metadata(p, session_id),
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
        refresh(
            &self.message_cache,
            path,
            stamp,
            parse_messages,
            |p, _prev, _offset| parse_messages(p),
        )
    }
}

impl SourceAdapter for GeminiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Gemini
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<SessionSummary>, SourceError> {
        let dir = self.chats_dir(project_root);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Chats directory not readable");
                return Ok(Vec::new());
            }
        };

        let mut live = HashSet::new();
        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(id) = session_file_id(&path) else {
                continue;
            };
            live.insert(path.clone());
            match self.load_summary(&path, &id) {
                Ok(summary) => {
                    if summary.metadata.message_count > 0 {
                        summaries.push(summary);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session");
                }
            }
        }

        self.metadata_cache.prune_under(&dir, &live);
        self.message_cache.prune_under(&dir, &live);

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
        let (cached, _) = self.load_metadata(&path, session_id)?;
        Ok(UsageStats::from_messages(&messages).with_totals(cached.meta.usage, cached.per_model))
    }

    fn session_by_id(&self, session_id: &str) -> Result<Option<SessionSummary>, SourceError> {
        let Some(path) = self.session_path(session_id) else {
            return Ok(None);
        };
        self.load_summary(&path, session_id).map(Some)
    }

    fn watch(
        &self,
        project_root: &Path,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<TieredWatcher, SourceError> {
        let watcher = TieredWatcher::spawn(
            SourceKind::Gemini,
            vec![self.chats_dir(project_root)],
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

/// Lowercase hex SHA-256 of the project path, as Gemini names its per
/// project directories.
fn project_hash(project_root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_root.display().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Session id for a chat file path, `None` for anything else.
fn session_file_id(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if !stem.starts_with("session-") {
        return None;
    }
    Some(stem.to_string())
}

//! Codex CLI session source.
//!
//! Rollout files live in one date-partitioned tree,
//! `~/.codex/sessions/YYYY/MM/DD/rollout-<timestamp>-<uuid>.jsonl`, shared
//! by every project. Project membership comes from the `cwd` recorded in
//! the session, so listing a project means scanning the tree and filtering
//! by recorded working directory; the caches keep that cheap.

mod parser;
mod records;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cache::{refresh, SessionCache, ValidationStamp};
use crate::config::EngineConfig;
use crate::model::{sort_recent_first, Message, SessionSummary, SizeClass, SourceKind, UsageStats};
use crate::sources::codex::parser::{
    parse_messages_full, parse_messages_incremental, parse_metadata_full,
    parse_metadata_incremental, CachedMessages, CachedMetadata,
};
use crate::sources::{SourceAdapter, SourceError, WatchScope};
use crate::watcher::{ChangeEvent, TieredWatcher};

pub struct CodexAdapter {
    sessions_dir: PathBuf,
    config: EngineConfig,
    metadata_cache: SessionCache<CachedMetadata>,
    message_cache: SessionCache<CachedMessages>,
}

impl CodexAdapter {
    pub fn new(config: &EngineConfig) -> Result<Self, SourceError> {
        let home = dirs::home_dir().ok_or(SourceError::HomeDirUnavailable)?;
        Ok(Self::with_root(
            home.join(".codex").join("sessions"),
            config,
        ))
    }

    /// Build against an explicit sessions tree instead of the home layout.
    #[must_use]
    pub fn with_root(sessions_dir: PathBuf, config: &EngineConfig) -> Self {
        Self {
            sessions_dir,
            config: config.clone(),
            metadata_cache: SessionCache::new(config.cache.max_entries),
            message_cache: SessionCache::new(config.cache.max_entries),
        }
    }

    /// Every session file in the tree, with its id.
    fn session_files(&self) -> Vec<(PathBuf, String)> {
        WalkDir::new(&self.sessions_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let path = entry.into_path();
                let id = session_file_id(&path)?;
                Some((path, id))
            })
            .collect()
    }

    fn session_path(&self, session_id: &str) -> Option<PathBuf> {
        self.session_files()
            .into_iter()
            .find(|(_, id)| id == session_id)
            .map(|(path, _)| path)
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

    fn load_messages(&self, path: &Path) -> Result<CachedMessages, SourceError> {
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
}

impl SourceAdapter for CodexAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Codex
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<SessionSummary>, SourceError> {
        if !self.sessions_dir.is_dir() {
            debug!(path = %self.sessions_dir.display(), "Sessions tree not present");
            return Ok(Vec::new());
        }

        let files = self.session_files();
        let live: HashSet<PathBuf> = files.iter().map(|(path, _)| path.clone()).collect();

        let mut summaries = Vec::new();
        for (path, id) in files {
            match self.load_summary(&path, &id) {
                Ok(summary) => {
                    let in_project = summary
                        .metadata
                        .working_dir
                        .as_deref()
                        .is_some_and(|wd| wd.starts_with(project_root));
                    if in_project && summary.metadata.message_count > 0 {
                        summaries.push(summary);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session");
                }
            }
        }

        self.metadata_cache.prune_under(&self.sessions_dir, &live);
        self.message_cache.prune_under(&self.sessions_dir, &live);

        sort_recent_first(&mut summaries);
        Ok(summaries)
    }

    fn messages(&self, session_id: &str) -> Result<Vec<Message>, SourceError> {
        let path = self
            .session_path(session_id)
            .ok_or_else(|| SourceError::SessionNotFound(session_id.to_string()))?;
        Ok(self.load_messages(&path)?.log.messages)
    }

    fn usage(&self, session_id: &str) -> Result<UsageStats, SourceError> {
        let path = self
            .session_path(session_id)
            .ok_or_else(|| SourceError::SessionNotFound(session_id.to_string()))?;
        let messages = self.load_messages(&path)?.log.messages;
        let (cached, _) = self.load_metadata(&path, session_id)?;
        let per_model = cached.per_model();
        Ok(UsageStats::from_messages(&messages).with_totals(cached.meta.usage, per_model))
    }

    fn session_by_id(&self, session_id: &str) -> Result<Option<SessionSummary>, SourceError> {
        let Some(path) = self.session_path(session_id) else {
            return Ok(None);
        };
        self.load_summary(&path, session_id).map(Some)
    }

    fn watch(
        &self,
        _project_root: &Path,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<TieredWatcher, SourceError> {
        let watcher = TieredWatcher::spawn(
            SourceKind::Codex,
            vec![self.sessions_dir.clone()],
            true,
            Arc::new(|path: &Path| session_file_id(path)),
            &self.config.watcher,
            events,
        )?;
        Ok(watcher)
    }

    fn watch_scope(&self) -> WatchScope {
        WatchScope::Global
    }
}

/// Session id for a rollout file name, `None` for anything else. The id is
/// the trailing UUID of `rollout-<timestamp>-<uuid>.jsonl` and matches the
/// id recorded in the file's `session_meta` line.
fn session_file_id(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let rest = stem.strip_prefix("rollout-")?;
    if rest.len() < 36 || !rest.is_char_boundary(rest.len() - 36) {
        return None;
    }
    let id = &rest[rest.len() - 36..];
    Uuid::parse_str(id).ok()?;
    Some(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    const SESSION_A: &str = "0195bc81-aaaa-7bbb-8ccc-123456789abc";
    const SESSION_B: &str = "0195bc82-bbbb-7ccc-8ddd-23456789abcd";

    fn rollout_lines(cwd: &str, text: &str) -> Vec<String> {
        vec![
            format!(
                r#"{{"timestamp":"2026-02-03T09:00:00.000Z","type":"session_meta","payload":{{"id":"x","timestamp":"2026-02-03T09:00:00.000Z","cwd":"{cwd}","cli_version":"0.43.0"}}}}"#
            ),
            format!(
                r#"{{"timestamp":"2026-02-03T09:00:01.000Z","type":"turn_context","payload":{{"cwd":"{cwd}","model":"gpt-5-codex"}}}}"#
            ),
            format!(
                r#"{{"timestamp":"2026-02-03T09:00:02.000Z","type":"response_item","payload":{{"type":"message","id":"m1","role":"user","content":[{{"type":"input_text","text":"{text}"}}]}}}}"#
            ),
            r#"{"timestamp":"2026-02-03T09:00:05.000Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1200,"cached_input_tokens":1000,"output_tokens":300,"reasoning_output_tokens":0,"total_tokens":1500}}}}"#
                .to_string(),
        ]
    }

    fn write_rollout(root: &Path, day: &str, id: &str, lines: &[String]) -> PathBuf {
        let dir = root.join(day);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("rollout-2026-02-03T09-00-00-{id}.jsonl"));
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    fn test_config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_session_file_id_extraction() {
        let path = Path::new(
            "/x/2026/02/03/rollout-2026-02-03T09-00-00-0195bc81-aaaa-7bbb-8ccc-123456789abc.jsonl",
        );
        assert_eq!(session_file_id(path).as_deref(), Some(SESSION_A));
        assert!(session_file_id(Path::new("/x/rollout-bad.jsonl")).is_none());
        assert!(session_file_id(Path::new("/x/notes.jsonl")).is_none());
        assert!(session_file_id(Path::new(&format!("/x/{SESSION_A}.jsonl"))).is_none());
    }

    #[test]
    fn test_sessions_filters_by_recorded_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        write_rollout(
            tmp.path(),
            "2026/02/03",
            SESSION_A,
            &rollout_lines("/work/app", "in project"),
        );
        write_rollout(
            tmp.path(),
            "2026/02/04",
            SESSION_B,
            &rollout_lines("/elsewhere", "other project"),
        );

        let adapter = CodexAdapter::with_root(tmp.path().to_path_buf(), &test_config());
        let sessions = adapter.sessions(Path::new("/work/app")).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].metadata.session_id, SESSION_A);
        assert_eq!(sessions[0].metadata.usage.input, 200);
    }

    #[test]
    fn test_subdirectory_cwd_counts_as_in_project() {
        let tmp = tempfile::tempdir().unwrap();
        write_rollout(
            tmp.path(),
            "2026/02/03",
            SESSION_A,
            &rollout_lines("/work/app/crates/core", "nested"),
        );

        let adapter = CodexAdapter::with_root(tmp.path().to_path_buf(), &test_config());
        let sessions = adapter.sessions(Path::new("/work/app")).unwrap();
        assert_eq!(sessions.len(), 1);

        let all = adapter.sessions(Path::new("/")).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_messages_and_usage_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        write_rollout(
            tmp.path(),
            "2026/02/03",
            SESSION_A,
            &rollout_lines("/work/app", "hello"),
        );

        let adapter = CodexAdapter::with_root(tmp.path().to_path_buf(), &test_config());
        let messages = adapter.messages(SESSION_A).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello");

        let usage = adapter.usage(SESSION_A).unwrap();
        assert_eq!(usage.tokens.input, 200);
        assert_eq!(usage.tokens.cache_read, 1000);
        assert!(usage.per_model.contains_key("gpt-5-codex"));

        assert!(matches!(
            adapter.messages(SESSION_B).unwrap_err(),
            SourceError::SessionNotFound(_)
        ));
    }

    #[test]
    fn test_session_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        write_rollout(
            tmp.path(),
            "2026/02/03",
            SESSION_A,
            &rollout_lines("/work/app", "hi"),
        );

        let adapter = CodexAdapter::with_root(tmp.path().to_path_buf(), &test_config());
        let summary = adapter.session_by_id(SESSION_A).unwrap().unwrap();
        assert_eq!(summary.metadata.session_id, SESSION_A);
        assert!(adapter.session_by_id(SESSION_B).unwrap().is_none());
    }

    #[test]
    fn test_missing_tree_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter =
            CodexAdapter::with_root(tmp.path().join("never-created"), &test_config());
        assert!(adapter.sessions(Path::new("/work/app")).unwrap().is_empty());
    }
}

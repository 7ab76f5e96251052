//! Session-log sources: discovery, incremental parsing, and watching for
//! each supported external tool.
//!
//! Every source implements [`SourceAdapter`] over the same machinery: a
//! byte-offset line reader, full/resumed parse pairs that share one scan
//! loop, and bounded caches validated by file size and mtime. The adapter
//! owns its caches; callers hold one adapter per source for a process.

pub mod claude;
pub mod codex;
mod error;
pub mod gemini;
pub mod reader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::model::{Message, SessionSummary, SourceKind, UsageStats};
use crate::watcher::{ChangeEvent, TieredWatcher};

pub use claude::ClaudeCodeAdapter;
pub use codex::CodexAdapter;
pub use error::{ReadError, SourceError};
pub use gemini::GeminiAdapter;

/// How a source's sessions map onto filesystem watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchScope {
    /// Sessions live in per-project directories; each project gets its own
    /// watcher.
    PerProject,
    /// Sessions live in one shared tree; a single watcher serves every
    /// project and must not be duplicated per project.
    Global,
}

/// Uniform access to one external tool's session logs.
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Session summaries for a project, most recently active first.
    /// Unreadable or empty session files are skipped, not errors.
    fn sessions(&self, project_root: &Path) -> Result<Vec<SessionSummary>, SourceError>;

    /// The normalized conversation of a session.
    fn messages(&self, session_id: &str) -> Result<Vec<Message>, SourceError>;

    /// Aggregate token usage and cost for a session.
    fn usage(&self, session_id: &str) -> Result<UsageStats, SourceError>;

    /// Start a watcher covering the sessions relevant to a project.
    fn watch(
        &self,
        project_root: &Path,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<TieredWatcher, SourceError>;

    /// Summary for one session without enumerating a whole project.
    fn session_by_id(&self, _session_id: &str) -> Result<Option<SessionSummary>, SourceError> {
        Ok(None)
    }

    /// Additional directories whose sessions belong to the same project
    /// (worktrees, nested checkouts).
    fn related_project_dirs(&self, _project_root: &Path) -> Vec<PathBuf> {
        Vec::new()
    }

    fn watch_scope(&self) -> WatchScope {
        WatchScope::PerProject
    }
}

/// One adapter per supported source.
pub fn all_adapters(config: &EngineConfig) -> Result<Vec<Box<dyn SourceAdapter>>, SourceError> {
    Ok(vec![
        Box::new(ClaudeCodeAdapter::new(config)?),
        Box::new(CodexAdapter::new(config)?),
        Box::new(GeminiAdapter::new(config)?),
    ])
}

pub fn adapter_for(
    kind: SourceKind,
    config: &EngineConfig,
) -> Result<Box<dyn SourceAdapter>, SourceError> {
    Ok(match kind {
        SourceKind::ClaudeCode => Box::new(ClaudeCodeAdapter::new(config)?),
        SourceKind::Codex => Box::new(CodexAdapter::new(config)?),
        SourceKind::Gemini => Box::new(GeminiAdapter::new(config)?),
    })
}

/// Parse an RFC 3339 timestamp the way the tools write them.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Position of a pending tool call inside a message list.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallRef {
    pub message_idx: usize,
    pub call_idx: usize,
}

/// Normalized messages plus the linking state a resumed scan needs to
/// attach late tool results to calls parsed in an earlier pass.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    pub messages: Vec<Message>,
    /// Tool calls still awaiting their result, keyed by call id.
    pub pending: HashMap<String, ToolCallRef>,
}

impl MessageLog {
    /// Append a message, registering its unresolved tool calls.
    pub fn push(&mut self, message: Message) {
        let message_idx = self.messages.len();
        for (call_idx, call) in message.tool_calls.iter().enumerate() {
            if call.result.is_none() {
                self.pending.insert(
                    call.call_id.clone(),
                    ToolCallRef {
                        message_idx,
                        call_idx,
                    },
                );
            }
        }
        self.messages.push(message);
    }

    /// Attach a result to the pending call it answers. A call is resolved
    /// at most once; results with no matching call are dropped.
    pub fn resolve(&mut self, call_id: &str, result: String, is_error: bool) {
        let Some(call_ref) = self.pending.remove(call_id) else {
            return;
        };
        if let Some(call) = self
            .messages
            .get_mut(call_ref.message_idx)
            .and_then(|m| m.tool_calls.get_mut(call_ref.call_idx))
        {
            call.result = Some(result);
            call.is_error = is_error;
        }
    }
}

//! Normalized session metadata and list summaries.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::usage::TokenUsage;

/// Which tool a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    ClaudeCode,
    Codex,
    Gemini,
}

impl SourceKind {
    /// Stable identifier used in logs and CLI flags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::ClaudeCode => "claude-code",
            SourceKind::Codex => "codex",
            SourceKind::Gemini => "gemini",
        }
    }

    /// All supported sources.
    #[must_use]
    pub fn all() -> &'static [SourceKind] {
        &[SourceKind::ClaudeCode, SourceKind::Codex, SourceKind::Gemini]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" | "claude" => Ok(SourceKind::ClaudeCode),
            "codex" => Ok(SourceKind::Codex),
            "gemini" => Ok(SourceKind::Gemini),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Rough classification of a session, derived from its records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionCategory {
    /// Regular interactive conversation.
    Interactive,
    /// Spawned as a sidechain/subtask of another session.
    Sidechain,
    /// Only a compaction summary survives.
    Compacted,
    #[default]
    Unknown,
}

/// File-size classification used by list views to gate expensive reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Normal,
    /// Worth a performance warning.
    Large,
    /// Automatic reloads should be disabled.
    Huge,
}

impl SizeClass {
    #[must_use]
    pub fn classify(len: u64, large_bytes: u64, huge_bytes: u64) -> Self {
        if len >= huge_bytes {
            SizeClass::Huge
        } else if len >= large_bytes {
            SizeClass::Large
        } else {
            SizeClass::Normal
        }
    }
}

/// Summary of one session, cheap enough to hold for every file on disk.
///
/// Head fields (`working_dir`, `tool_version`, `git_branch`) are fixed by
/// the first record that carries them; tail fields only grow as later
/// records are folded in, which is what makes incremental parsing sound.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub path: PathBuf,
    pub source: SourceKind,
    pub working_dir: Option<PathBuf>,
    pub tool_version: Option<String>,
    pub git_branch: Option<String>,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub usage: TokenUsage,
    pub primary_model: Option<String>,
    pub estimated_cost: f64,
    /// First plain-text user message, truncated for list display.
    pub first_user_excerpt: Option<String>,
    pub category: SessionCategory,
}

impl SessionMetadata {
    #[must_use]
    pub fn new(session_id: impl Into<String>, path: PathBuf, source: SourceKind) -> Self {
        Self {
            session_id: session_id.into(),
            path,
            source,
            working_dir: None,
            tool_version: None,
            git_branch: None,
            first_timestamp: None,
            last_timestamp: None,
            message_count: 0,
            usage: TokenUsage::default(),
            primary_model: None,
            estimated_cost: 0.0,
            first_user_excerpt: None,
            category: SessionCategory::Unknown,
        }
    }

    /// Fold a record timestamp in: the first one sticks, the last one advances.
    pub fn observe_timestamp(&mut self, ts: DateTime<Utc>) {
        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(ts);
        }
        match self.last_timestamp {
            Some(last) if last >= ts => {}
            _ => self.last_timestamp = Some(ts),
        }
    }
}

/// Maximum length of the first-user-message excerpt, in characters.
pub const EXCERPT_MAX_CHARS: usize = 120;

/// Truncate a message body to a single-line excerpt.
#[must_use]
pub fn excerpt(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut out: String = line.trim().chars().take(EXCERPT_MAX_CHARS).collect();
    if line.trim().chars().count() > EXCERPT_MAX_CHARS {
        out.push('…');
    }
    out
}

/// One row of a session list: metadata plus on-disk facts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub metadata: SessionMetadata,
    pub file_size: u64,
    #[serde(skip)]
    pub modified: SystemTime,
    pub size_class: SizeClass,
}

/// Order summaries most recently active first.
///
/// Sessions with record timestamps sort ahead of those without; file mtime
/// breaks ties so the order is stable for metadata-less files.
pub fn sort_recent_first(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| {
        b.metadata
            .last_timestamp
            .cmp(&a.metadata.last_timestamp)
            .then_with(|| b.modified.cmp(&a.modified))
            .then_with(|| a.metadata.session_id.cmp(&b.metadata.session_id))
    });
}

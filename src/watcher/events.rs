//! Change events emitted by the tiered watcher.

use serde::Serialize;

use crate::model::SourceKind;

/// What happened to a session file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    /// A session file appeared for the first time.
    Created,
    /// The file changed without growing (rewrite, touch).
    Updated,
    /// The file grew, which for append-only logs means new records.
    MessageAdded,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::MessageAdded => "message-added",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change notification for one session.
///
/// Events are addresses, not payloads: consumers re-query through the
/// adapter, which serves the fresh parse from its cache. Anything coalesced
/// away by debouncing is recovered by that query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub source: SourceKind,
    pub session_id: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(source: SourceKind, session_id: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            source,
            session_id: session_id.into(),
            kind,
        }
    }
}

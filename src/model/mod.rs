//! Normalized data model produced by every source adapter.
//!
//! Adapters parse their tool-specific on-disk records into these shared
//! types; everything above the adapters (caches, watcher, CLI) only ever
//! sees this model.

mod message;
mod session;
mod usage;

pub use message::{Message, MessageRole, ToolInvocation};
pub use session::{
    excerpt, sort_recent_first, SessionCategory, SessionMetadata, SessionSummary, SizeClass,
    SourceKind, EXCERPT_MAX_CHARS,
};
pub use usage::{estimate_cost, estimate_cost_tally, primary_model, TokenUsage, UsageStats};

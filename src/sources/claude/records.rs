//! On-disk record model for Claude Code conversation files.
//!
//! One JSON object per line in `~/.claude/projects/<dir>/<uuid>.jsonl`.
//! Every field an older or newer CLI might omit is defaulted, so a record
//! either matches a known shape or falls through to `Unknown`.

use serde::Deserialize;

use crate::model::TokenUsage;

/// A single entry in a Claude Code session file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionRecord {
    /// User message or tool result.
    User(MessageRecord),
    /// Assistant response.
    Assistant(MessageRecord),
    /// Compaction summary.
    Summary(SummaryRecord),
    /// System message.
    System,
    /// Progress update (MCP/hook).
    Progress,
    /// File backup snapshot.
    FileHistorySnapshot,
    /// Queue operation (headless mode).
    QueueOperation,
    /// Unknown entry type (forward compatibility).
    #[serde(other)]
    Unknown,
}

/// Shared shape of user and assistant entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub is_sidechain: bool,
    pub message: ChatMessage,
}

/// The message body of a user or assistant entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub model: Option<String>,
    pub content: MessageContent,
    #[serde(default)]
    pub usage: Option<UsageRecord>,
}

/// Message content - plain text for simple user messages, structured
/// blocks otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flattened text of the content, ignoring non-text blocks.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// True when the content holds nothing but tool results.
    #[must_use]
    pub fn is_tool_result_only(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Blocks(blocks) => {
                !blocks.is_empty()
                    && blocks
                        .iter()
                        .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
            }
        }
    }
}

/// A content block within a message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

/// Token usage attached to assistant messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl UsageRecord {
    #[must_use]
    pub fn to_usage(&self) -> TokenUsage {
        TokenUsage {
            input: self.input_tokens,
            output: self.output_tokens,
            cache_read: self.cache_read_input_tokens,
            cache_creation: self.cache_creation_input_tokens,
        }
    }
}

/// Compaction summary entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub summary: String,
    #[serde(default)]
    pub leaf_uuid: Option<String>,
}

//! Normalized message types shared by every source.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::usage::TokenUsage;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A tool call embedded in an assistant message, linked to its result once
/// the matching output record has been seen.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    /// Source-assigned call id, the linking key across records.
    pub call_id: String,
    pub name: String,
    pub input: serde_json::Value,
    /// Result text, `None` while the call is still awaiting its output.
    pub result: Option<String>,
    pub is_error: bool,
}

impl ToolInvocation {
    #[must_use]
    pub fn pending(call_id: String, name: String, input: serde_json::Value) -> Self {
        Self {
            call_id,
            name,
            input,
            result: None,
            is_error: false,
        }
    }
}

/// One normalized conversation message.
///
/// Raw records that are bookkeeping rather than conversation (snapshots,
/// progress updates, queue operations) never become messages.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Source-assigned id where the format provides one.
    pub id: Option<String>,
    pub role: MessageRole,
    pub timestamp: Option<DateTime<Utc>>,
    /// Model that produced an assistant message.
    pub model: Option<String>,
    /// Flattened text content.
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    /// Per-message token usage where the format reports it.
    pub usage: Option<TokenUsage>,
}

impl Message {
    /// True when the message carries neither text nor tool calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(role: MessageRole, text: &str) -> Message {
        Message {
            id: None,
            role,
            timestamp: None,
            model: None,
            text: text.to_string(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    #[test]
    fn test_message_is_empty() {
        assert!(text_message(MessageRole::User, "  \n").is_empty());
        assert!(!text_message(MessageRole::User, "hello").is_empty());
    }

    #[test]
    fn test_message_with_only_tool_calls_is_not_empty() {
        let mut message = text_message(MessageRole::Assistant, "");
        message.tool_calls.push(ToolInvocation::pending(
            "call-1".to_string(),
            "read_file".to_string(),
            serde_json::json!({"path": "/tmp/a"}),
        ));
        assert!(!message.is_empty());
    }

    #[test]
    fn test_pending_invocation_has_no_result() {
        let invocation = ToolInvocation::pending(
            "call-1".to_string(),
            "bash".to_string(),
            serde_json::Value::Null,
        );
        assert!(invocation.result.is_none());
        assert!(!invocation.is_error);
    }
}

//! On-disk record model for Gemini CLI chat files.
//!
//! One JSON document per session in `~/.gemini/tmp/<project-hash>/chats/`,
//! rewritten whole on every change. `<project-hash>` is the SHA-256 of the
//! absolute project path.

use serde::Deserialize;

use crate::model::TokenUsage;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFile {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub project_hash: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    /// `"user"` or `"gemini"`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens: Option<ChatTokens>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatTokens {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cached: u64,
    #[serde(default)]
    pub thoughts: u64,
    #[serde(default)]
    pub tool: u64,
    #[serde(default)]
    pub total: u64,
}

impl ChatTokens {
    /// Thought tokens are generated output; tool tokens count toward input
    /// since they extend the prompt.
    #[must_use]
    pub fn to_usage(self) -> TokenUsage {
        TokenUsage {
            input: self.input.saturating_add(self.tool),
            output: self.output.saturating_add(self.thoughts),
            cache_read: self.cached,
            cache_creation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_file() {
        let json = r#"{
            "sessionId": "session-1759420000000",
            "projectHash": "ab12",
            "startTime": "2026-02-10T08:00:00.000Z",
            "lastUpdated": "2026-02-10T08:30:00.000Z",
            "messages": [
                {"id": "1", "type": "user", "content": "hello", "timestamp": "2026-02-10T08:00:01.000Z"},
                {"id": "2", "type": "gemini", "content": "hi", "timestamp": "2026-02-10T08:00:05.000Z",
                 "model": "gemini-2.5-pro",
                 "tokens": {"input": 120, "output": 40, "cached": 30, "thoughts": 15, "tool": 5, "total": 210}}
            ]
        }"#;

        let chat: ChatFile = serde_json::from_str(json).unwrap();
        assert_eq!(chat.session_id.as_deref(), Some("session-1759420000000"));
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].kind, "user");

        let usage = chat.messages[1].tokens.unwrap().to_usage();
        assert_eq!(usage.input, 125);
        assert_eq!(usage.output, 55);
        assert_eq!(usage.cache_read, 30);
    }

    #[test]
    fn test_missing_fields_default() {
        let chat: ChatFile = serde_json::from_str(r#"{"messages":[{"type":"user"}]}"#).unwrap();
        assert!(chat.session_id.is_none());
        assert_eq!(chat.messages[0].content, "");
        assert!(chat.messages[0].tokens.is_none());
    }
}

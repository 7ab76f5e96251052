//! On-disk record model for Codex CLI rollout files.
//!
//! One JSON object per line in
//! `~/.codex/sessions/YYYY/MM/DD/rollout-<timestamp>-<uuid>.jsonl`, shaped
//! `{"timestamp": ..., "type": ..., "payload": {...}}`.

use serde::Deserialize;

/// A single rollout line. The envelope tag selects the payload shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RolloutLine {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub item: RolloutItem,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RolloutItem {
    SessionMeta(SessionMetaPayload),
    TurnContext(TurnContextPayload),
    EventMsg(EventMsgPayload),
    ResponseItem(ResponseItemPayload),
    #[serde(other, deserialize_with = "ignore_payload")]
    Unknown,
}

/// Discard the payload of an unrecognized rollout item. With an adjacently
/// tagged enum, `#[serde(other)]` alone accepts only a missing or null
/// `payload`, but unknown item types carry arbitrary payload objects.
fn ignore_payload<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde::de::IgnoredAny::deserialize(deserializer).map(|_| ())
}

/// First line of every rollout file.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionMetaPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub cli_version: Option<String>,
}

/// Per-turn settings; the model can change between turns.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnContextPayload {
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsgPayload {
    TokenCount {
        #[serde(default)]
        info: Option<TokenCountInfo>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenCountInfo {
    #[serde(default)]
    pub total_token_usage: Option<TokenTotals>,
}

/// Cumulative session totals. A later record supersedes earlier ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenTotals {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItemPayload {
    Message {
        #[serde(default)]
        id: Option<String>,
        role: String,
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    Reasoning,
    FunctionCall {
        name: String,
        #[serde(default)]
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput {
        call_id: String,
        #[serde(default)]
        output: CallOutput,
    },
    CustomToolCall {
        name: String,
        #[serde(default)]
        input: String,
        call_id: String,
    },
    CustomToolCallOutput {
        call_id: String,
        #[serde(default)]
        output: CallOutput,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
    #[serde(other)]
    Other,
}

/// Tool output, a bare string in older files and a structured object in
/// newer ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CallOutput {
    Text(String),
    Structured {
        #[serde(default)]
        content: String,
        #[serde(default)]
        success: Option<bool>,
    },
}

impl Default for CallOutput {
    fn default() -> Self {
        CallOutput::Text(String::new())
    }
}

impl CallOutput {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            CallOutput::Text(s) => s,
            CallOutput::Structured { content, .. } => content,
        }
    }

    /// True when the output records an explicit failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CallOutput::Structured {
                success: Some(false),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_meta() {
        let json = r#"{"timestamp":"2026-02-03T09:00:00.000Z","type":"session_meta","payload":{"id":"0195bc81-aaaa-7bbb-8ccc-123456789abc","timestamp":"2026-02-03T09:00:00.000Z","cwd":"/work/app","originator":"codex_cli_rs","cli_version":"0.43.0"}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        let RolloutItem::SessionMeta(meta) = line.item else {
            panic!("Expected session_meta");
        };
        assert_eq!(meta.cwd.as_deref(), Some("/work/app"));
        assert_eq!(meta.cli_version.as_deref(), Some("0.43.0"));
    }

    #[test]
    fn test_parse_token_count_event() {
        let json = r#"{"timestamp":"t","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1200,"cached_input_tokens":1000,"output_tokens":300,"reasoning_output_tokens":120,"total_tokens":1500},"last_token_usage":{"input_tokens":100,"output_tokens":50}},"rate_limits":{}}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        let RolloutItem::EventMsg(EventMsgPayload::TokenCount { info }) = line.item else {
            panic!("Expected token_count");
        };
        let totals = info.unwrap().total_token_usage.unwrap();
        assert_eq!(totals.input_tokens, 1200);
        assert_eq!(totals.cached_input_tokens, 1000);
        assert_eq!(totals.output_tokens, 300);
    }

    #[test]
    fn test_parse_message_and_function_call() {
        let json = r#"{"timestamp":"t","type":"response_item","payload":{"type":"message","id":"m1","role":"user","content":[{"type":"input_text","text":"hello"}]}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        assert!(matches!(
            line.item,
            RolloutItem::ResponseItem(ResponseItemPayload::Message { .. })
        ));

        let json = r#"{"timestamp":"t","type":"response_item","payload":{"type":"function_call","name":"shell","arguments":"{\"command\":[\"ls\"]}","call_id":"call_7"}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        let RolloutItem::ResponseItem(ResponseItemPayload::FunctionCall { name, call_id, .. }) =
            line.item
        else {
            panic!("Expected function_call");
        };
        assert_eq!(name, "shell");
        assert_eq!(call_id, "call_7");
    }

    #[test]
    fn test_call_output_shapes() {
        let json = r#"{"timestamp":"t","type":"response_item","payload":{"type":"function_call_output","call_id":"call_7","output":"file1\nfile2"}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        let RolloutItem::ResponseItem(ResponseItemPayload::FunctionCallOutput { output, .. }) =
            line.item
        else {
            panic!("Expected function_call_output");
        };
        assert_eq!(output.text(), "file1\nfile2");
        assert!(!output.is_failure());

        let json = r#"{"timestamp":"t","type":"response_item","payload":{"type":"function_call_output","call_id":"call_8","output":{"content":"boom","success":false}}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        let RolloutItem::ResponseItem(ResponseItemPayload::FunctionCallOutput { output, .. }) =
            line.item
        else {
            panic!("Expected function_call_output");
        };
        assert_eq!(output.text(), "boom");
        assert!(output.is_failure());
    }

    #[test]
    fn test_unknown_types_are_tolerated() {
        let json = r#"{"timestamp":"t","type":"compacted","payload":{"message":"..."}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        assert!(matches!(line.item, RolloutItem::Unknown));

        let json = r#"{"timestamp":"t","type":"response_item","payload":{"type":"web_search_call","status":"ok"}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        assert!(matches!(
            line.item,
            RolloutItem::ResponseItem(ResponseItemPayload::Other)
        ));

        let json = r#"{"timestamp":"t","type":"event_msg","payload":{"type":"agent_message","message":"hi"}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        assert!(matches!(
            line.item,
            RolloutItem::EventMsg(EventMsgPayload::Other)
        ));
    }

    #[test]
    fn test_reasoning_payload_fields_are_ignored() {
        let json = r#"{"timestamp":"t","type":"response_item","payload":{"type":"reasoning","summary":[{"type":"summary_text","text":"thinking"}],"encrypted_content":"zzz"}}"#;
        let line: RolloutLine = serde_json::from_str(json).unwrap();
        assert!(matches!(
            line.item,
            RolloutItem::ResponseItem(ResponseItemPayload::Reasoning)
        ));
    }
}

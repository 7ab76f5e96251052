//! Incremental scan of Codex rollout files.
//!
//! Token accounting differs from the other sources: `token_count` events
//! carry cumulative session totals, so the accumulator keeps the latest
//! observed totals and a resumed scan replaces rather than adds.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::model::{
    estimate_cost_tally, excerpt, Message, MessageRole, SessionCategory, SessionMetadata,
    SourceKind, TokenUsage, ToolInvocation,
};
use crate::sources::codex::records::{
    ContentPart, EventMsgPayload, ResponseItemPayload, RolloutItem, RolloutLine, TokenTotals,
};
use crate::sources::reader::LineCursor;
use crate::sources::{parse_timestamp, MessageLog, SourceError};

/// Scan state carried between resumed metadata passes.
#[derive(Debug, Clone, Default)]
pub struct MetadataAcc {
    /// Latest cumulative totals; a newer `token_count` supersedes this.
    pub totals: Option<TokenTotals>,
    /// Model from the most recent `turn_context`.
    pub latest_model: Option<String>,
    user_excerpt: Option<String>,
}

/// Cached result of a metadata pass.
#[derive(Debug, Clone)]
pub struct CachedMetadata {
    pub meta: SessionMetadata,
    pub acc: MetadataAcc,
}

impl CachedMetadata {
    /// Token tally keyed by model. Codex reports session-level totals only,
    /// so everything is attributed to the most recent model.
    #[must_use]
    pub fn per_model(&self) -> HashMap<String, TokenUsage> {
        let mut tally = HashMap::new();
        if !self.meta.usage.is_zero() {
            tally.insert(
                self.acc.latest_model.clone().unwrap_or_default(),
                self.meta.usage,
            );
        }
        tally
    }
}

/// Cached result of a message pass. The ambient model comes from
/// `turn_context` records rather than the messages themselves.
#[derive(Debug, Clone, Default)]
pub struct CachedMessages {
    pub log: MessageLog,
    model: Option<String>,
}

pub fn parse_metadata_full(
    path: &Path,
    session_id: &str,
    max_line_bytes: usize,
) -> Result<(CachedMetadata, u64), SourceError> {
    let state = CachedMetadata {
        meta: SessionMetadata::new(session_id, path.to_path_buf(), SourceKind::Codex),
        acc: MetadataAcc::default(),
    };
    scan_metadata(path, state, 0, max_line_bytes)
}

pub fn parse_metadata_incremental(
    path: &Path,
    cached: CachedMetadata,
    offset: u64,
    max_line_bytes: usize,
) -> Result<(CachedMetadata, u64), SourceError> {
    scan_metadata(path, cached, offset, max_line_bytes)
}

pub fn parse_messages_full(
    path: &Path,
    max_line_bytes: usize,
) -> Result<(CachedMessages, u64), SourceError> {
    scan_messages(path, CachedMessages::default(), 0, max_line_bytes)
}

pub fn parse_messages_incremental(
    path: &Path,
    cached: CachedMessages,
    offset: u64,
    max_line_bytes: usize,
) -> Result<(CachedMessages, u64), SourceError> {
    scan_messages(path, cached, offset, max_line_bytes)
}

fn scan_metadata(
    path: &Path,
    mut state: CachedMetadata,
    offset: u64,
    max_line_bytes: usize,
) -> Result<(CachedMetadata, u64), SourceError> {
    let mut cursor = LineCursor::open_at(path, offset, max_line_bytes)?;
    while let Some(line) = cursor.next_line()? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RolloutLine>(line) {
            Ok(record) => apply_metadata_record(&mut state, &record),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping malformed record");
            }
        }
    }
    finalize_metadata(&mut state);
    Ok((state, cursor.offset()))
}

fn apply_metadata_record(state: &mut CachedMetadata, record: &RolloutLine) {
    match &record.item {
        RolloutItem::SessionMeta(meta) => {
            observe_envelope(state, record);
            if state.meta.working_dir.is_none() {
                state.meta.working_dir = meta.cwd.as_deref().map(Into::into);
            }
            if state.meta.tool_version.is_none() {
                state.meta.tool_version = meta.cli_version.clone();
            }
        }
        RolloutItem::TurnContext(ctx) => {
            observe_envelope(state, record);
            if let Some(model) = &ctx.model {
                state.acc.latest_model = Some(model.clone());
            }
            if state.meta.working_dir.is_none() {
                state.meta.working_dir = ctx.cwd.as_deref().map(Into::into);
            }
        }
        RolloutItem::EventMsg(EventMsgPayload::TokenCount { info }) => {
            observe_envelope(state, record);
            if let Some(totals) = info.as_ref().and_then(|i| i.total_token_usage) {
                state.acc.totals = Some(totals);
            }
        }
        RolloutItem::ResponseItem(item) => match item {
            ResponseItemPayload::Message { role, content, .. } => {
                observe_envelope(state, record);
                if let Some(text) = visible_text(content) {
                    state.meta.message_count += 1;
                    if role == "user" && state.acc.user_excerpt.is_none() {
                        state.acc.user_excerpt = Some(excerpt(&text));
                    }
                }
            }
            ResponseItemPayload::FunctionCall { .. } | ResponseItemPayload::CustomToolCall { .. } => {
                observe_envelope(state, record);
                state.meta.message_count += 1;
            }
            ResponseItemPayload::FunctionCallOutput { .. }
            | ResponseItemPayload::CustomToolCallOutput { .. } => {
                observe_envelope(state, record);
            }
            ResponseItemPayload::Reasoning | ResponseItemPayload::Other => {}
        },
        RolloutItem::EventMsg(EventMsgPayload::Other) | RolloutItem::Unknown => {}
    }
}

fn observe_envelope(state: &mut CachedMetadata, record: &RolloutLine) {
    if let Some(ts) = record.timestamp.as_deref().and_then(parse_timestamp) {
        state.meta.observe_timestamp(ts);
    }
}

fn finalize_metadata(state: &mut CachedMetadata) {
    state.meta.usage = state
        .acc
        .totals
        .map(usage_from_totals)
        .unwrap_or_default();
    state.meta.primary_model = state.acc.latest_model.clone();
    state.meta.estimated_cost = estimate_cost_tally(&state.per_model());
    state.meta.first_user_excerpt = state.acc.user_excerpt.clone();
    state.meta.category = if state.meta.message_count > 0 {
        SessionCategory::Interactive
    } else {
        SessionCategory::Unknown
    };
}

/// Map cumulative rollout totals onto the normalized shape. Reported input
/// includes cached reads, which we track separately.
fn usage_from_totals(totals: TokenTotals) -> TokenUsage {
    TokenUsage {
        input: totals.input_tokens.saturating_sub(totals.cached_input_tokens),
        output: totals.output_tokens,
        cache_read: totals.cached_input_tokens,
        cache_creation: 0,
    }
}

fn scan_messages(
    path: &Path,
    mut state: CachedMessages,
    offset: u64,
    max_line_bytes: usize,
) -> Result<(CachedMessages, u64), SourceError> {
    let mut cursor = LineCursor::open_at(path, offset, max_line_bytes)?;
    while let Some(line) = cursor.next_line()? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RolloutLine>(line) {
            Ok(record) => apply_message_record(&mut state, &record),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping malformed record");
            }
        }
    }
    Ok((state, cursor.offset()))
}

fn apply_message_record(state: &mut CachedMessages, record: &RolloutLine) {
    let timestamp = record.timestamp.as_deref().and_then(parse_timestamp);
    match &record.item {
        RolloutItem::TurnContext(ctx) => {
            if let Some(model) = &ctx.model {
                state.model = Some(model.clone());
            }
        }
        RolloutItem::ResponseItem(item) => match item {
            ResponseItemPayload::Message { id, role, content } => {
                let Some(text) = visible_text(content) else {
                    return;
                };
                let (role, model) = match role.as_str() {
                    "user" => (MessageRole::User, None),
                    "assistant" => (MessageRole::Assistant, state.model.clone()),
                    _ => (MessageRole::System, None),
                };
                state.log.push(Message {
                    id: id.clone(),
                    role,
                    timestamp,
                    model,
                    text,
                    tool_calls: Vec::new(),
                    usage: None,
                });
            }
            ResponseItemPayload::FunctionCall {
                name,
                arguments,
                call_id,
            } => {
                state.log.push(tool_call_message(
                    timestamp,
                    state.model.clone(),
                    call_id,
                    name,
                    parse_arguments(arguments),
                ));
            }
            ResponseItemPayload::CustomToolCall {
                name,
                input,
                call_id,
            } => {
                state.log.push(tool_call_message(
                    timestamp,
                    state.model.clone(),
                    call_id,
                    name,
                    serde_json::Value::String(input.clone()),
                ));
            }
            ResponseItemPayload::FunctionCallOutput { call_id, output }
            | ResponseItemPayload::CustomToolCallOutput { call_id, output } => {
                state
                    .log
                    .resolve(call_id, output.text().to_string(), output.is_failure());
            }
            ResponseItemPayload::Reasoning | ResponseItemPayload::Other => {}
        },
        _ => {}
    }
}

fn tool_call_message(
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    model: Option<String>,
    call_id: &str,
    name: &str,
    input: serde_json::Value,
) -> Message {
    Message {
        id: None,
        role: MessageRole::Assistant,
        timestamp,
        model,
        text: String::new(),
        tool_calls: vec![ToolInvocation::pending(
            call_id.to_string(),
            name.to_string(),
            input,
        )],
        usage: None,
    }
}

/// Function-call arguments are serialized JSON; fall back to the raw string
/// when they are not.
fn parse_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Flattened text of a message item. Instruction and environment wrappers
/// (`<user_instructions>`, `<environment_context>`) are session plumbing,
/// not conversation.
fn visible_text(content: &[ContentPart]) -> Option<String> {
    let text = content
        .iter()
        .filter_map(|part| match part {
            ContentPart::InputText { text } | ContentPart::OutputText { text } => {
                Some(text.as_str())
            }
            ContentPart::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() || text.trim_start().starts_with('<') {
        None
    } else {
        Some(text)
    }
}

//! Incremental scan of Claude Code session files.
//!
//! Both passes come in full/resumed pairs that share one scan loop, so a
//! resumed parse over appended lines lands on the same state a fresh parse
//! of the whole file would. Everything derived from the scan (cost, primary
//! model, category) is recomputed from accumulator state after each pass.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::model::{
    estimate_cost_tally, excerpt, primary_model, Message, MessageRole, SessionCategory,
    SessionMetadata, SourceKind, TokenUsage, ToolInvocation,
};
use crate::sources::claude::records::{
    ChatMessage, ContentBlock, MessageContent, MessageRecord, SessionRecord,
};
use crate::sources::reader::LineCursor;
use crate::sources::{parse_timestamp, MessageLog, SourceError};

/// Scan state carried between resumed metadata passes.
#[derive(Debug, Clone, Default)]
pub struct MetadataAcc {
    /// Token tally per model, the basis for cost and primary-model picks.
    pub per_model: HashMap<String, TokenUsage>,
    pub sidechain: bool,
    pub saw_summary: bool,
    user_excerpt: Option<String>,
    summary_excerpt: Option<String>,
}

/// Cached result of a metadata pass.
#[derive(Debug, Clone)]
pub struct CachedMetadata {
    pub meta: SessionMetadata,
    pub acc: MetadataAcc,
}

pub fn parse_metadata_full(
    path: &Path,
    session_id: &str,
    max_line_bytes: usize,
) -> Result<(CachedMetadata, u64), SourceError> {
    let state = CachedMetadata {
        meta: SessionMetadata::new(session_id, path.to_path_buf(), SourceKind::ClaudeCode),
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
) -> Result<(MessageLog, u64), SourceError> {
    scan_messages(path, MessageLog::default(), 0, max_line_bytes)
}

pub fn parse_messages_incremental(
    path: &Path,
    cached: MessageLog,
    offset: u64,
    max_line_bytes: usize,
) -> Result<(MessageLog, u64), SourceError> {
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
        match serde_json::from_str::<SessionRecord>(line) {
            Ok(record) => apply_metadata_record(&mut state, &record),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping malformed record");
            }
        }
    }
    finalize_metadata(&mut state);
    Ok((state, cursor.offset()))
}

fn apply_metadata_record(state: &mut CachedMetadata, record: &SessionRecord) {
    match record {
        SessionRecord::User(r) => {
            observe_head_fields(&mut state.meta, r);
            state.acc.sidechain |= r.is_sidechain;
            if let Some(text) = user_visible_text(&r.message) {
                state.meta.message_count += 1;
                if state.acc.user_excerpt.is_none() && !text.trim_start().starts_with('<') {
                    state.acc.user_excerpt = Some(excerpt(&text));
                }
            }
        }
        SessionRecord::Assistant(r) => {
            observe_head_fields(&mut state.meta, r);
            state.acc.sidechain |= r.is_sidechain;
            if assistant_has_substance(&r.message) {
                state.meta.message_count += 1;
            }
            if let Some(usage) = &r.message.usage {
                let usage = usage.to_usage();
                state.meta.usage.add(&usage);
                let model = r.message.model.clone().unwrap_or_default();
                state.acc.per_model.entry(model).or_default().add(&usage);
            }
        }
        SessionRecord::Summary(s) => {
            state.acc.saw_summary = true;
            if state.acc.summary_excerpt.is_none() {
                state.acc.summary_excerpt = Some(excerpt(&s.summary));
            }
        }
        _ => {}
    }
}

fn observe_head_fields(meta: &mut SessionMetadata, record: &MessageRecord) {
    if let Some(ts) = record.timestamp.as_deref().and_then(parse_timestamp) {
        meta.observe_timestamp(ts);
    }
    if meta.working_dir.is_none() {
        meta.working_dir = record.cwd.as_deref().map(Into::into);
    }
    if meta.tool_version.is_none() {
        meta.tool_version = record.version.clone();
    }
    if meta.git_branch.is_none() {
        meta.git_branch = record.git_branch.clone();
    }
}

fn finalize_metadata(state: &mut CachedMetadata) {
    state.meta.primary_model = primary_model(&state.acc.per_model);
    state.meta.estimated_cost = estimate_cost_tally(&state.acc.per_model);
    state.meta.first_user_excerpt = state
        .acc
        .user_excerpt
        .clone()
        .or_else(|| state.acc.summary_excerpt.clone());
    state.meta.category = if state.acc.sidechain {
        SessionCategory::Sidechain
    } else if state.meta.message_count > 0 {
        SessionCategory::Interactive
    } else if state.acc.saw_summary {
        SessionCategory::Compacted
    } else {
        SessionCategory::Unknown
    };
}

fn scan_messages(
    path: &Path,
    mut state: MessageLog,
    offset: u64,
    max_line_bytes: usize,
) -> Result<(MessageLog, u64), SourceError> {
    let mut cursor = LineCursor::open_at(path, offset, max_line_bytes)?;
    while let Some(line) = cursor.next_line()? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionRecord>(line) {
            Ok(record) => apply_message_record(&mut state, &record),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping malformed record");
            }
        }
    }
    Ok((state, cursor.offset()))
}

fn apply_message_record(state: &mut MessageLog, record: &SessionRecord) {
    match record {
        SessionRecord::User(r) => {
            resolve_tool_results(state, &r.message);
            if let Some(text) = user_visible_text(&r.message) {
                state.push(Message {
                    id: r.uuid.clone(),
                    role: MessageRole::User,
                    timestamp: r.timestamp.as_deref().and_then(parse_timestamp),
                    model: None,
                    text,
                    tool_calls: Vec::new(),
                    usage: None,
                });
            }
        }
        SessionRecord::Assistant(r) => {
            let mut tool_calls = Vec::new();
            if let MessageContent::Blocks(blocks) = &r.message.content {
                for block in blocks {
                    if let ContentBlock::ToolUse { id, name, input } = block {
                        tool_calls.push(ToolInvocation::pending(
                            id.clone(),
                            name.clone(),
                            input.clone(),
                        ));
                    }
                }
            }
            let message = Message {
                id: r.uuid.clone(),
                role: MessageRole::Assistant,
                timestamp: r.timestamp.as_deref().and_then(parse_timestamp),
                model: r.message.model.clone(),
                text: r.message.content.as_text(),
                tool_calls,
                usage: r.message.usage.as_ref().map(|u| u.to_usage()),
            };
            if !message.is_empty() {
                state.push(message);
            }
        }
        _ => {}
    }
}

/// Attach tool results from a user record to the assistant message that
/// issued the call.
fn resolve_tool_results(state: &mut MessageLog, message: &ChatMessage) {
    let MessageContent::Blocks(blocks) = &message.content else {
        return;
    };
    for block in blocks {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } = block
        {
            state.resolve(tool_use_id, flatten_result_content(content), *is_error);
        }
    }
}

/// Tool result content is a plain string in older files and a block list in
/// newer ones.
fn flatten_result_content(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Text of a user record that represents an actual user turn. Records that
/// only carry tool results yield `None`.
fn user_visible_text(message: &ChatMessage) -> Option<String> {
    if message.content.is_tool_result_only() {
        return None;
    }
    let text = message.content.as_text();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn assistant_has_substance(message: &ChatMessage) -> bool {
    if !message.content.as_text().trim().is_empty() {
        return true;
    }
    match &message.content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. })),
        MessageContent::Text(_) => false,
    }
}

//! Full-document parse of Gemini chat files.
//!
//! Gemini rewrites the whole file on every change, so there is nothing to
//! resume: the reported offset is always 0 and the cache policy reparses
//! from scratch whenever the stamp goes stale. No tool linking either; the
//! pending table of the message log stays empty.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::model::{
    estimate_cost_tally, excerpt, primary_model, Message, MessageRole, SessionCategory,
    SessionMetadata, SourceKind, TokenUsage,
};
use crate::sources::gemini::records::ChatFile;
use crate::sources::{parse_timestamp, MessageLog, SourceError};

/// Cached result of a metadata pass.
#[derive(Debug, Clone)]
pub struct CachedMetadata {
    pub meta: SessionMetadata,
    pub per_model: HashMap<String, TokenUsage>,
}

pub fn parse_metadata(
    path: &Path,
    session_id: &str,
) -> Result<(CachedMetadata, u64), SourceError> {
    let chat = read_chat(path)?;
    let mut meta = SessionMetadata::new(session_id, path.to_path_buf(), SourceKind::Gemini);
    let mut per_model: HashMap<String, TokenUsage> = HashMap::new();

    for ts in [&chat.start_time, &chat.last_updated]
        .into_iter()
        .filter_map(|t| t.as_deref())
        .filter_map(parse_timestamp)
    {
        meta.observe_timestamp(ts);
    }

    for message in &chat.messages {
        if let Some(ts) = message.timestamp.as_deref().and_then(parse_timestamp) {
            meta.observe_timestamp(ts);
        }
        if message.content.trim().is_empty() {
            continue;
        }
        meta.message_count += 1;
        if message.kind == "user"
            && meta.first_user_excerpt.is_none()
            && !message.content.trim_start().starts_with('<')
        {
            meta.first_user_excerpt = Some(excerpt(&message.content));
        }
        if let Some(tokens) = message.tokens {
            let usage = tokens.to_usage();
            meta.usage.add(&usage);
            let model = message.model.clone().unwrap_or_default();
            per_model.entry(model).or_default().add(&usage);
        }
    }

    meta.primary_model = primary_model(&per_model);
    meta.estimated_cost = estimate_cost_tally(&per_model);
    meta.category = if meta.message_count > 0 {
        SessionCategory::Interactive
    } else {
        SessionCategory::Unknown
    };

    Ok((CachedMetadata { meta, per_model }, 0))
}

pub fn parse_messages(path: &Path) -> Result<(MessageLog, u64), SourceError> {
    let chat = read_chat(path)?;
    let mut log = MessageLog::default();
    for message in &chat.messages {
        if message.content.trim().is_empty() {
            continue;
        }
        let role = match message.kind.as_str() {
            "user" => MessageRole::User,
            "gemini" => MessageRole::Assistant,
            _ => MessageRole::System,
        };
        log.push(Message {
            id: message.id.clone(),
            role,
            timestamp: message.timestamp.as_deref().and_then(parse_timestamp),
            model: message.model.clone(),
            text: message.content.clone(),
            tool_calls: Vec::new(),
            usage: message.tokens.map(|t| t.to_usage()),
        });
    }
    Ok((log, 0))
}

fn read_chat(path: &Path) -> Result<ChatFile, SourceError> {
    let raw = fs::read_to_string(path).map_err(|e| SourceError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&raw).map_err(|e| SourceError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

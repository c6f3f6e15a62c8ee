//! Entry parsing: raw JSON records to [`Message`]
//!
//! Accepts the Claude Code session format (`uuid`, `parentUuid`, `type`,
//! `message.content`, `toolUseResult`, ...) as well as the flatter shape
//! with `id`/`role`/`content` at the top level.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Content, ContentBlock, Message, ParentRef, Role, Source, TransportMeta};

/// Record types that carry no conversation content
const SKIPPED_KINDS: &[&str] = &["queue-operation", "file-history-snapshot", "progress"];

const KNOWN_BLOCKS: &[&str] = &["text", "thinking", "tool_use", "tool_result"];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("entry has neither `uuid` nor `id`")]
    MissingIdentifier,

    #[error("unknown entry kind `{0}`")]
    UnknownKind(String),

    #[error("entry has no message content")]
    MissingContent,

    #[error("invalid `{kind}` content block: {source}")]
    InvalidBlock {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse one JSONL line. `Ok(None)` means the record is not a conversation entry.
pub fn parse_line(line: &str, source: Source) -> Result<Option<Message>, ParseError> {
    let json: Value = serde_json::from_str(line)?;
    parse_entry(&json, source)
}

/// Parse one record. `Ok(None)` means the record is not a conversation entry.
pub fn parse_entry(json: &Value, source: Source) -> Result<Option<Message>, ParseError> {
    let kind = json
        .get("type")
        .and_then(|v| v.as_str())
        .or_else(|| {
            json.get("message")
                .and_then(|m| m.get("role"))
                .and_then(|v| v.as_str())
        })
        .or_else(|| json.get("role").and_then(|v| v.as_str()))
        .unwrap_or("unknown");

    if SKIPPED_KINDS.contains(&kind) {
        return Ok(None);
    }

    let role = Role::parse(kind).ok_or_else(|| ParseError::UnknownKind(kind.to_string()))?;

    let mut message = if role == Role::Summary {
        parse_summary(json)?
    } else {
        let content = json
            .get("message")
            .and_then(|m| m.get("content"))
            .or_else(|| json.get("content"))
            .ok_or(ParseError::MissingContent)?;
        Message::new(role, parse_content(content)?)
    };

    message.source = source;
    if message.uuid.is_none() {
        message.uuid = str_field(json, "uuid");
    }
    message.id = str_field(json, "id");
    if message.canonical_id().is_none() {
        return Err(ParseError::MissingIdentifier);
    }

    if message.role != Role::Summary {
        message.parent_ref = parse_parent(json);
    }
    message.structured_result = json
        .get("toolUseResult")
        .or_else(|| json.get("structuredResult"))
        .filter(|v| !v.is_null())
        .cloned();
    message.orphaned_tool_ids = json
        .get("orphanedToolIds")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(String::from))
                .collect::<BTreeSet<_>>()
        })
        .unwrap_or_default();
    message.timestamp = json
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let transport = TransportMeta {
        session_id: str_field(json, "sessionId"),
        request_id: str_field(json, "requestId"),
        cwd: str_field(json, "cwd"),
    };
    if !transport.is_empty() {
        message.transport = Some(transport);
    }

    Ok(Some(message))
}

fn str_field(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Absent key means unknown; `null` means an explicit root.
fn parse_parent(json: &Value) -> ParentRef {
    let raw = json.get("parentUuid").or_else(|| json.get("parentId"));
    match raw {
        None => ParentRef::Unknown,
        Some(Value::Null) => ParentRef::Root,
        Some(Value::String(id)) => ParentRef::Id(id.clone()),
        Some(other) => {
            debug!(parent = %other, "ignoring non-string parent reference");
            ParentRef::Unknown
        }
    }
}

/// Summary records carry no uuid of their own; they are keyed by the leaf
/// they summarize.
fn parse_summary(json: &Value) -> Result<Message, ParseError> {
    let text = json
        .get("summary")
        .and_then(|v| v.as_str())
        .ok_or(ParseError::MissingContent)?;
    let mut message = Message::new(Role::Summary, text);
    message.uuid = str_field(json, "uuid").or_else(|| {
        json.get("leafUuid")
            .and_then(|v| v.as_str())
            .map(|leaf| format!("summary-{}", leaf))
    });
    Ok(message)
}

fn parse_content(content: &Value) -> Result<Content, ParseError> {
    match content {
        Value::String(text) => Ok(Content::Text(text.clone())),
        Value::Array(items) => Ok(Content::Blocks(
            items.iter().filter_map(parse_block_lenient).collect(),
        )),
        _ => Err(ParseError::MissingContent),
    }
}

/// Unknown block kinds (images, documents) are skipped; a known kind that
/// fails to parse is dropped with a warning.
fn parse_block_lenient(block: &Value) -> Option<ContentBlock> {
    match parse_block(block) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "dropping malformed content block");
            None
        }
    }
}

fn parse_block(block: &Value) -> Result<Option<ContentBlock>, ParseError> {
    let kind = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
    if !KNOWN_BLOCKS.contains(&kind) {
        debug!(kind, "skipping unsupported content block");
        return Ok(None);
    }

    serde_json::from_value(block.clone())
        .map(Some)
        .map_err(|source| ParseError::InvalidBlock {
            kind: kind.to_string(),
            source,
        })
}

//! Message model shared by the merge engine, the causal orderer and the
//! tool-pairing preprocessor.
//!
//! Entries arrive from two places: the persisted conversation log and the
//! live stream. Both are normalised into [`Message`] before the engine sees
//! them, so everything downstream works on one closed set of fields.

mod render;

pub use render::{RenderItem, RenderItemKind, ThinkingStatus, ToolCall, ToolResult, ToolStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Prefix of identifiers the client assigns before the log has seen a message.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Generate a fresh client-side temporary identifier.
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

/// Whether an identifier was assigned by the client rather than the log
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Provenance of a record. Not part of identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Live, incremental update channel
    Stream,
    /// Persisted, authoritative conversation log
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Summary,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "summary" => Some(Role::Summary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Summary => "summary",
        }
    }
}

/// Reference to the causal predecessor of a message.
///
/// The log distinguishes an explicit `null` parent (a conversation root) from
/// a parent that was simply not reported, which live echoes often do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef {
    /// Parent was omitted by the producer
    #[default]
    Unknown,
    /// Explicitly no parent
    Root,
    /// Identifier of the predecessor
    Id(String),
}

impl ParentRef {
    pub fn id(value: impl Into<String>) -> Self {
        ParentRef::Id(value.into())
    }

    /// `true` unless the producer omitted the parent entirely
    pub fn is_known(&self) -> bool {
        !matches!(self, ParentRef::Unknown)
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            ParentRef::Id(id) => Some(id),
            _ => None,
        }
    }
}

/// Transport-only metadata carried by live records.
///
/// The log does not always persist these fields, so they live in their own
/// side channel instead of being mixed into the message body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl TransportMeta {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.request_id.is_none() && self.cwd.is_none()
    }
}

/// Payload of a `tool_result` block: plain text or raw nested blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

impl ToolResultContent {
    /// Flatten to display text, joining nested `text` blocks with newlines
    pub fn to_text(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl PartialEq<&str> for ToolResultContent {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, ToolResultContent::Text(text) if text == other)
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default, deserialize_with = "null_as_false")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        ContentBlock::Thinking {
            thinking: thinking.into(),
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(content.into()),
            is_error: false,
        }
    }

    pub fn tool_error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(content.into()),
            is_error: true,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }

    /// Wire name of the block kind
    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::Thinking { .. } => "thinking",
            ContentBlock::ToolUse { .. } => "tool_use",
            ContentBlock::ToolResult { .. } => "tool_result",
        }
    }
}

/// Message body: plain text or an ordered list of blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Blocks(_) => None,
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Content::Text(_) => &[],
            Content::Blocks(blocks) => blocks,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<Vec<ContentBlock>> for Content {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Content::Blocks(blocks)
    }
}

/// One conversation entry.
///
/// At least one of `uuid` and `id` is expected to be set; see
/// [`Message::canonical_id`]. Records without either are dropped by the
/// engine with a diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Legacy identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_ref: ParentRef,
    pub source: Source,
    pub role: Role,
    pub content: Content,
    /// Side-channel payload correlated with a tool result in this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_result: Option<Value>,
    /// Tool calls abandoned by the producing process
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub orphaned_tool_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportMeta>,
}

impl Message {
    /// A stream-sourced message with no identifier yet.
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            id: None,
            uuid: None,
            parent_ref: ParentRef::Unknown,
            source: Source::Stream,
            role,
            content: content.into(),
            structured_result: None,
            orphaned_tool_ids: BTreeSet::new(),
            timestamp: None,
            transport: None,
        }
    }

    pub fn user(uuid: &str, content: impl Into<Content>) -> Self {
        Self::new(Role::User, content).with_uuid(uuid)
    }

    pub fn assistant(uuid: &str, content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content).with_uuid(uuid)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_ref = ParentRef::Id(parent.into());
        self
    }

    pub fn as_root(mut self) -> Self {
        self.parent_ref = ParentRef::Root;
        self
    }

    pub fn from_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn with_structured_result(mut self, value: Value) -> Self {
        self.structured_result = Some(value);
        self
    }

    pub fn with_orphaned<I, S>(mut self, tool_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orphaned_tool_ids
            .extend(tool_ids.into_iter().map(Into::into));
        self
    }

    /// `uuid` when present, else the legacy `id`
    pub fn canonical_id(&self) -> Option<&str> {
        self.uuid.as_deref().or(self.id.as_deref())
    }

    /// Replace the canonical identifier, keeping whichever field carried it
    pub fn set_canonical_id(&mut self, id: impl Into<String>) {
        if self.uuid.is_some() || self.id.is_none() {
            self.uuid = Some(id.into());
        } else {
            self.id = Some(id.into());
        }
    }

    /// Whether the canonical identifier is a client-assigned placeholder
    pub fn is_temporary(&self) -> bool {
        self.canonical_id().map(is_temp_id).unwrap_or(false)
    }

    /// Whether any `tool_use` block in this message carries `tool_id`
    pub fn has_tool_use(&self, tool_id: &str) -> bool {
        self.content
            .blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { id, .. } if id == tool_id))
    }
}

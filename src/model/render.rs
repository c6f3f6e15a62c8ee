//! Render-ready items produced by the tool-pairing preprocessor

use serde::Serialize;
use serde_json::Value;

use super::{Content, ToolResultContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStatus {
    Streaming,
    Complete,
}

/// Lifecycle of a tool call. `Pending` moves once to one of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Complete,
    Error,
    Aborted,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Complete => "complete",
            ToolStatus::Error => "error",
            ToolStatus::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: ToolResultContent,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub status: ToolStatus,
}

impl ToolCall {
    /// A new value carrying `result`, leaving `self` untouched.
    pub fn with_result(&self, result: ToolResult) -> ToolCall {
        let status = if result.is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Complete
        };
        ToolCall {
            tool_use_id: self.tool_use_id.clone(),
            tool_name: self.tool_name.clone(),
            tool_input: self.tool_input.clone(),
            tool_result: Some(result),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderItemKind {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        status: ThinkingStatus,
    },
    UserPrompt {
        content: Content,
    },
    ToolCall(ToolCall),
}

/// One renderable unit. `key` is stable across re-runs for unchanged input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderItem {
    pub key: String,
    #[serde(flatten)]
    pub kind: RenderItemKind,
}

impl RenderItem {
    pub fn new(key: impl Into<String>, kind: RenderItemKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match &self.kind {
            RenderItemKind::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

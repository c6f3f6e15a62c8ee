//! Tool pairing: ordered messages to render items
//!
//! Each `tool_use` block becomes one tool-call item. When the matching
//! `tool_result` shows up later in the sequence, the item at that position is
//! replaced by a new value carrying the result. Results that match nothing
//! are logged and discarded so a stray record can never break rendering.
//!
//! Item keys come from message identifiers and block positions, so running
//! the transform on an extended sequence keeps the keys of earlier items.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::model::{
    Content, ContentBlock, Message, RenderItem, RenderItemKind, Role, Source, ThinkingStatus,
    ToolCall, ToolResult, ToolStatus,
};

/// Transform an ordered message sequence into render items.
pub fn to_render_items(sequence: &[Message]) -> Vec<RenderItem> {
    let orphaned: HashSet<&str> = sequence
        .iter()
        .flat_map(|m| m.orphaned_tool_ids.iter().map(String::as_str))
        .collect();

    let mut pairing = Pairing {
        items: Vec::new(),
        pending: HashMap::new(),
        seen: HashSet::new(),
        orphaned,
    };

    let last = sequence.len().checked_sub(1);
    for (pos, message) in sequence.iter().enumerate() {
        let key = message_key(message, pos);
        let streaming_tail = Some(pos) == last && message.source == Source::Stream;
        pairing.push_message(message, key, streaming_tail);
    }

    pairing.items
}

/// Keys of identified messages never depend on position. The `#pos`
/// fallback does, so it is only stable while nothing ahead of it moves;
/// sequences built by `merge_log`/`merge_stream` never contain such entries.
fn message_key(message: &Message, pos: usize) -> String {
    match message.canonical_id() {
        Some(id) => id.to_string(),
        None => format!("#{}", pos),
    }
}

/// Message-level side channel, attributable only when the message carries a
/// single tool result.
fn correlated_structured_result(message: &Message, blocks: &[ContentBlock]) -> Option<Value> {
    let results = blocks.iter().filter(|b| b.is_tool_result()).count();
    if results == 1 {
        message.structured_result.clone()
    } else {
        None
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

struct Pairing<'a> {
    items: Vec<RenderItem>,
    /// tool id -> index of its pending item
    pending: HashMap<String, usize>,
    /// every tool id that has produced an item
    seen: HashSet<String>,
    orphaned: HashSet<&'a str>,
}

impl Pairing<'_> {
    fn push_message(&mut self, message: &Message, key: String, streaming_tail: bool) {
        let blocks = match &message.content {
            Content::Text(text) => {
                if message.role == Role::User {
                    self.push(
                        key,
                        RenderItemKind::UserPrompt {
                            content: message.content.clone(),
                        },
                    );
                } else if !is_blank(text) {
                    self.push(key, RenderItemKind::Text { text: text.clone() });
                }
                return;
            }
            Content::Blocks(blocks) => blocks,
        };

        let structured = correlated_structured_result(message, blocks);

        if message.role == Role::User {
            if !blocks.is_empty() && blocks.iter().all(ContentBlock::is_tool_result) {
                for block in blocks {
                    self.attach_result(block, structured.clone());
                }
            } else {
                self.push(
                    key,
                    RenderItemKind::UserPrompt {
                        content: message.content.clone(),
                    },
                );
            }
            return;
        }

        let last_block = blocks.len().saturating_sub(1);
        for (index, block) in blocks.iter().enumerate() {
            let block_key = format!("{}:{}", key, index);
            match block {
                ContentBlock::Text { text } => {
                    if !is_blank(text) {
                        self.push(block_key, RenderItemKind::Text { text: text.clone() });
                    }
                }
                ContentBlock::Thinking { thinking } => {
                    if !is_blank(thinking) {
                        let status = if streaming_tail && index == last_block {
                            ThinkingStatus::Streaming
                        } else {
                            ThinkingStatus::Complete
                        };
                        self.push(
                            block_key,
                            RenderItemKind::Thinking {
                                thinking: thinking.clone(),
                                status,
                            },
                        );
                    }
                }
                ContentBlock::ToolUse { id, name, input } => {
                    self.push_tool_use(block_key, id, name, input);
                }
                ContentBlock::ToolResult { .. } => {
                    self.attach_result(block, structured.clone());
                }
            }
        }
    }

    fn push(&mut self, key: String, kind: RenderItemKind) {
        self.items.push(RenderItem::new(key, kind));
    }

    fn push_tool_use(&mut self, key: String, id: &str, name: &str, input: &Value) {
        if !self.seen.insert(id.to_string()) {
            debug!(tool_use_id = id, "ignoring repeated tool_use block");
            return;
        }

        let aborted = self.orphaned.contains(id);
        let status = if aborted {
            ToolStatus::Aborted
        } else {
            ToolStatus::Pending
        };

        self.push(
            key,
            RenderItemKind::ToolCall(ToolCall {
                tool_use_id: id.to_string(),
                tool_name: name.to_string(),
                tool_input: input.clone(),
                tool_result: None,
                status,
            }),
        );

        if !aborted {
            self.pending.insert(id.to_string(), self.items.len() - 1);
        }
    }

    fn attach_result(&mut self, block: &ContentBlock, structured_result: Option<Value>) {
        let ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } = block
        else {
            return;
        };

        let Some(index) = self.pending.remove(tool_use_id) else {
            if self.seen.contains(tool_use_id) {
                debug!(tool_use_id = %tool_use_id, "ignoring result for settled tool call");
            } else {
                warn!(tool_use_id = %tool_use_id, "discarding tool_result with no matching tool_use");
            }
            return;
        };

        let RenderItemKind::ToolCall(call) = &self.items[index].kind else {
            return;
        };

        let completed = call.with_result(ToolResult {
            content: content.clone(),
            is_error: *is_error,
            structured_result,
        });
        let key = self.items[index].key.clone();
        self.items[index] = RenderItem::new(key, RenderItemKind::ToolCall(completed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolResultContent;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tool_use(msg_id: &str, tool_id: &str, name: &str) -> Message {
        Message::assistant(
            msg_id,
            vec![ContentBlock::tool_use(tool_id, name, json!({"path": "/tmp/x"}))],
        )
        .from_source(Source::Log)
    }

    fn tool_result(msg_id: &str, tool_id: &str, content: &str) -> Message {
        Message::user(msg_id, vec![ContentBlock::tool_result(tool_id, content)]).from_source(Source::Log)
    }

    fn only_call(items: &[RenderItem]) -> &ToolCall {
        assert_eq!(items.len(), 1, "expected a single item, got {:?}", items);
        items[0].as_tool_call().expect("tool call item")
    }

    #[test]
    fn test_pairs_result_with_tool_use() {
        let items = to_render_items(&[
            tool_use("m1", "t1", "Read"),
            tool_result("m2", "t1", "file contents"),
        ]);

        let call = only_call(&items);
        assert_eq!(call.status, ToolStatus::Complete);
        assert_eq!(call.tool_name, "Read");
        let result = call.tool_result.as_ref().unwrap();
        assert_eq!(result.content, "file contents");
        assert!(!result.is_error);
        assert_eq!(items[0].key, "m1:0");
    }

    #[test]
    fn test_pending_without_result() {
        let items = to_render_items(&[tool_use("m1", "t1", "Bash")]);
        let call = only_call(&items);
        assert_eq!(call.status, ToolStatus::Pending);
        assert_eq!(call.tool_result, None);
    }

    #[test]
    fn test_error_result() {
        let items = to_render_items(&[
            tool_use("m1", "t1", "Bash"),
            Message::user("m2", vec![ContentBlock::tool_error("t1", "exit 1")]),
        ]);
        assert_eq!(only_call(&items).status, ToolStatus::Error);
    }

    #[test]
    fn test_orphaned_tool_is_aborted_and_stays_aborted() {
        let items = to_render_items(&[
            tool_use("m1", "t1", "Bash").with_orphaned(["t1"]),
            tool_result("m2", "t1", "late"),
        ]);
        let call = only_call(&items);
        assert_eq!(call.status, ToolStatus::Aborted);
        assert_eq!(call.tool_result, None);
    }

    #[test]
    fn test_orphan_signal_on_any_message_applies() {
        let items = to_render_items(&[
            tool_use("m1", "t1", "Bash"),
            Message::new(Role::System, "session ended")
                .with_uuid("s1")
                .with_orphaned(["t1"]),
        ]);
        assert_eq!(items[0].as_tool_call().unwrap().status, ToolStatus::Aborted);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_unmatched_result_is_discarded() {
        let items = to_render_items(&[tool_result("m1", "ghost", "nothing")]);
        assert!(items.is_empty());
    }

    #[test]
    fn test_second_result_is_ignored() {
        let items = to_render_items(&[
            tool_use("m1", "t1", "Read"),
            tool_result("m2", "t1", "first"),
            tool_result("m3", "t1", "second"),
        ]);
        let call = only_call(&items);
        assert_eq!(call.tool_result.as_ref().unwrap().content, "first");
    }

    #[test]
    fn test_repeated_tool_use_yields_one_item() {
        let items = to_render_items(&[tool_use("m1", "t1", "Read"), tool_use("m2", "t1", "Read")]);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_structured_result_is_correlated() {
        let items = to_render_items(&[
            tool_use("m1", "t1", "Task"),
            tool_result("m2", "t1", "done").with_structured_result(json!({"totalTokens": 42})),
        ]);
        let result = only_call(&items).tool_result.clone().unwrap();
        assert_eq!(result.structured_result, Some(json!({"totalTokens": 42})));
    }

    #[test]
    fn test_structured_result_not_guessed_for_multiple_results() {
        let items = to_render_items(&[
            Message::assistant(
                "m1",
                vec![
                    ContentBlock::tool_use("t1", "Read", json!({})),
                    ContentBlock::tool_use("t2", "Read", json!({})),
                ],
            ),
            Message::user(
                "m2",
                vec![
                    ContentBlock::tool_result("t1", "a"),
                    ContentBlock::tool_result("t2", "b"),
                ],
            )
            .with_structured_result(json!({"x": 1})),
        ]);
        assert_eq!(items.len(), 2);
        for item in &items {
            let call = item.as_tool_call().unwrap();
            assert_eq!(call.status, ToolStatus::Complete);
            assert_eq!(call.tool_result.as_ref().unwrap().structured_result, None);
        }
    }

    #[test]
    fn test_user_messages() {
        let items = to_render_items(&[
            Message::user("u1", "plain"),
            Message::user(
                "u2",
                vec![
                    ContentBlock::text("look at this"),
                    ContentBlock::tool_result("t9", "x"),
                ],
            ),
            Message::user("u3", "   "),
        ]);
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0].kind,
            RenderItemKind::UserPrompt {
                content: Content::text("plain")
            }
        );
        // mixed content is emitted verbatim, tool_result included
        match &items[1].kind {
            RenderItemKind::UserPrompt { content } => assert_eq!(content.blocks().len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(items[2].key, "u3");
    }

    #[test]
    fn test_blank_text_and_thinking_are_skipped() {
        let items = to_render_items(&[
            Message::assistant("a0", "  \n"),
            Message::assistant(
                "a1",
                vec![
                    ContentBlock::thinking(""),
                    ContentBlock::text(" "),
                    ContentBlock::text("answer"),
                ],
            )
            .from_source(Source::Log),
        ]);
        assert_eq!(
            items,
            vec![RenderItem::new(
                "a1:2",
                RenderItemKind::Text {
                    text: "answer".into()
                }
            )]
        );
    }

    #[test]
    fn test_thinking_status_follows_stream_tail() {
        let thinking = |id: &str| Message::assistant(id, vec![ContentBlock::thinking("hmm")]);

        let live = to_render_items(&[thinking("a1")]);
        assert_eq!(
            live[0].kind,
            RenderItemKind::Thinking {
                thinking: "hmm".into(),
                status: ThinkingStatus::Streaming
            }
        );

        let settled = to_render_items(&[thinking("a1"), Message::assistant("a2", "next")]);
        assert!(matches!(
            settled[0].kind,
            RenderItemKind::Thinking {
                status: ThinkingStatus::Complete,
                ..
            }
        ));

        let logged = to_render_items(&[thinking("a1").from_source(Source::Log)]);
        assert!(matches!(
            logged[0].kind,
            RenderItemKind::Thinking {
                status: ThinkingStatus::Complete,
                ..
            }
        ));
    }

    #[test]
    fn test_keys_are_stable_when_sequence_grows() {
        let base = vec![
            Message::user("u1", "run it").as_root(),
            tool_use("m1", "t1", "Bash"),
        ];
        let mut extended = base.clone();
        extended.push(tool_result("m2", "t1", "ok"));
        extended.push(Message::assistant("a2", "done").with_parent("m2"));

        let before: Vec<String> = to_render_items(&base).into_iter().map(|i| i.key).collect();
        let after: Vec<String> = to_render_items(&extended).into_iter().map(|i| i.key).collect();
        assert_eq!(before, vec!["u1", "m1:0"]);
        assert_eq!(after, vec!["u1", "m1:0", "a2"]);
    }

    #[test]
    fn test_nested_result_blocks_are_kept() {
        let items = to_render_items(&[
            tool_use("m1", "t1", "Read"),
            Message::user(
                "m2",
                vec![ContentBlock::ToolResult {
                    tool_use_id: "t1".into(),
                    content: ToolResultContent::Blocks(vec![json!({"type": "text", "text": "a"})]),
                    is_error: false,
                }],
            ),
        ]);
        let result = only_call(&items).tool_result.clone().unwrap();
        assert_eq!(result.content.to_text(), "a");
    }

    #[test]
    fn test_anonymous_message_keyed_by_position() {
        let items = to_render_items(&[Message::new(Role::System, "notice")]);
        assert_eq!(items[0].key, "#0");
    }

    #[test]
    fn test_identified_keys_ignore_anonymous_neighbours() {
        let plain = to_render_items(&[Message::assistant("a1", "hi")]);
        let shifted = to_render_items(&[
            Message::new(Role::System, "notice"),
            Message::assistant("a1", "hi"),
        ]);
        assert_eq!(plain[0].key, "a1");
        assert_eq!(shifted[1].key, "a1");
    }
}

//! Caller-held conversation state
//!
//! The engine functions are pure; this is where their results are kept
//! between events: the ordered sequence, the temp-id resolution map, the
//! feed resume cursor and a memoized render list.

use tracing::{debug, warn};

use crate::engine::{merge_log, merge_stream, to_render_items, TempIdResolutions};
use crate::feed::{Cursor, FeedEvent, FeedHandler, OrphanSignal};
use crate::model::{new_temp_id, Message, ParentRef, RenderItem, Role, Source};

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    resolutions: TempIdResolutions,
    cursor: Option<Cursor>,
    revision: u64,
    rendered: Option<(u64, Vec<RenderItem>)>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a stored snapshot
    pub fn restore(messages: Vec<Message>, resolutions: TempIdResolutions, cursor: Option<Cursor>) -> Self {
        Self {
            messages,
            resolutions,
            cursor,
            revision: 0,
            rendered: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn resolutions(&self) -> &TempIdResolutions {
        &self.resolutions
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Bumped on every change to the sequence
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn apply_log_batch(&mut self, batch: &[Message]) {
        let merged = merge_log(&self.messages, batch, &self.resolutions);
        self.messages = merged.sequence;
        self.resolutions = merged.resolutions;
        self.revision += 1;
    }

    /// Merge one live update; returns its position in the sequence
    pub fn apply_live(&mut self, entry: Message) -> Option<usize> {
        let merged = merge_stream(&self.messages, entry, &self.resolutions);

        if let (Some(temp_id), Some(index)) = (merged.matched_temp_id, merged.index) {
            if let Some(permanent) = merged.sequence[index].canonical_id() {
                self.resolutions.insert(temp_id, permanent);
            }
        }

        self.messages = merged.sequence;
        self.revision += 1;
        merged.index
    }

    /// Mark tool calls as abandoned.
    ///
    /// Ids go to the named message when it exists, otherwise to the message
    /// holding the matching tool_use. Ids with neither are dropped.
    pub fn apply_orphans(&mut self, signal: OrphanSignal) {
        let named = signal.message_id.as_deref().and_then(|id| {
            let id = self.resolutions.resolve(id);
            self.messages.iter().position(|m| m.canonical_id() == Some(id))
        });

        let mut changed = false;
        for tool_id in signal.tool_ids {
            let target = named.or_else(|| self.messages.iter().position(|m| m.has_tool_use(&tool_id)));
            match target {
                Some(pos) => {
                    changed |= self.messages[pos].orphaned_tool_ids.insert(tool_id);
                }
                None => warn!(tool_use_id = %tool_id, "orphan signal for unknown tool call"),
            }
        }

        if changed {
            self.revision += 1;
        }
    }

    /// Add an optimistic user message ahead of the log. Returns its temp id.
    pub fn push_local_prompt(&mut self, text: &str) -> String {
        let temp_id = new_temp_id();
        let parent_ref = match self.messages.last().and_then(|m| m.canonical_id()) {
            Some(parent) => ParentRef::id(parent),
            None => ParentRef::Root,
        };

        let mut message = Message::new(Role::User, text).with_uuid(temp_id.clone());
        message.parent_ref = parent_ref;
        message.source = Source::Stream;

        self.apply_live(message);
        debug!(temp_id = %temp_id, "queued local prompt");
        temp_id
    }

    /// Render items for the current sequence, recomputed only after a change
    pub fn render_items(&mut self) -> &[RenderItem] {
        let stale = !matches!(&self.rendered, Some((rev, _)) if *rev == self.revision);
        if stale {
            self.rendered = Some((self.revision, to_render_items(&self.messages)));
        }
        match &self.rendered {
            Some((_, items)) => items,
            None => &[],
        }
    }
}

impl FeedHandler for Conversation {
    fn handle(&mut self, cursor: Cursor, event: FeedEvent) {
        match event {
            FeedEvent::LogBatch(batch) => self.apply_log_batch(&batch),
            FeedEvent::Live(entry) => {
                self.apply_live(entry);
            }
            FeedEvent::Orphaned(signal) => self.apply_orphans(signal),
        }
        self.cursor = Some(cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentBlock, ToolStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ids(conversation: &Conversation) -> Vec<&str> {
        conversation
            .messages()
            .iter()
            .filter_map(|m| m.canonical_id())
            .collect()
    }

    #[test]
    fn test_local_prompt_resolved_by_log() {
        let mut conversation = Conversation::new();
        conversation.apply_log_batch(&[Message::user("u1", "first").as_root().from_source(Source::Log)]);

        let temp_id = conversation.push_local_prompt("second");
        assert_eq!(ids(&conversation), vec!["u1", temp_id.as_str()]);

        conversation.apply_log_batch(&[Message::user("u2", "second").with_parent("u1")]);
        assert_eq!(ids(&conversation), vec!["u1", "u2"]);
        assert_eq!(conversation.resolutions().get(&temp_id), Some("u2"));
    }

    #[test]
    fn test_stream_echo_records_resolution() {
        let mut conversation = Conversation::new();
        let temp_id = conversation.push_local_prompt("hello");

        let index = conversation.apply_live(Message::user("real", "hello"));
        assert_eq!(index, Some(0));
        assert_eq!(conversation.resolutions().get(&temp_id), Some("real"));

        // a late echo carrying the temp id lands on the same record
        conversation.apply_live(Message::user(&temp_id, "hello"));
        assert_eq!(ids(&conversation), vec!["real"]);
    }

    #[test]
    fn test_render_items_memoized_by_revision() {
        let mut conversation = Conversation::new();
        conversation.apply_live(Message::assistant("a1", "hi"));
        let rev = conversation.revision();

        let first = conversation.render_items().to_vec();
        let again = conversation.render_items().to_vec();
        assert_eq!(first, again);
        assert_eq!(conversation.revision(), rev);

        conversation.apply_live(Message::assistant("a2", "there").with_parent("a1"));
        assert_eq!(conversation.render_items().len(), 2);
    }

    #[test]
    fn test_orphan_signal_targets_tool_use_owner() {
        let mut conversation = Conversation::new();
        conversation.apply_log_batch(&[Message::assistant(
            "a1",
            vec![ContentBlock::tool_use("t1", "Bash", json!({"command": "sleep 100"}))],
        )
        .from_source(Source::Log)]);

        conversation.handle(
            Cursor {
                byte_offset: 10,
                line_number: 1,
            },
            FeedEvent::Orphaned(OrphanSignal {
                message_id: None,
                tool_ids: vec!["t1".into(), "unknown".into()],
            }),
        );

        assert_eq!(conversation.cursor().map(|c| c.line_number), Some(1));
        let items = conversation.render_items();
        assert_eq!(items[0].as_tool_call().unwrap().status, ToolStatus::Aborted);
    }

    #[test]
    fn test_restore_keeps_state() {
        let mut resolutions = TempIdResolutions::new();
        resolutions.insert("temp-1", "u1");
        let cursor = Cursor {
            byte_offset: 99,
            line_number: 3,
        };
        let conversation = Conversation::restore(vec![Message::user("u1", "x")], resolutions.clone(), Some(cursor));
        assert_eq!(conversation.resolutions(), &resolutions);
        assert_eq!(conversation.cursor(), Some(cursor));
        assert_eq!(conversation.messages().len(), 1);
    }
}

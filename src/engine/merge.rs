//! Merge of log-sourced and stream-sourced records
//!
//! Log records are authoritative. A stream update never regresses a record
//! the log has already delivered, and a log record overlays whatever the
//! stream had shown for the same identifier.
//!
//! Optimistic user messages carry a `temp-` identifier until the log assigns
//! a permanent one. They are matched by role, exact content and resolved
//! parent chain. When more than one pending message fits, nothing is merged:
//! a transient duplicate is preferable to attaching a reply to the wrong turn.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::order::order_by_causal_chain;
use crate::model::{Message, ParentRef, Role, Source};

/// Established `temp id -> permanent id` mappings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempIdResolutions {
    map: BTreeMap<String, String>,
}

impl TempIdResolutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, temp_id: impl Into<String>, permanent_id: impl Into<String>) {
        self.map.insert(temp_id.into(), permanent_id.into());
    }

    pub fn get(&self, temp_id: &str) -> Option<&str> {
        self.map.get(temp_id).map(String::as_str)
    }

    /// Follow mappings from `id` until reaching an unmapped identifier
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        let mut current = id;
        // Bounded by map size so a corrupted cycle cannot spin forever
        for _ in 0..=self.map.len() {
            match self.map.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for TempIdResolutions {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// Result of [`merge_log`]
#[derive(Debug, Clone, PartialEq)]
pub struct LogMerge {
    pub sequence: Vec<Message>,
    pub resolutions: TempIdResolutions,
}

/// Result of [`merge_stream`]
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMerge {
    pub sequence: Vec<Message>,
    /// Position of the merged entry in `sequence`; `None` if it was dropped
    pub index: Option<usize>,
    /// Temporary id that this entry resolved, if any
    pub matched_temp_id: Option<String>,
}

/// Reconcile one incoming record with the existing record for its identifier.
///
/// - incoming `Log`: existing fields overlaid by every field the incoming
///   record carries. Fields the log does not persist (such as the transport
///   side channel) survive from the stream record.
/// - incoming `Stream` over existing `Log`: existing is kept as is.
/// - both `Stream`: incoming replaces existing.
pub fn merge_entry(existing: Option<&Message>, incoming: Message) -> Message {
    let Some(existing) = existing else {
        return incoming;
    };

    match (existing.source, incoming.source) {
        (_, Source::Log) => overlay(existing, incoming),
        (Source::Log, Source::Stream) => existing.clone(),
        (Source::Stream, Source::Stream) => incoming,
    }
}

fn overlay(existing: &Message, incoming: Message) -> Message {
    Message {
        id: incoming.id.or_else(|| existing.id.clone()),
        uuid: incoming.uuid.or_else(|| existing.uuid.clone()),
        parent_ref: if incoming.parent_ref.is_known() {
            incoming.parent_ref
        } else {
            existing.parent_ref.clone()
        },
        source: Source::Log,
        role: incoming.role,
        content: incoming.content,
        structured_result: incoming
            .structured_result
            .or_else(|| existing.structured_result.clone()),
        orphaned_tool_ids: if incoming.orphaned_tool_ids.is_empty() {
            existing.orphaned_tool_ids.clone()
        } else {
            incoming.orphaned_tool_ids
        },
        timestamp: incoming.timestamp.or(existing.timestamp),
        transport: incoming.transport.or_else(|| existing.transport.clone()),
    }
}

/// Merge a pending temp record with the record that resolves it. The result
/// always takes the incoming (permanent) identifiers, and keeps the pending
/// record's parent when the incoming one did not report any.
fn resolve_temp(existing: &Message, incoming: Message) -> Message {
    let id = incoming.id.clone();
    let uuid = incoming.uuid.clone();
    let mut merged = merge_entry(Some(existing), incoming);
    merged.id = id;
    merged.uuid = uuid;
    if !merged.parent_ref.is_known() {
        merged.parent_ref = existing.parent_ref.clone();
    }
    merged
}

/// Parent identifier after substituting established resolutions.
/// Both `Root` and `Unknown` compare as "no parent".
fn resolved_parent<'a>(parent: &'a ParentRef, resolutions: &'a TempIdResolutions) -> Option<&'a str> {
    parent.as_id().map(|id| resolutions.resolve(id))
}

fn substitute_parent(parent: ParentRef, resolutions: &TempIdResolutions) -> ParentRef {
    match parent {
        ParentRef::Id(id) => ParentRef::Id(resolutions.resolve(&id).to_string()),
        other => other,
    }
}

fn rewrite_parent_refs(sequence: &mut [Message], temp_id: &str, permanent_id: &str) {
    for message in sequence.iter_mut() {
        if message.parent_ref.as_id() == Some(temp_id) {
            message.parent_ref = ParentRef::id(permanent_id);
        }
    }
}

fn index_by_id(sequence: &[Message]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(sequence.len());
    for (pos, message) in sequence.iter().enumerate() {
        if let Some(id) = message.canonical_id() {
            index.entry(id.to_string()).or_insert(pos);
        }
    }
    index
}

fn position_of(sequence: &[Message], id: &str) -> Option<usize> {
    sequence.iter().position(|m| m.canonical_id() == Some(id))
}

enum TempMatch {
    None,
    One(usize),
    Ambiguous(usize),
}

/// Find pending temp user messages that `entry` could be the permanent form of.
///
/// With `require_parent`, a candidate must also share the entry's resolved
/// parent; without it, any same-content candidate qualifies.
fn find_temp_candidate(
    sequence: &[Message],
    entry: &Message,
    resolutions: &TempIdResolutions,
    require_parent: bool,
) -> TempMatch {
    if entry.role != Role::User || entry.is_temporary() {
        return TempMatch::None;
    }

    let wanted_parent = resolved_parent(&entry.parent_ref, resolutions);
    let candidates: Vec<usize> = sequence
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_temporary() && m.role == Role::User && m.content == entry.content)
        .filter(|(_, m)| {
            !require_parent || resolved_parent(&m.parent_ref, resolutions) == wanted_parent
        })
        .map(|(pos, _)| pos)
        .collect();

    match candidates.as_slice() {
        [] => TempMatch::None,
        [pos] => TempMatch::One(*pos),
        many => TempMatch::Ambiguous(many.len()),
    }
}

/// Merge a batch of log catch-up entries into `current`.
///
/// Each entry first tries to resolve exactly one pending temp message, then
/// falls back to an identifier match merged by precedence. Anything else is
/// appended. When an entry resolves a temp message and also matches a record
/// by identifier (a live echo appended while the match was ambiguous), the
/// temp message is folded into that record. Resolutions made earlier in the
/// batch are visible to later entries, so chains of quick successive
/// messages resolve in one pass.
pub fn merge_log(current: &[Message], batch: &[Message], resolutions: &TempIdResolutions) -> LogMerge {
    let mut sequence = current.to_vec();
    let mut resolutions = resolutions.clone();
    let mut index = index_by_id(&sequence);

    for entry in batch {
        let Some(id) = entry.canonical_id().map(str::to_string) else {
            warn!(role = entry.role.as_str(), "dropping log entry without an identifier");
            continue;
        };

        let mut entry = entry.clone();
        entry.source = Source::Log;
        entry.parent_ref = substitute_parent(entry.parent_ref, &resolutions);

        let existing = index.get(&id).copied();
        match (find_temp_candidate(&sequence, &entry, &resolutions, true), existing) {
            (TempMatch::One(temp_pos), Some(pos)) => {
                let temp_id = sequence[temp_pos].canonical_id().unwrap_or_default().to_string();
                debug!(temp_id = %temp_id, permanent_id = %id, "folded temporary message into existing record");
                let temp = sequence.remove(temp_pos);
                let pos = if temp_pos < pos { pos - 1 } else { pos };
                let mut merged = merge_entry(Some(&sequence[pos]), entry);
                if !merged.parent_ref.is_known() {
                    merged.parent_ref = temp.parent_ref;
                }
                sequence[pos] = merged;
                rewrite_parent_refs(&mut sequence, &temp_id, &id);
                resolutions.insert(temp_id, id);
                index = index_by_id(&sequence);
            }
            (TempMatch::One(pos), None) => {
                let temp_id = sequence[pos].canonical_id().unwrap_or_default().to_string();
                debug!(temp_id = %temp_id, permanent_id = %id, "resolved temporary id from log");
                sequence[pos] = resolve_temp(&sequence[pos], entry);
                rewrite_parent_refs(&mut sequence, &temp_id, &id);
                resolutions.insert(temp_id.clone(), id.clone());
                index.remove(&temp_id);
                index.insert(id, pos);
            }
            (_, Some(pos)) => {
                sequence[pos] = merge_entry(Some(&sequence[pos]), entry);
            }
            (TempMatch::Ambiguous(count), None) => {
                debug!(permanent_id = %id, candidates = count, "ambiguous temporary id match, appending");
                index.insert(id, sequence.len());
                sequence.push(entry);
            }
            (TempMatch::None, None) => {
                index.insert(id, sequence.len());
                sequence.push(entry);
            }
        }
    }

    LogMerge {
        sequence: order_by_causal_chain(&sequence),
        resolutions,
    }
}

/// Merge a single live update into `current`.
///
/// Identifier match takes priority, after mapping an already-resolved temp
/// id to its permanent id. Failing that, a user entry may resolve a pending
/// temp message: by parent when the entry reports one, or as a last resort
/// when it reports none and exactly one same-content candidate exists.
pub fn merge_stream(current: &[Message], entry: Message, resolutions: &TempIdResolutions) -> StreamMerge {
    let Some(raw_id) = entry.canonical_id() else {
        warn!(role = entry.role.as_str(), "dropping stream entry without an identifier");
        return StreamMerge {
            sequence: current.to_vec(),
            index: None,
            matched_temp_id: None,
        };
    };

    let id = resolutions.resolve(raw_id).to_string();
    let renamed = id != raw_id;
    let mut entry = entry;
    if renamed {
        entry.set_canonical_id(id.clone());
    }
    entry.source = Source::Stream;
    entry.parent_ref = substitute_parent(entry.parent_ref, resolutions);

    let mut sequence = current.to_vec();
    let mut matched_temp_id = None;

    if let Some(pos) = position_of(&sequence, &id) {
        sequence[pos] = merge_entry(Some(&sequence[pos]), entry);
    } else {
        let require_parent = entry.parent_ref.is_known();
        match find_temp_candidate(&sequence, &entry, resolutions, require_parent) {
            TempMatch::One(pos) => {
                let temp_id = sequence[pos].canonical_id().unwrap_or_default().to_string();
                debug!(temp_id = %temp_id, permanent_id = %id, "resolved temporary id from stream");
                sequence[pos] = resolve_temp(&sequence[pos], entry);
                rewrite_parent_refs(&mut sequence, &temp_id, &id);
                matched_temp_id = Some(temp_id);
            }
            TempMatch::Ambiguous(count) => {
                debug!(permanent_id = %id, candidates = count, "ambiguous temporary id match, appending");
                sequence.push(entry);
            }
            TempMatch::None => sequence.push(entry),
        }
    }

    let sequence = order_by_causal_chain(&sequence);
    let index = position_of(&sequence, &id);
    StreamMerge {
        sequence,
        index,
        matched_temp_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, ContentBlock, TransportMeta};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ids(sequence: &[Message]) -> Vec<&str> {
        sequence.iter().filter_map(|m| m.canonical_id()).collect()
    }

    #[test]
    fn test_merge_entry_without_existing() {
        let incoming = Message::user("u1", "hi").from_source(Source::Log);
        assert_eq!(merge_entry(None, incoming.clone()), incoming);
    }

    #[test]
    fn test_log_overlays_stream_and_keeps_transport() {
        let mut stream = Message::assistant("a1", "draft").with_parent("u1");
        stream.transport = Some(TransportMeta {
            session_id: Some("s-1".into()),
            ..Default::default()
        });
        let log = Message::assistant("a1", "final").from_source(Source::Log);

        let merged = merge_entry(Some(&stream), log);
        assert_eq!(merged.source, Source::Log);
        assert_eq!(merged.content, Content::text("final"));
        // log omitted the parent, stream knew it
        assert_eq!(merged.parent_ref, ParentRef::id("u1"));
        assert_eq!(
            merged.transport.and_then(|t| t.session_id).as_deref(),
            Some("s-1")
        );
    }

    #[test]
    fn test_stream_never_regresses_log() {
        let log = Message::assistant("a1", "final")
            .with_parent("u1")
            .from_source(Source::Log)
            .with_structured_result(json!({"ok": true}));
        let stream = Message::assistant("a1", "stale").with_parent("other");

        assert_eq!(merge_entry(Some(&log), stream), log);
    }

    #[test]
    fn test_newer_stream_wins_over_stream() {
        let older = Message::assistant("a1", "par");
        let newer = Message::assistant("a1", "partial text");
        assert_eq!(merge_entry(Some(&older), newer.clone()), newer);
    }

    #[test]
    fn test_resolve_follows_chain() {
        let mut res = TempIdResolutions::new();
        res.insert("temp-a", "temp-b");
        res.insert("temp-b", "real");
        assert_eq!(res.resolve("temp-a"), "real");
        assert_eq!(res.resolve("unrelated"), "unrelated");
    }

    #[test]
    fn test_merge_log_resolves_temp_id() {
        let current = vec![Message::new(Role::User, "hello").with_id("temp-123")];
        let batch = vec![Message::new(Role::User, "hello")
            .with_id("real-uuid")
            .from_source(Source::Log)];

        let merged = merge_log(&current, &batch, &TempIdResolutions::new());
        assert_eq!(ids(&merged.sequence), vec!["real-uuid"]);
        assert_eq!(merged.resolutions.get("temp-123"), Some("real-uuid"));
        assert_eq!(merged.sequence[0].source, Source::Log);
    }

    #[test]
    fn test_merge_log_temp_uuid_is_replaced_by_legacy_id() {
        let current = vec![Message::user("temp-1", "hello")];
        let batch = vec![Message::new(Role::User, "hello").with_id("real")];

        let merged = merge_log(&current, &batch, &TempIdResolutions::new());
        assert_eq!(merged.sequence.len(), 1);
        assert_eq!(merged.sequence[0].uuid, None);
        assert_eq!(merged.sequence[0].canonical_id(), Some("real"));
    }

    #[test]
    fn test_merge_log_resolves_chained_temp_ids() {
        let current = vec![
            Message::user("p0", "start").as_root().from_source(Source::Log),
            Message::user("temp-1", "again").with_parent("p0"),
            Message::user("temp-2", "again").with_parent("temp-1"),
        ];
        let batch = vec![
            Message::user("real-1", "again").with_parent("p0"),
            Message::user("real-2", "again").with_parent("real-1"),
        ];

        let merged = merge_log(&current, &batch, &TempIdResolutions::new());
        assert_eq!(ids(&merged.sequence), vec!["p0", "real-1", "real-2"]);
        assert_eq!(merged.resolutions.get("temp-1"), Some("real-1"));
        assert_eq!(merged.resolutions.get("temp-2"), Some("real-2"));
    }

    #[test]
    fn test_merge_log_uses_prior_resolutions_for_parent_chain() {
        // temp-1 was resolved by the stream earlier, but temp-2 still points at it
        let current = vec![
            Message::user("real-1", "one").as_root().from_source(Source::Log),
            Message::user("temp-2", "two").with_parent("temp-1"),
        ];
        let mut res = TempIdResolutions::new();
        res.insert("temp-1", "real-1");

        let batch = vec![Message::user("real-2", "two").with_parent("real-1")];
        let merged = merge_log(&current, &batch, &res);
        assert_eq!(ids(&merged.sequence), vec!["real-1", "real-2"]);
        assert_eq!(merged.resolutions.get("temp-2"), Some("real-2"));
    }

    #[test]
    fn test_merge_log_ambiguous_candidates_are_left_alone() {
        let current = vec![
            Message::user("temp-a", "same").with_parent("p"),
            Message::user("temp-b", "same").with_parent("p"),
        ];
        let batch = vec![Message::user("real", "same").with_parent("p")];

        let merged = merge_log(&current, &batch, &TempIdResolutions::new());
        assert_eq!(merged.sequence.len(), 3);
        assert!(merged.resolutions.is_empty());
    }

    #[test]
    fn test_merge_log_requires_matching_parent() {
        let current = vec![Message::user("temp-a", "same").with_parent("p1")];
        let batch = vec![Message::user("real", "same").with_parent("p2")];

        let merged = merge_log(&current, &batch, &TempIdResolutions::new());
        assert_eq!(merged.sequence.len(), 2);
        assert!(merged.resolutions.is_empty());
    }

    #[test]
    fn test_merge_log_only_resolves_user_messages() {
        let current = vec![Message::assistant("temp-a", "same")];
        let batch = vec![Message::assistant("real", "same")];

        let merged = merge_log(&current, &batch, &TempIdResolutions::new());
        assert_eq!(merged.sequence.len(), 2);
    }

    #[test]
    fn test_merge_log_duplicate_delivery_is_idempotent() {
        let batch = vec![
            Message::user("u1", "q").as_root().from_source(Source::Log),
            Message::assistant("a1", "r").with_parent("u1").from_source(Source::Log),
        ];
        let once = merge_log(&[], &batch, &TempIdResolutions::new());
        let twice = merge_log(&once.sequence, &batch, &once.resolutions);
        assert_eq!(twice.sequence, once.sequence);
    }

    #[test]
    fn test_merge_log_drops_entries_without_identifier() {
        let batch = vec![Message::new(Role::User, "anonymous")];
        let merged = merge_log(&[], &batch, &TempIdResolutions::new());
        assert!(merged.sequence.is_empty());
    }

    #[test]
    fn test_merge_log_reorders_late_parent() {
        let current = vec![Message::assistant("a1", "reply").with_parent("u1")];
        let batch = vec![Message::user("u1", "question").as_root()];

        let merged = merge_log(&current, &batch, &TempIdResolutions::new());
        assert_eq!(ids(&merged.sequence), vec!["u1", "a1"]);
    }

    #[test]
    fn test_merge_stream_identifier_match() {
        let current = vec![
            Message::user("u1", "q").as_root(),
            Message::assistant("a1", "par").with_parent("u1"),
        ];
        let update = Message::assistant("a1", "partial").with_parent("u1");

        let merged = merge_stream(&current, update, &TempIdResolutions::new());
        assert_eq!(merged.index, Some(1));
        assert_eq!(merged.sequence[1].content, Content::text("partial"));
        assert_eq!(merged.matched_temp_id, None);
    }

    #[test]
    fn test_merge_stream_maps_resolved_temp_echo() {
        let current = vec![Message::user("real", "hi").from_source(Source::Log)];
        let mut res = TempIdResolutions::new();
        res.insert("temp-1", "real");

        let merged = merge_stream(&current, Message::user("temp-1", "hi"), &res);
        assert_eq!(merged.sequence.len(), 1);
        assert_eq!(merged.index, Some(0));
        assert_eq!(merged.sequence[0].source, Source::Log);
    }

    #[test]
    fn test_merge_stream_resolves_by_parent() {
        let current = vec![
            Message::user("temp-a", "test 123").with_parent("p1"),
            Message::user("temp-b", "test 123").with_parent("p2"),
        ];
        let echo = Message::user("real", "test 123").with_parent("p2");

        let merged = merge_stream(&current, echo, &TempIdResolutions::new());
        assert_eq!(merged.matched_temp_id.as_deref(), Some("temp-b"));
        assert_eq!(merged.sequence.len(), 2);
        assert!(merged.sequence.iter().any(|m| m.canonical_id() == Some("temp-a")));
        let idx = merged.index.unwrap();
        assert_eq!(merged.sequence[idx].canonical_id(), Some("real"));
    }

    #[test]
    fn test_merge_stream_single_candidate_without_parent() {
        let current = vec![Message::user("temp-a", "only one").with_parent("p1")];
        let echo = Message::user("real", "only one");

        let merged = merge_stream(&current, echo, &TempIdResolutions::new());
        assert_eq!(merged.matched_temp_id.as_deref(), Some("temp-a"));
        assert_eq!(ids(&merged.sequence), vec!["real"]);
        // the pending record knew its parent, the echo did not
        assert_eq!(merged.sequence[0].parent_ref, ParentRef::id("p1"));
    }

    #[test]
    fn test_merge_stream_ambiguous_without_parent_appends() {
        let current = vec![
            Message::user("temp-a", "test 123").with_parent("p1"),
            Message::user("temp-b", "test 123").with_parent("p2"),
        ];
        let echo = Message::user("real", "test 123");

        let merged = merge_stream(&current, echo, &TempIdResolutions::new());
        assert_eq!(merged.matched_temp_id, None);
        assert_eq!(merged.sequence.len(), 3);
        assert_eq!(merged.index, Some(2));
    }

    #[test]
    fn test_merge_log_folds_temp_into_appended_echo() {
        let current = vec![
            Message::user("p1", "one").as_root().from_source(Source::Log),
            Message::user("p2", "two").as_root().from_source(Source::Log),
            Message::user("temp-a", "test 123").with_parent("p1"),
            Message::user("temp-b", "test 123").with_parent("p2"),
            Message::assistant("a-b", "reply").with_parent("temp-b"),
        ];
        let res = TempIdResolutions::new();

        // the echo carries no parent, so it cannot pick a candidate
        let echoed = merge_stream(&current, Message::user("real-b", "test 123"), &res);
        assert_eq!(echoed.sequence.len(), 6);

        let batch = vec![Message::user("real-b", "test 123").with_parent("p2")];
        let merged = merge_log(&echoed.sequence, &batch, &res);

        assert_eq!(ids(&merged.sequence), vec!["p1", "temp-a", "p2", "real-b", "a-b"]);
        assert_eq!(merged.resolutions.get("temp-b"), Some("real-b"));
        assert_eq!(merged.resolutions.get("temp-a"), None);
        let real = &merged.sequence[3];
        assert_eq!(real.source, Source::Log);
        assert_eq!(real.parent_ref, ParentRef::id("p2"));
        assert_eq!(merged.sequence[4].parent_ref, ParentRef::id("real-b"));
    }

    #[test]
    fn test_merge_stream_rewrites_children_of_resolved_temp() {
        let current = vec![
            Message::user("temp-a", "q"),
            Message::assistant("a1", vec![ContentBlock::text("r")]).with_parent("temp-a"),
        ];
        let echo = Message::user("real", "q");

        let merged = merge_stream(&current, echo, &TempIdResolutions::new());
        assert_eq!(ids(&merged.sequence), vec!["real", "a1"]);
        assert_eq!(merged.sequence[1].parent_ref, ParentRef::id("real"));
    }

    #[test]
    fn test_merge_stream_drops_entry_without_identifier() {
        let current = vec![Message::user("u1", "q")];
        let merged = merge_stream(&current, Message::new(Role::Assistant, "?"), &TempIdResolutions::new());
        assert_eq!(merged.sequence, current);
        assert_eq!(merged.index, None);
    }

    #[test]
    fn test_merge_stream_index_after_reorder() {
        let current = vec![Message::assistant("a1", "r").with_parent("u1")];
        let merged = merge_stream(
            &current,
            Message::user("u1", "q").as_root(),
            &TempIdResolutions::new(),
        );
        assert_eq!(ids(&merged.sequence), vec!["u1", "a1"]);
        assert_eq!(merged.index, Some(0));
    }
}

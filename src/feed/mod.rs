//! Conversation feeds and registry
//!
//! A feed delivers raw entries to the reconciliation engine: log catch-up
//! batches, single live updates and orphan signals. Delivery is
//! at-least-once and not necessarily ordered; the engine tolerates both.
//! Every event comes with a resume [`Cursor`] so a later subscription can
//! pick up where the previous one stopped.
//!
//! Feeds:
//! - ClaudeCode: session logs under ~/.claude/projects (log catch-up)
//! - Capture: recorded live sessions, replayed event by event

mod capture;
mod claudecode;
pub mod parse;

pub use capture::CaptureFeed;
pub use claudecode::ClaudeCodeFeed;
pub use parse::ParseError;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::Message;
use crate::Config;

/// Reference to a session's source location
#[derive(Debug, Clone)]
pub struct SessionRef {
    pub id: String,
    pub source_path: PathBuf,
}

/// Resume position within a JSONL source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Byte offset of the next unread line
    pub byte_offset: u64,
    /// Number of lines consumed so far
    pub line_number: u32,
}

/// Tool calls the environment knows were abandoned
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrphanSignal {
    /// Message to attach the ids to; the message holding each tool_use otherwise
    pub message_id: Option<String>,
    pub tool_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Ground truth for a range of the log, delivered as a unit
    LogBatch(Vec<Message>),
    /// One stream-sourced record
    Live(Message),
    Orphaned(OrphanSignal),
}

/// Receiver of feed events. Each call runs to completion before the next.
pub trait FeedHandler {
    fn handle(&mut self, cursor: Cursor, event: FeedEvent);
}

/// Outcome of one subscription run
#[derive(Debug, Clone)]
pub struct Subscription {
    pub session_id: String,
    /// Position after the last consumed line
    pub cursor: Cursor,
    /// Events handed to the handler
    pub delivered: usize,
    /// Lines dropped as malformed
    pub dropped: usize,
}

impl Subscription {
    fn new(session_id: &str, cursor: Cursor) -> Self {
        Self {
            session_id: session_id.to_string(),
            cursor,
            delivered: 0,
            dropped: 0,
        }
    }
}

/// Stream adapter trait
pub trait LiveFeed: Send + Sync {
    /// Unique identifier: "{provider}:{source}"
    fn id(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Check if this feed's data source exists
    fn is_available(&self) -> bool;

    /// Discover sessions this feed can deliver
    fn discover(&self) -> Result<Vec<SessionRef>>;

    /// Deliver every event after `resume` to `handler`
    fn subscribe(
        &self,
        session: &SessionRef,
        resume: Option<Cursor>,
        handler: &mut dyn FeedHandler,
    ) -> Result<Subscription>;
}

/// Line reader that tracks a resumable [`Cursor`].
///
/// A trailing line without a newline is treated as still being written and
/// is left for the next subscription.
pub(crate) struct JsonlReader {
    reader: BufReader<File>,
    cursor: Cursor,
    invalid: usize,
}

impl JsonlReader {
    pub(crate) fn open(path: &Path, resume: Option<Cursor>) -> Result<Self> {
        let cursor = resume.unwrap_or_default();
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open feed file {}", path.display()))?;
        file.seek(SeekFrom::Start(cursor.byte_offset))?;
        Ok(Self {
            reader: BufReader::new(file),
            cursor,
            invalid: 0,
        })
    }

    /// Next complete line and the cursor just past it.
    ///
    /// Lines that are not valid UTF-8 are skipped with a warning and counted
    /// in [`JsonlReader::invalid_lines`]; the cursor still moves past them.
    pub(crate) fn next_line(&mut self) -> Result<Option<(Cursor, String)>> {
        loop {
            let mut buf = Vec::new();
            let read = self.reader.read_until(b'\n', &mut buf)?;
            if read == 0 || buf.last() != Some(&b'\n') {
                return Ok(None);
            }

            self.cursor.byte_offset += read as u64;
            self.cursor.line_number += 1;

            match String::from_utf8(buf) {
                Ok(line) => return Ok(Some((self.cursor, line))),
                Err(e) => {
                    warn!(line = self.cursor.line_number, error = %e, "skipping line that is not valid UTF-8");
                    self.invalid += 1;
                }
            }
        }
    }

    pub(crate) fn invalid_lines(&self) -> usize {
        self.invalid
    }

    pub(crate) fn cursor(&self) -> Cursor {
        self.cursor
    }
}

/// Registry of configured feeds
pub struct FeedRegistry {
    feeds: Vec<Box<dyn LiveFeed>>,
}

impl FeedRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self { feeds: vec![] };

        if config.is_feed_enabled(ClaudeCodeFeed::ID) {
            let claudecode =
                ClaudeCodeFeed::new(config.feed_path(ClaudeCodeFeed::ID), config.replay.batch_size);
            registry.register(Box::new(claudecode));
        }

        if config.is_feed_enabled(CaptureFeed::ID) {
            let capture = CaptureFeed::new(config.feed_path(CaptureFeed::ID));
            registry.register(Box::new(capture));
        }

        registry
    }

    pub fn register(&mut self, feed: Box<dyn LiveFeed>) {
        self.feeds.push(feed);
    }

    pub fn available_feeds(&self) -> Vec<&dyn LiveFeed> {
        self.feeds
            .iter()
            .filter(|f| f.is_available())
            .map(|f| f.as_ref())
            .collect()
    }

    pub fn all_feeds(&self) -> Vec<&dyn LiveFeed> {
        self.feeds.iter().map(|f| f.as_ref()).collect()
    }

    pub fn get_feed(&self, id: &str) -> Option<&dyn LiveFeed> {
        self.feeds
            .iter()
            .find(|f| f.id() == id)
            .map(|f| f.as_ref())
    }

    /// Find a session by id prefix across available feeds
    pub fn find_session(&self, query: &str) -> Result<Option<(&dyn LiveFeed, SessionRef)>> {
        for feed in self.available_feeds() {
            if let Some(session) = feed
                .discover()?
                .into_iter()
                .find(|s| s.id.starts_with(query))
            {
                return Ok(Some((feed, session)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reader_resumes_and_skips_partial_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first\nsecond\r\nthird-partial").unwrap();

        let mut reader = JsonlReader::open(file.path(), None).unwrap();
        let (c1, l1) = reader.next_line().unwrap().unwrap();
        assert_eq!(l1.trim_end(), "first");
        assert_eq!(c1, Cursor { byte_offset: 6, line_number: 1 });

        let (c2, l2) = reader.next_line().unwrap().unwrap();
        assert_eq!(l2.trim_end(), "second");
        assert_eq!(c2.byte_offset, 14);
        assert!(reader.next_line().unwrap().is_none());
        assert_eq!(reader.cursor(), c2);

        // finish the partial line and resume
        write!(file, "\n").unwrap();
        let mut resumed = JsonlReader::open(file.path(), Some(c2)).unwrap();
        let (c3, l3) = resumed.next_line().unwrap().unwrap();
        assert_eq!(l3.trim_end(), "third-partial");
        assert_eq!(c3.line_number, 3);
        assert!(resumed.next_line().unwrap().is_none());
    }

    #[test]
    fn test_reader_skips_invalid_utf8_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"a\":1}\n\xff\xfe garbage\n{\"b\":2}\n").unwrap();

        let mut reader = JsonlReader::open(file.path(), None).unwrap();
        let (_, first) = reader.next_line().unwrap().unwrap();
        assert_eq!(first.trim_end(), r#"{"a":1}"#);

        let (cursor, second) = reader.next_line().unwrap().unwrap();
        assert_eq!(second.trim_end(), r#"{"b":2}"#);
        assert_eq!(cursor.line_number, 3);
        assert_eq!(cursor.byte_offset, 27);
        assert_eq!(reader.invalid_lines(), 1);
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn test_registry_respects_config() {
        let mut config = Config::default();
        config.feeds.insert(
            CaptureFeed::ID.to_string(),
            crate::config::FeedConfig {
                enabled: false,
                status: None,
                base_path: None,
            },
        );
        let registry = FeedRegistry::new(&config);
        assert!(registry.get_feed(ClaudeCodeFeed::ID).is_some());
        assert!(registry.get_feed(CaptureFeed::ID).is_none());
        assert_eq!(registry.all_feeds().len(), 1);
    }
}

//! Claude Code log feed
//!
//! Replays the persisted conversation log written by the Claude Code CLI.
//! Data format: JSONL files in ~/.claude/projects/<project_hash>/<session_id>.jsonl
//!
//! Every line is log-sourced ground truth. Lines are delivered as catch-up
//! batches of `batch_size` entries; a resumed subscription starts after the
//! last fully written line it has already delivered.

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::parse::parse_line;
use super::{Cursor, FeedEvent, FeedHandler, JsonlReader, LiveFeed, SessionRef, Subscription};
use crate::model::Source;

pub struct ClaudeCodeFeed {
    base_path: PathBuf,
    batch_size: usize,
}

impl ClaudeCodeFeed {
    pub const ID: &'static str = "claude:ClaudeCode";

    pub fn new(custom_path: Option<PathBuf>, batch_size: usize) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".claude/projects")
        });
        Self {
            base_path,
            batch_size: batch_size.max(1),
        }
    }
}

impl LiveFeed for ClaudeCodeFeed {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Claude Code CLI session logs"
    }

    fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn discover(&self) -> Result<Vec<SessionRef>> {
        let mut sessions = vec![];

        if !self.base_path.exists() {
            return Ok(sessions);
        }

        for project_entry in std::fs::read_dir(&self.base_path)? {
            let project_dir = project_entry?.path();
            if !project_dir.is_dir() {
                continue;
            }

            for file_entry in std::fs::read_dir(&project_dir)? {
                let file_path = file_entry?.path();
                let is_log = file_path.extension().map(|e| e == "jsonl").unwrap_or(false)
                    && !file_path.to_string_lossy().ends_with(".capture.jsonl");
                if !is_log {
                    continue;
                }

                let session_id = file_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string();

                sessions.push(SessionRef {
                    id: session_id,
                    source_path: file_path,
                });
            }
        }

        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    fn subscribe(
        &self,
        session: &SessionRef,
        resume: Option<Cursor>,
        handler: &mut dyn FeedHandler,
    ) -> Result<Subscription> {
        let mut reader = JsonlReader::open(&session.source_path, resume)?;
        let mut subscription = Subscription::new(&session.id, reader.cursor());
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some((cursor, line)) = reader.next_line()? {
            subscription.cursor = cursor;

            if line.trim().is_empty() {
                continue;
            }

            match parse_line(&line, Source::Log) {
                Ok(Some(message)) => batch.push(message),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        session = %session.id,
                        line = cursor.line_number,
                        error = %e,
                        "dropping malformed log line"
                    );
                    subscription.dropped += 1;
                }
            }

            if batch.len() >= self.batch_size {
                handler.handle(cursor, FeedEvent::LogBatch(std::mem::take(&mut batch)));
                subscription.delivered += 1;
            }
        }

        subscription.cursor = reader.cursor();
        subscription.dropped += reader.invalid_lines();

        if !batch.is_empty() {
            handler.handle(subscription.cursor, FeedEvent::LogBatch(batch));
            subscription.delivered += 1;
        }

        debug!(
            session = %session.id,
            delivered = subscription.delivered,
            dropped = subscription.dropped,
            "log catch-up finished"
        );
        Ok(subscription)
    }
}

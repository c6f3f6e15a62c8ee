//! Capture feed
//!
//! Replays a recorded live session event by event, reproducing the arrival
//! order the client saw (replies before the log, duplicate echoes, late
//! orphan signals). Data format: `*.capture.jsonl`, one event per line:
//!
//! ```text
//! {"kind":"live","entry":{...}}
//! {"kind":"log","entries":[{...}, ...]}
//! {"kind":"orphaned","messageId":"...","toolIds":["..."]}
//! ```
//!
//! Entries use the same record shape as the Claude Code log.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

use super::parse::{parse_entry, ParseError};
use super::{Cursor, FeedEvent, FeedHandler, JsonlReader, LiveFeed, OrphanSignal, SessionRef, Subscription};
use crate::model::{Message, Source};

const SUFFIX: &str = ".capture.jsonl";

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CaptureRecord {
    Live {
        entry: Value,
    },
    Log {
        #[serde(default)]
        entries: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Orphaned {
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        tool_ids: Vec<String>,
    },
}

pub struct CaptureFeed {
    base_path: PathBuf,
}

impl CaptureFeed {
    pub const ID: &'static str = "capture:Capture";

    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".local/share/threadline/captures")
        });
        Self { base_path }
    }
}

impl LiveFeed for CaptureFeed {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Recorded live sessions"
    }

    fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn discover(&self) -> Result<Vec<SessionRef>> {
        if !self.base_path.exists() {
            return Ok(vec![]);
        }

        let pattern = format!("{}/**/*{}", self.base_path.display(), SUFFIX);
        let mut sessions = vec![];
        for entry in glob::glob(&pattern).context("Invalid capture search pattern")? {
            let path = entry?;
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let id = name.trim_end_matches(SUFFIX).to_string();
            sessions.push(SessionRef {
                id,
                source_path: path,
            });
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

        while let Some((cursor, line)) = reader.next_line()? {
            subscription.cursor = cursor;

            if line.trim().is_empty() {
                continue;
            }

            let record: CaptureRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(session = %session.id, line = cursor.line_number, error = %e, "dropping malformed capture line");
                    subscription.dropped += 1;
                    continue;
                }
            };

            let event = match record {
                CaptureRecord::Live { entry } => match parse_entry(&entry, Source::Stream) {
                    Ok(Some(message)) => FeedEvent::Live(message),
                    Ok(None) => continue,
                    Err(e) => {
                        log_dropped(&session.id, cursor, &e);
                        subscription.dropped += 1;
                        continue;
                    }
                },
                CaptureRecord::Log { entries } => {
                    let mut batch: Vec<Message> = Vec::with_capacity(entries.len());
                    for entry in &entries {
                        match parse_entry(entry, Source::Log) {
                            Ok(Some(message)) => batch.push(message),
                            Ok(None) => {}
                            Err(e) => {
                                log_dropped(&session.id, cursor, &e);
                                subscription.dropped += 1;
                            }
                        }
                    }
                    FeedEvent::LogBatch(batch)
                }
                CaptureRecord::Orphaned {
                    message_id,
                    tool_ids,
                } => FeedEvent::Orphaned(OrphanSignal {
                    message_id,
                    tool_ids,
                }),
            };

            handler.handle(cursor, event);
            subscription.delivered += 1;
        }

        subscription.cursor = reader.cursor();
        subscription.dropped += reader.invalid_lines();
        Ok(subscription)
    }
}

fn log_dropped(session: &str, cursor: Cursor, error: &ParseError) {
    warn!(session, line = cursor.line_number, error = %error, "dropping malformed capture entry");
}

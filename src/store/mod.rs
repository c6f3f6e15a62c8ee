//! Snapshot storage with SQLite
//!
//! Persists what a [`Conversation`] needs to survive a restart: the feed
//! cursor, the temp-id resolution map and the reconciled sequence.

mod schema;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;

use crate::conversation::Conversation;
use crate::engine::TempIdResolutions;
use crate::feed::{Cursor, SessionRef};
use crate::model::Message;

pub use schema::SCHEMA;

pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open snapshot database {}", path.display()))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, nothing is written to disk
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ============================================
    // SESSIONS
    // ============================================

    /// Record a feed session; returns the stored session id
    pub fn upsert_session(
        &self,
        feed_id: &str,
        session: &SessionRef,
        conversation: &Conversation,
    ) -> Result<String> {
        let session_id = format!("{}:{}", feed_id, session.id);
        let cursor = conversation.cursor();

        self.conn.execute(
            r#"INSERT INTO sessions
               (id, feed_id, external_id, source_path, cursor_offset, cursor_line,
                message_count, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))
               ON CONFLICT(id) DO UPDATE SET
                   source_path = excluded.source_path,
                   cursor_offset = excluded.cursor_offset,
                   cursor_line = excluded.cursor_line,
                   message_count = excluded.message_count,
                   updated_at = datetime('now')"#,
            params![
                session_id,
                feed_id,
                session.id,
                session.source_path.to_string_lossy().to_string(),
                cursor.map(|c| c.byte_offset as i64),
                cursor.map(|c| c.line_number as i64),
                conversation.messages().len() as i64,
            ],
        )?;

        Ok(session_id)
    }

    // ============================================
    // SNAPSHOTS
    // ============================================

    /// Replace the stored snapshot of a session with the conversation's state
    pub fn save_conversation(&self, session_id: &str, conversation: &Conversation) -> Result<()> {
        let sequence_json = serde_json::to_string(conversation.messages())
            .context("Failed to serialize message sequence")?;
        let cursor = conversation.cursor();

        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM temp_resolutions WHERE session_id = ?",
            params![session_id],
        )?;
        for (temp_id, permanent_id) in conversation.resolutions().iter() {
            tx.execute(
                "INSERT INTO temp_resolutions (session_id, temp_id, permanent_id) VALUES (?, ?, ?)",
                params![session_id, temp_id, permanent_id],
            )?;
        }

        tx.execute(
            r#"INSERT OR REPLACE INTO snapshots (session_id, sequence_json, updated_at)
               VALUES (?, ?, datetime('now'))"#,
            params![session_id, sequence_json],
        )?;

        tx.execute(
            r#"UPDATE sessions
               SET cursor_offset = ?, cursor_line = ?, message_count = ?, updated_at = datetime('now')
               WHERE id = ?"#,
            params![
                cursor.map(|c| c.byte_offset as i64),
                cursor.map(|c| c.line_number as i64),
                conversation.messages().len() as i64,
                session_id,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Rebuild a conversation from its snapshot; `None` if never saved
    pub fn load_conversation(&self, session_id: &str) -> Result<Option<Conversation>> {
        let row = self.conn.query_row(
            r#"SELECT sn.sequence_json, s.cursor_offset, s.cursor_line
               FROM snapshots sn
               JOIN sessions s ON s.id = sn.session_id
               WHERE sn.session_id = ?"#,
            params![session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        );

        let (sequence_json, offset, line) = match row {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let messages: Vec<Message> = serde_json::from_str(&sequence_json)
            .with_context(|| format!("Corrupt snapshot for session {}", session_id))?;
        let resolutions = self.get_resolutions(session_id)?;
        let cursor = match (offset, line) {
            (Some(offset), Some(line)) => Some(Cursor {
                byte_offset: offset as u64,
                line_number: line as u32,
            }),
            _ => None,
        };

        Ok(Some(Conversation::restore(messages, resolutions, cursor)))
    }

    pub fn get_resolutions(&self, session_id: &str) -> Result<TempIdResolutions> {
        let mut stmt = self.conn.prepare(
            "SELECT temp_id, permanent_id FROM temp_resolutions WHERE session_id = ? ORDER BY temp_id",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        rows.collect::<Result<TempIdResolutions, _>>().map_err(Into::into)
    }

    // ============================================
    // QUERIES
    // ============================================

    pub fn list_sessions(&self, feed: Option<&str>) -> Result<Vec<SessionRow>> {
        let base_query = r#"SELECT s.id, s.feed_id, s.external_id, s.source_path,
                      s.cursor_offset, s.cursor_line, s.message_count, s.updated_at,
                      (SELECT COUNT(*) FROM temp_resolutions r WHERE r.session_id = s.id)
               FROM sessions s"#;

        let rows = match feed {
            Some(feed_id) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{} WHERE s.feed_id = ?1 ORDER BY s.updated_at DESC",
                    base_query
                ))?;
                let rows = stmt
                    .query_map(params![feed_id], map_session_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{} ORDER BY s.updated_at DESC", base_query))?;
                let rows = stmt
                    .query_map([], map_session_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(rows)
    }

    /// Get session by exact id, or by prefix of id or external_id
    pub fn get_session(&self, query: &str) -> Result<Option<SessionRow>> {
        let row = self.conn.query_row(
            r#"SELECT s.id, s.feed_id, s.external_id, s.source_path,
                      s.cursor_offset, s.cursor_line, s.message_count, s.updated_at,
                      (SELECT COUNT(*) FROM temp_resolutions r WHERE r.session_id = s.id)
               FROM sessions s
               WHERE s.id = ?1 OR s.external_id = ?1
                  OR s.id LIKE ?2 OR s.external_id LIKE ?2
               ORDER BY
                   CASE WHEN s.id = ?1 OR s.external_id = ?1 THEN 0 ELSE 1 END,
                   s.updated_at DESC
               LIMIT 1"#,
            params![query, format!("{}%", query)],
            map_session_row,
        );

        match row {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn map_session_row(row: &rusqlite::Row) -> rusqlite::Result<SessionRow> {
    let offset: Option<i64> = row.get(4)?;
    let line: Option<i64> = row.get(5)?;
    Ok(SessionRow {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        external_id: row.get(2)?,
        source_path: row.get(3)?,
        cursor: match (offset, line) {
            (Some(offset), Some(line)) => Some(Cursor {
                byte_offset: offset as u64,
                line_number: line as u32,
            }),
            _ => None,
        },
        message_count: row.get(6)?,
        updated_at: row.get(7)?,
        resolution_count: row.get(8)?,
    })
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug)]
pub struct SessionRow {
    pub id: String,
    pub feed_id: String,
    pub external_id: String,
    pub source_path: String,
    pub cursor: Option<Cursor>,
    pub message_count: i64,
    pub updated_at: Option<String>,
    pub resolution_count: i64,
}

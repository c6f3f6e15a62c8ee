//! SQLite schema for conversation snapshots
//!
//! - sessions: one row per feed session, with the feed resume cursor
//! - temp_resolutions: temporary id -> permanent id, per session
//! - snapshots: the reconciled sequence as JSON

pub const SCHEMA: &str = r#"
-- ============================================
-- SESSIONS
-- ============================================

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,                   -- '<feed_id>:<external_id>'
    feed_id TEXT NOT NULL,                 -- 'claude:ClaudeCode', 'capture:Capture'
    external_id TEXT NOT NULL,             -- Session id as reported by the feed
    source_path TEXT NOT NULL,
    cursor_offset INTEGER,                 -- Byte offset of the next unread line
    cursor_line INTEGER,                   -- Lines consumed so far
    message_count INTEGER DEFAULT 0,
    updated_at DATETIME
);

-- ============================================
-- TEMP ID RESOLUTIONS
-- ============================================

CREATE TABLE IF NOT EXISTS temp_resolutions (
    session_id TEXT NOT NULL,
    temp_id TEXT NOT NULL,
    permanent_id TEXT NOT NULL,
    PRIMARY KEY(session_id, temp_id),
    FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

-- ============================================
-- SNAPSHOTS
-- ============================================

CREATE TABLE IF NOT EXISTS snapshots (
    session_id TEXT PRIMARY KEY,
    sequence_json TEXT NOT NULL,           -- Ordered message sequence
    updated_at DATETIME,
    FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_sessions_feed ON sessions(feed_id);
CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_external ON sessions(external_id);
"#;

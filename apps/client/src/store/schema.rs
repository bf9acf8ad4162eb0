//! SQLite schema for the local log store.

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema for the on-device database.
pub const SCHEMA: &str = r#"
-- Canonical practice log
CREATE TABLE IF NOT EXISTS log_entries (
    id TEXT PRIMARY KEY,
    qid TEXT NOT NULL,
    result TEXT,
    time_spent_seconds INTEGER NOT NULL DEFAULT 0,
    difficulty INTEGER NOT NULL DEFAULT 0,
    predicted_difficulty INTEGER NOT NULL DEFAULT 0,
    note TEXT NOT NULL DEFAULT '',
    practiced_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    device_id TEXT NOT NULL DEFAULT '',
    question_bank_hash TEXT NOT NULL DEFAULT '',
    question_bank_version TEXT NOT NULL DEFAULT ''
);

-- Paused practice session, at most one
CREATE TABLE IF NOT EXISTS session_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Per-install device identity
CREATE TABLE IF NOT EXISTS device (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    device_id TEXT NOT NULL
);

-- Sync metadata and preferences
CREATE TABLE IF NOT EXISTS sync_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_sync_at TEXT,
    background_sync INTEGER NOT NULL DEFAULT 0,
    bank_version TEXT,
    bank_hash TEXT,
    bank_count INTEGER
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_log_entries_qid ON log_entries(qid);
CREATE INDEX IF NOT EXISTS idx_log_entries_updated ON log_entries(updated_at);
"#;

/// Initialize sync metadata if not exists.
pub const INIT_SYNC_META: &str = r#"
INSERT OR IGNORE INTO sync_meta (id, background_sync) VALUES (1, 0);
"#;

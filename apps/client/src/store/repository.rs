//! SQLite persistence for the local log store.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use drill_core::{LogEntry, PracticeResult, QuestionBankFingerprint, SessionState};

use crate::store::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// Raw row as read from `log_entries`, before validation.
struct RawEntryRow {
    id: String,
    qid: String,
    result: Option<String>,
    time_spent_seconds: i64,
    difficulty: i64,
    predicted_difficulty: i64,
    note: String,
    practiced_at: String,
    updated_at: String,
    device_id: String,
    question_bank_hash: String,
    question_bank_version: String,
}

/// Low-level repository over the on-device database.
pub struct LogRepository {
    conn: Connection,
}

impl LogRepository {
    /// Open database at path, creating if necessary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let repo = Self { conn };
        repo.initialize()?;
        Ok(repo)
    }

    /// Open in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self { conn };
        repo.initialize()?;
        Ok(repo)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(super::schema::SCHEMA)?;
        self.conn.execute_batch(super::schema::INIT_SYNC_META)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![super::schema::SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Load all log entries, skipping rows that no longer decode.
    ///
    /// Malformed persisted data must not take the whole log down; bad rows
    /// are logged and dropped, everything else is normalized.
    pub fn load_entries(&self) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, qid, result, time_spent_seconds, difficulty, predicted_difficulty,
                    note, practiced_at, updated_at, device_id, question_bank_hash,
                    question_bank_version
             FROM log_entries",
        )?;

        let raw_rows = stmt.query_map([], |row| {
            Ok(RawEntryRow {
                id: row.get(0)?,
                qid: row.get(1)?,
                result: row.get(2)?,
                time_spent_seconds: row.get(3).unwrap_or(0),
                difficulty: row.get(4).unwrap_or(0),
                predicted_difficulty: row.get(5).unwrap_or(0),
                note: row.get(6).unwrap_or_default(),
                practiced_at: row.get(7)?,
                updated_at: row.get(8)?,
                device_id: row.get(9).unwrap_or_default(),
                question_bank_hash: row.get(10).unwrap_or_default(),
                question_bank_version: row.get(11).unwrap_or_default(),
            })
        })?;

        let mut entries = Vec::new();
        for raw in raw_rows {
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("skipping unreadable log row: {e}");
                    continue;
                }
            };
            match decode_entry(raw) {
                Some(entry) => entries.push(entry),
                None => warn!("skipping log row with unparseable timestamps"),
            }
        }
        Ok(entries)
    }

    pub fn insert_entry(&self, entry: &LogEntry) -> Result<()> {
        exec_entry(&self.conn, INSERT_ENTRY_SQL, entry)?;
        Ok(())
    }

    pub fn update_entry(&self, entry: &LogEntry) -> Result<()> {
        exec_entry(
            &self.conn,
            "UPDATE log_entries SET qid = ?2, result = ?3, time_spent_seconds = ?4,
                 difficulty = ?5, predicted_difficulty = ?6, note = ?7, practiced_at = ?8,
                 updated_at = ?9, device_id = ?10, question_bank_hash = ?11,
                 question_bank_version = ?12
             WHERE id = ?1",
            entry,
        )?;
        Ok(())
    }

    /// Swap the persisted canonical set and session state in one transaction.
    pub fn replace_all(
        &mut self,
        entries: &[LogEntry],
        session: Option<&SessionState>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM log_entries", [])?;
        for entry in entries {
            exec_entry(&tx, INSERT_ENTRY_SQL, entry)?;
        }
        match session {
            Some(session) => {
                let payload = serde_json::to_string(session)
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                tx.execute(
                    "INSERT OR REPLACE INTO session_state (id, payload, updated_at) VALUES (1, ?1, ?2)",
                    params![payload, session.updated_at.to_rfc3339()],
                )?;
            }
            None => {
                tx.execute("DELETE FROM session_state", [])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the paused session, tolerating a corrupt payload.
    pub fn load_session(&self) -> Result<Option<SessionState>> {
        let payload: Option<String> = self
            .conn
            .query_row("SELECT payload FROM session_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(payload.and_then(|p| match serde_json::from_str::<SessionState>(&p) {
            Ok(session) => session.normalize(),
            Err(e) => {
                warn!("discarding corrupt session state: {e}");
                None
            }
        }))
    }

    pub fn save_session(&self, session: &SessionState) -> Result<()> {
        let payload =
            serde_json::to_string(session).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO session_state (id, payload, updated_at) VALUES (1, ?1, ?2)",
            params![payload, session.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn clear_session(&self) -> Result<()> {
        self.conn.execute("DELETE FROM session_state", [])?;
        Ok(())
    }

    /// Per-install device id, created on first use and persisted.
    pub fn device_id(&self) -> Result<String> {
        let existing: Option<String> = self
            .conn
            .query_row("SELECT device_id FROM device WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO device (id, device_id) VALUES (1, ?1)",
            params![id],
        )?;
        Ok(id)
    }

    pub fn background_sync(&self) -> Result<bool> {
        let enabled: i64 = self.conn.query_row(
            "SELECT background_sync FROM sync_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(enabled != 0)
    }

    pub fn set_background_sync(&self, enabled: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_meta SET background_sync = ?1 WHERE id = 1",
            params![enabled as i64],
        )?;
        Ok(())
    }

    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<String> = self.conn.query_row(
            "SELECT last_sync_at FROM sync_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(ts.and_then(|s| parse_rfc3339(&s)))
    }

    /// Bank fingerprint recorded at the end of the last successful sync;
    /// the drift guard's baseline.
    pub fn previous_bank(&self) -> Result<Option<QuestionBankFingerprint>> {
        let row: Option<(Option<String>, Option<String>, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT bank_version, bank_hash, bank_count FROM sync_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(row.and_then(|(version, hash, count)| {
            Some(QuestionBankFingerprint {
                version: version?,
                hash: hash?,
                count: usize::try_from(count?).ok()?,
            })
        }))
    }

    /// Stamp the sync metadata after a successful run.
    pub fn record_sync_success(
        &self,
        bank: &QuestionBankFingerprint,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_meta SET last_sync_at = ?1, bank_version = ?2, bank_hash = ?3,
                 bank_count = ?4 WHERE id = 1",
            params![
                at.to_rfc3339(),
                bank.version,
                bank.hash,
                bank.count as i64
            ],
        )?;
        Ok(())
    }
}

const INSERT_ENTRY_SQL: &str =
    "INSERT INTO log_entries (id, qid, result, time_spent_seconds, difficulty,
         predicted_difficulty, note, practiced_at, updated_at, device_id,
         question_bank_hash, question_bank_version)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

fn exec_entry(conn: &Connection, sql: &str, entry: &LogEntry) -> rusqlite::Result<usize> {
    conn.execute(
        sql,
        params![
            entry.id,
            entry.qid,
            entry.result.map(|r| r.as_str()),
            entry.time_spent_seconds,
            entry.difficulty,
            entry.predicted_difficulty,
            entry.note,
            entry.practiced_at.to_rfc3339(),
            entry.updated_at.to_rfc3339(),
            entry.device_id,
            entry.question_bank_hash,
            entry.question_bank_version,
        ],
    )
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn decode_entry(raw: RawEntryRow) -> Option<LogEntry> {
    let practiced_at = parse_rfc3339(&raw.practiced_at)?;
    let updated_at = parse_rfc3339(&raw.updated_at)?;
    let mut entry = LogEntry {
        id: raw.id,
        qid: raw.qid,
        result: raw.result.as_deref().and_then(PracticeResult::from_str),
        time_spent_seconds: u32::try_from(raw.time_spent_seconds).unwrap_or(0),
        difficulty: u8::try_from(raw.difficulty).unwrap_or(u8::MAX),
        predicted_difficulty: u8::try_from(raw.predicted_difficulty).unwrap_or(u8::MAX),
        note: raw.note,
        practiced_at,
        updated_at,
        device_id: raw.device_id,
        question_bank_hash: raw.question_bank_hash,
        question_bank_version: raw.question_bank_version,
    };
    entry.normalize();
    Some(entry)
}

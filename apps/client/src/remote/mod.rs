//! Remote store adapter: the only component that performs network I/O.

pub mod http;

pub use http::HttpRemoteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drill_core::{LogEntry, PracticeResult, SessionState};

use crate::context::{SyncContext, APP_VERSION, DATA_VERSION};
use crate::error::SyncError;

/// Upper bound on rows per upsert request.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// One `practice_logs` row. Upsert key is `id`; the logical merge key
/// `qid` is enforced by the merge engine, not by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeLogRow {
    pub id: String,
    pub user_id: String,
    pub qid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub time_spent: i64,
    pub difficulty: i64,
    pub predicted_difficulty: i64,
    pub note: String,
    pub practiced_at: DateTime<Utc>,
    pub device_id: String,
    pub question_bank_version: String,
    pub question_bank_hash: String,
    pub app_version: String,
    pub data_version: i64,
    pub updated_at: DateTime<Utc>,
}

impl PracticeLogRow {
    pub fn from_entry(entry: &LogEntry, ctx: &SyncContext) -> Self {
        Self {
            id: entry.id.clone(),
            user_id: ctx.user_id.clone(),
            qid: entry.qid.clone(),
            result: entry.result.map(|r| r.as_str().to_string()),
            time_spent: i64::from(entry.time_spent_seconds),
            difficulty: i64::from(entry.difficulty),
            predicted_difficulty: i64::from(entry.predicted_difficulty),
            note: entry.note.clone(),
            practiced_at: entry.practiced_at,
            device_id: entry.device_id.clone(),
            question_bank_version: entry.question_bank_version.clone(),
            question_bank_hash: entry.question_bank_hash.clone(),
            app_version: APP_VERSION.to_string(),
            data_version: DATA_VERSION,
            updated_at: entry.updated_at,
        }
    }

    /// Decode into a normalized entry. Out-of-range numerics collapse to
    /// their unset sentinels rather than failing the row.
    pub fn into_entry(self) -> LogEntry {
        let mut entry = LogEntry {
            id: self.id,
            qid: self.qid,
            result: self.result.as_deref().and_then(PracticeResult::from_str),
            time_spent_seconds: u32::try_from(self.time_spent).unwrap_or(0),
            difficulty: u8::try_from(self.difficulty).unwrap_or(u8::MAX),
            predicted_difficulty: u8::try_from(self.predicted_difficulty).unwrap_or(u8::MAX),
            note: self.note,
            practiced_at: self.practiced_at,
            updated_at: self.updated_at,
            device_id: self.device_id,
            question_bank_hash: self.question_bank_hash,
            question_bank_version: self.question_bank_version,
        };
        entry.normalize();
        entry
    }
}

/// The single `session_state` row per user. Upsert key is `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateRow {
    pub user_id: String,
    pub payload: serde_json::Value,
    pub question_bank_version: String,
    pub question_bank_hash: String,
    pub app_version: String,
    pub data_version: i64,
    pub updated_at: DateTime<Utc>,
}

impl SessionStateRow {
    pub fn from_session(session: &SessionState, ctx: &SyncContext) -> Self {
        Self {
            user_id: ctx.user_id.clone(),
            payload: serde_json::to_value(session).unwrap_or(serde_json::Value::Null),
            question_bank_version: ctx.bank.version.clone(),
            question_bank_hash: ctx.bank.hash.clone(),
            app_version: APP_VERSION.to_string(),
            data_version: DATA_VERSION,
            updated_at: session.updated_at,
        }
    }

    /// Decode the opaque payload, discarding it when it no longer parses.
    pub fn into_session(self) -> Option<SessionState> {
        serde_json::from_value::<SessionState>(self.payload)
            .ok()
            .and_then(SessionState::normalize)
    }
}

/// Everything the remote store holds for one user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteSnapshot {
    pub practice_logs: Vec<PracticeLogRow>,
    pub session_state: Option<SessionStateRow>,
}

/// Interface to the shared backend. Stateless channel: owns no data,
/// propagates transport/auth errors unchanged.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap reachability probe; `false` defers the sync attempt.
    async fn check_connectivity(&self) -> bool;

    /// All rows for a user.
    async fn fetch_all(&self, user_id: &str) -> Result<RemoteSnapshot, SyncError>;

    /// Batched idempotent upsert keyed by row id. Implementations cap the
    /// batch size and recover from unresolvable key conflicts themselves.
    async fn upsert_entries(
        &self,
        user_id: &str,
        rows: Vec<PracticeLogRow>,
    ) -> Result<(), SyncError>;

    async fn upsert_session_state(&self, row: SessionStateRow) -> Result<(), SyncError>;

    async fn delete_session_state(&self, user_id: &str) -> Result<(), SyncError>;
}

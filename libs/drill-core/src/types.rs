//! Core types for the practice log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest difficulty rating; 0 means "not rated".
pub const MAX_DIFFICULTY: u8 = 5;

/// Outcome of one practice event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeResult {
    Correct,
    Incorrect,
    Skipped,
    Browse,
    NoteOnly,
}

impl PracticeResult {
    /// Get the result name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
            Self::Skipped => "skipped",
            Self::Browse => "browse",
            Self::NoteOnly => "note_only",
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "correct" => Some(Self::Correct),
            "incorrect" => Some(Self::Incorrect),
            "skipped" => Some(Self::Skipped),
            "browse" => Some(Self::Browse),
            "note_only" => Some(Self::NoteOnly),
            _ => None,
        }
    }
}

/// One practice/browse/note event for one question.
///
/// `updated_at` is the last-write-wins discriminator during merge;
/// `practiced_at` is the business time of the event itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub qid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PracticeResult>,
    pub time_spent_seconds: u32,
    pub difficulty: u8,
    pub predicted_difficulty: u8,
    pub note: String,
    pub practiced_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub device_id: String,
    pub question_bank_hash: String,
    pub question_bank_version: String,
}

impl LogEntry {
    /// Create a minimal entry for a question, stamped with the current time.
    pub fn new(qid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            qid: qid.into(),
            result: None,
            time_spent_seconds: 0,
            difficulty: 0,
            predicted_difficulty: 0,
            note: String::new(),
            practiced_at: now,
            updated_at: now,
            device_id: String::new(),
            question_bank_hash: String::new(),
            question_bank_version: String::new(),
        }
    }

    /// Assign a fresh id if the entry has none.
    ///
    /// Entries must always round-trip with a stable identifier; records
    /// pulled from older data may lack one.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
    }

    /// Clamp out-of-range fields to their unset sentinels.
    ///
    /// Applied once at the storage read boundary so business logic can
    /// trust field ranges.
    pub fn normalize(&mut self) {
        self.ensure_id();
        if self.difficulty > MAX_DIFFICULTY {
            self.difficulty = 0;
        }
        if self.predicted_difficulty > MAX_DIFFICULTY {
            self.predicted_difficulty = 0;
        }
    }
}

/// An in-progress, unfinished practice session. At most one per user.
///
/// Created when a session is paused mid-way, replaced wholesale on every
/// save, cleared when the session ends normally or is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub questions: Vec<String>,
    pub current_index: usize,
    #[serde(default)]
    pub elapsed_seconds: HashMap<String, u32>,
    #[serde(default)]
    pub predicted_difficulty: HashMap<String, u8>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Restore the invariants: `current_index` within `[0, len)` and map
    /// keys drawn from `questions`. Returns `None` for an empty session.
    pub fn normalize(mut self) -> Option<Self> {
        if self.questions.is_empty() {
            return None;
        }
        if self.current_index >= self.questions.len() {
            self.current_index = self.questions.len() - 1;
        }
        self.elapsed_seconds
            .retain(|qid, _| self.questions.contains(qid));
        self.predicted_difficulty
            .retain(|qid, _| self.questions.contains(qid));
        Some(self)
    }
}

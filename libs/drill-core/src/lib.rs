//! Core library for the quizdrill practice-log sync engine.
//!
//! Provides:
//! - Practice log types (LogEntry, SessionState) with boundary validation
//! - Question bank fingerprinting (SHA-256 with a length fallback)
//! - Last-write-wins merge of local and remote entry sets
//! - Bank drift guard
//! - Derived caches (per-question status, per-day aggregates)
//!
//! Everything here is pure and synchronous; persistence, networking and
//! scheduling live in the client crate.

pub mod drift;
pub mod fingerprint;
pub mod merge;
pub mod stats;
pub mod types;

pub use drift::{check_bank_drift, orphaned_entries, DriftVerdict, DRIFT_THRESHOLD};
pub use fingerprint::QuestionBankFingerprint;
pub use merge::{merge_entries, merge_session_state};
pub use stats::{DailyStats, DerivedCaches, QuestionStatus};
pub use types::{LogEntry, PracticeResult, SessionState, MAX_DIFFICULTY};

//! Per-session sync context.
//!
//! The source kept the canonical log, session state and scheduler flags in
//! module-level globals; here everything an engine function needs travels
//! in an explicit context value owned by the running instance.

use std::collections::HashSet;
use std::sync::Arc;

use drill_core::{LogEntry, QuestionBankFingerprint};

/// Version stamped onto remote rows for forward-compatibility checks.
pub const DATA_VERSION: i64 = 1;

/// Application version stamped onto remote rows.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity and question-bank inputs for one authenticated session.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Authenticated user, from the auth collaborator.
    pub user_id: String,
    /// Stable per-install device identifier.
    pub device_id: String,
    /// Fingerprint of the currently loaded question bank.
    pub bank: QuestionBankFingerprint,
    /// Question ids present in the currently loaded bank.
    pub valid_qids: Arc<HashSet<String>>,
}

impl SyncContext {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        bank: QuestionBankFingerprint,
        valid_qids: HashSet<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            bank,
            valid_qids: Arc::new(valid_qids),
        }
    }

    /// Fill in the write-attribution fields an entry is missing.
    pub fn stamp(&self, entry: &mut LogEntry) {
        entry.ensure_id();
        if entry.device_id.is_empty() {
            entry.device_id = self.device_id.clone();
        }
        if entry.question_bank_hash.is_empty() {
            entry.question_bank_hash = self.bank.hash.clone();
            entry.question_bank_version = self.bank.version.clone();
        }
    }
}

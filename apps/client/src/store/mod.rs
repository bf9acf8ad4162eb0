//! Local log store: the durable, on-device canonical practice log.
//!
//! Owns the canonical `LogEntry` set and the paused session state, mirrors
//! them into SQLite, and maintains the derived caches. A failed disk write
//! is reported to the caller but leaves the in-memory set usable for the
//! rest of the session.

pub mod error;
pub mod repository;
pub mod schema;

pub use error::StoreError;
pub use repository::LogRepository;

use std::path::Path;

use chrono::{Duration, Utc};
use tracing::debug;

use drill_core::{DerivedCaches, LogEntry, QuestionBankFingerprint, SessionState};

use crate::context::SyncContext;

type Result<T> = std::result::Result<T, StoreError>;

/// In-memory canonical set plus its SQLite mirror and derived caches.
pub struct LocalLogStore {
    repo: LogRepository,
    entries: Vec<LogEntry>,
    session: Option<SessionState>,
    caches: DerivedCaches,
}

impl LocalLogStore {
    /// Open the store at a path, loading and normalizing persisted data.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_repo(LogRepository::open(path)?)
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_repo(LogRepository::open_in_memory()?)
    }

    fn from_repo(repo: LogRepository) -> Result<Self> {
        let entries = repo.load_entries()?;
        let session = repo.load_session()?;
        let caches = DerivedCaches::rebuild(&entries);
        debug!(entries = entries.len(), "local log store loaded");
        Ok(Self {
            repo,
            entries,
            session,
            caches,
        })
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    pub fn caches(&self) -> &DerivedCaches {
        &self.caches
    }

    /// Append one practice event.
    ///
    /// Missing attribution fields (`updated_at` stays as stamped by the
    /// caller, device id and bank fingerprint come from the context) are
    /// filled in before the entry joins the set. An `Err` means the entry
    /// is held in memory only and will not survive a reload.
    pub fn append(&mut self, mut entry: LogEntry, ctx: &SyncContext) -> Result<()> {
        ctx.stamp(&mut entry);
        entry.normalize();
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(StoreError::DuplicateId(entry.id));
        }

        self.entries.push(entry.clone());
        self.caches.apply(&entry);
        self.repo.insert_entry(&entry)
    }

    /// Edit the latest entry for a question in place (e.g. amending a
    /// note), re-stamping `updated_at` so the change wins a later merge.
    ///
    /// `updated_at` stays monotonic non-decreasing even against a skewed
    /// wall clock. Returns `false` when the question has no entry yet.
    pub fn amend_latest<F>(&mut self, qid: &str, ctx: &SyncContext, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut LogEntry),
    {
        let Some(index) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.qid == qid)
            .max_by_key(|(_, e)| (e.updated_at, e.id.clone()))
            .map(|(i, _)| i)
        else {
            return Ok(false);
        };

        let entry = &mut self.entries[index];
        mutate(entry);
        entry.qid = qid.to_string();
        entry.updated_at = Utc::now().max(entry.updated_at + Duration::milliseconds(1));
        entry.device_id = ctx.device_id.clone();
        entry.normalize();

        let updated = entry.clone();
        self.rebuild_caches();
        self.repo.update_entry(&updated)?;
        Ok(true)
    }

    /// Deterministically recompute all derived caches from the entry set.
    pub fn rebuild_caches(&mut self) {
        self.caches = DerivedCaches::rebuild(&self.entries);
    }

    /// Atomically swap in the merged canonical set and session state.
    /// Used only with the merge engine's result.
    pub fn replace_all(
        &mut self,
        entries: Vec<LogEntry>,
        session: Option<SessionState>,
    ) -> Result<()> {
        self.repo.replace_all(&entries, session.as_ref())?;
        self.entries = entries;
        self.session = session;
        self.rebuild_caches();
        Ok(())
    }

    /// Save a paused session, replacing any previous one wholesale.
    pub fn save_session(&mut self, session: SessionState) -> Result<()> {
        let Some(session) = session.normalize() else {
            return self.clear_session();
        };
        self.session = Some(session.clone());
        self.repo.save_session(&session)
    }

    /// Clear the paused session (normal end or explicit discard).
    pub fn clear_session(&mut self) -> Result<()> {
        self.session = None;
        self.repo.clear_session()
    }

    pub fn device_id(&self) -> Result<String> {
        self.repo.device_id()
    }

    pub fn background_sync(&self) -> Result<bool> {
        self.repo.background_sync()
    }

    pub fn set_background_sync(&self, enabled: bool) -> Result<()> {
        self.repo.set_background_sync(enabled)
    }

    pub fn previous_bank(&self) -> Result<Option<QuestionBankFingerprint>> {
        self.repo.previous_bank()
    }

    pub fn record_sync_success(&self, bank: &QuestionBankFingerprint) -> Result<()> {
        self.repo.record_sync_success(bank, Utc::now())
    }

    pub fn last_sync_at(&self) -> Result<Option<chrono::DateTime<Utc>>> {
        self.repo.last_sync_at()
    }
}

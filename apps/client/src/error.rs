//! Sync error taxonomy.

use std::path::PathBuf;

use crate::store::StoreError;

/// Errors surfaced by the sync engine.
///
/// The scheduler is the single point that decides retry vs. abort vs.
/// surface-to-user, based on these variants.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("not authenticated - sign in to enable sync")]
    NotAuthenticated,

    #[error("sync already in progress")]
    AlreadyInProgress,

    #[error("device is offline - sync deferred")]
    Offline,

    #[error("network error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error(
        "question bank shrank from {previous_count} to {current_count} questions - \
         sync aborted; reload the correct bank before syncing again"
    )]
    Drift {
        previous_count: usize,
        current_count: usize,
        /// Evidence file with the orphaned entries, when any existed.
        export_path: Option<PathBuf>,
    },

    #[error("sync cancelled by sign-out")]
    Cancelled,

    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    #[error("response parse error: {0}")]
    Parse(String),
}

impl SyncError {
    /// Whether the scheduler should retry this failure with backoff.
    ///
    /// Auth failures need a re-login, drift needs user intervention, and
    /// offline attempts are deferred rather than retried on a timer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Conflict(_))
    }
}

//! Local store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("duplicate entry id: {0}")]
    DuplicateId(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

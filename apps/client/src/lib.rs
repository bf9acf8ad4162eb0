//! Offline-first practice log sync client.
//!
//! The local SQLite log is the source of truth while offline; the
//! scheduler reconciles it with the shared remote store using a
//! last-write-wins merge per question, guarded against question bank
//! drift. Pure merge/drift/cache logic lives in `drill-core`; this crate
//! adds storage, transport and scheduling around it.

pub mod context;
pub mod error;
pub mod export;
pub mod remote;
pub mod scheduler;
pub mod store;

pub use context::{SyncContext, APP_VERSION, DATA_VERSION};
pub use error::SyncError;
pub use remote::{HttpRemoteStore, RemoteSnapshot, RemoteStore, UPSERT_BATCH_SIZE};
pub use scheduler::{
    RetryPolicy, SchedulerConfig, SchedulerState, SyncReport, SyncScheduler, SyncTrigger,
};
pub use store::{LocalLogStore, StoreError};

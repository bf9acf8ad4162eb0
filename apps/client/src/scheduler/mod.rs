//! Sync scheduler: decides when a sync attempt runs and runs it.
//!
//! Exactly one attempt is in flight at a time. Triggers are login, manual
//! request, debounced local writes (when background sync is on) and the
//! retry timer after a retryable failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use drill_core::{
    check_bank_drift, merge_entries, merge_session_state, orphaned_entries, DriftVerdict, LogEntry,
    SessionState,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::export::{default_export_dir, write_orphan_export};
use crate::remote::{PracticeLogRow, RemoteStore, SessionStateRow};
use crate::store::LocalLogStore;

/// Delays applied to consecutive retryable failures. After the sequence
/// is exhausted the scheduler parks in [`SchedulerState::Pending`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(300),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period after a local write before a background sync fires.
    pub debounce: Duration,
    pub retry: RetryPolicy,
    /// Where drift-abort evidence files land.
    pub export_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            export_dir: default_export_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No attempt in flight, none scheduled.
    Idle,
    /// An attempt is in flight.
    Running,
    /// A retry timer is armed after `attempt` consecutive failures.
    Backoff { attempt: usize },
    /// Retries exhausted or device offline; waits for the next trigger.
    Pending,
}

/// What caused a sync attempt. Logged with every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Manual,
    PostLogin,
    Background,
    Retry,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::PostLogin => "post_login",
            Self::Background => "background",
            Self::Retry => "retry",
        }
    }
}

/// Outcome of one successful sync attempt.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub merged_entries: usize,
    pub pushed_entries: usize,
    pub finished_at: DateTime<Utc>,
}

struct Inner<R> {
    remote: R,
    store: Mutex<LocalLogStore>,
    ctx: Mutex<Option<SyncContext>>,
    state: Mutex<SchedulerState>,
    /// Consecutive retryable failures since the last success.
    failures: AtomicUsize,
    /// Physical exclusivity latch. Set for the whole duration of an
    /// attempt and cleared only by the attempt that set it; unlike
    /// `state`, logout never touches it, so a run that outlives a
    /// sign-out still blocks the next one.
    in_flight: AtomicBool,
    /// Bumped on logout; spawned timers holding an older value are stale,
    /// and an in-flight run holding an older value discards its result.
    generation: AtomicU64,
    /// Bumped on every local write; debounce timers holding an older
    /// value were superseded by a later write.
    write_generation: AtomicU64,
    config: SchedulerConfig,
}

/// Clone-able handle onto the single scheduler instance.
pub struct SyncScheduler<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for SyncScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteStore + 'static> SyncScheduler<R> {
    pub fn new(remote: R, store: LocalLogStore, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                store: Mutex::new(store),
                ctx: Mutex::new(None),
                state: Mutex::new(SchedulerState::Idle),
                failures: AtomicUsize::new(0),
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                write_generation: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.lock().unwrap()
    }

    /// Run `f` against the local store under its lock.
    pub fn with_store<T>(&self, f: impl FnOnce(&mut LocalLogStore) -> T) -> T {
        let mut store = self.inner.store.lock().unwrap();
        f(&mut store)
    }

    /// Install the authenticated context and run the post-login sync.
    pub async fn login(&self, ctx: SyncContext) -> Result<SyncReport, SyncError> {
        info!(user_id = %ctx.user_id, "signed in, starting post-login sync");
        *self.inner.ctx.lock().unwrap() = Some(ctx);
        self.inner.failures.store(0, Ordering::SeqCst);
        self.trigger(SyncTrigger::PostLogin).await
    }

    /// Drop the authenticated context and cancel any armed timers. A run
    /// still in flight keeps its exclusivity latch; it will observe the
    /// generation bump and discard its result instead of committing.
    pub fn logout(&self) {
        {
            // Bump and reset under the state lock so an in-flight run
            // cannot interleave its own state write.
            let mut state = self.inner.state.lock().unwrap();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            *state = SchedulerState::Idle;
        }
        *self.inner.ctx.lock().unwrap() = None;
        self.inner.failures.store(0, Ordering::SeqCst);
        info!("signed out, sync disabled");
    }

    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        self.trigger(SyncTrigger::Manual).await
    }

    /// Enable or disable debounced background sync. Persisted locally.
    pub fn set_background_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        let store = self.inner.store.lock().unwrap();
        store.set_background_sync(enabled)?;
        Ok(())
    }

    /// Note that a local write happened; arms (or re-arms) the debounce
    /// timer when background sync is enabled.
    pub fn note_local_write(&self) {
        let enabled = {
            let store = self.inner.store.lock().unwrap();
            store.background_sync().unwrap_or(false)
        };
        if !enabled {
            return;
        }
        let write_gen = self.inner.write_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.inner.config.debounce).await;
            if scheduler.inner.write_generation.load(Ordering::SeqCst) != write_gen
                || scheduler.inner.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }
            if let Err(e) = scheduler.trigger(SyncTrigger::Background).await {
                debug!("background sync attempt did not run: {e}");
            }
        });
    }

    /// Run one sync attempt, enforcing exclusivity and driving the state
    /// machine from its outcome.
    pub async fn trigger(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        let ctx = self
            .inner
            .ctx
            .lock()
            .unwrap()
            .clone()
            .ok_or(SyncError::NotAuthenticated)?;

        let generation = self.inner.generation.load(Ordering::SeqCst);
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyInProgress);
        }
        self.set_state_if_current(generation, SchedulerState::Running);
        debug!(trigger = trigger.as_str(), "sync attempt starting");

        let result = self.attempt(&ctx, generation, trigger).await;
        self.inner.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn attempt(
        &self,
        ctx: &SyncContext,
        generation: u64,
        trigger: SyncTrigger,
    ) -> Result<SyncReport, SyncError> {
        if !self.inner.remote.check_connectivity().await {
            self.set_state_if_current(generation, SchedulerState::Pending);
            debug!("device offline, sync deferred");
            return Err(SyncError::Offline);
        }

        let result = self.run_once(ctx, generation).await;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            // Signed out mid-run: logout already reset state and the
            // failure count, so this outcome drives nothing.
            debug!("sync attempt outlived its session, outcome discarded");
            return result;
        }

        match result {
            Ok(report) => {
                self.inner.failures.store(0, Ordering::SeqCst);
                self.set_state_if_current(generation, SchedulerState::Idle);
                info!(
                    trigger = trigger.as_str(),
                    merged = report.merged_entries,
                    "sync finished"
                );
                Ok(report)
            }
            Err(e) if e.is_retryable() => {
                let attempt = self.inner.failures.fetch_add(1, Ordering::SeqCst) + 1;
                match self.inner.config.retry.delays.get(attempt - 1) {
                    Some(&delay) => {
                        self.set_state_if_current(
                            generation,
                            SchedulerState::Backoff { attempt },
                        );
                        warn!(
                            attempt,
                            delay_secs = delay.as_secs(),
                            "sync failed, retry scheduled: {e}"
                        );
                        self.arm_retry(delay, generation, attempt);
                    }
                    None => {
                        self.set_state_if_current(generation, SchedulerState::Pending);
                        warn!("sync failed, retries exhausted: {e}");
                    }
                }
                Err(e)
            }
            Err(e) => {
                self.inner.failures.store(0, Ordering::SeqCst);
                self.set_state_if_current(generation, SchedulerState::Idle);
                warn!("sync failed without retry: {e}");
                Err(e)
            }
        }
    }

    /// Write `next` unless a logout happened since `generation` was read.
    /// Generation is re-checked under the state lock, the same lock
    /// `logout` bumps it under, so the two writes cannot interleave.
    fn set_state_if_current(&self, generation: u64, next: SchedulerState) {
        let mut state = self.inner.state.lock().unwrap();
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            *state = next;
        }
    }

    /// A timer stands down if a logout happened or the failure it was
    /// armed for has since been resolved (a manual sync succeeded).
    fn arm_retry(&self, delay: Duration, generation: u64, attempt: usize) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if scheduler.inner.generation.load(Ordering::SeqCst) != generation
                || scheduler.inner.failures.load(Ordering::SeqCst) != attempt
            {
                return;
            }
            if let Err(e) = scheduler.trigger(SyncTrigger::Retry).await {
                debug!("retry attempt did not complete: {e}");
            }
        });
    }

    /// Fetch, merge, push, then commit locally. Runs at most once at a
    /// time; the caller holds the exclusivity latch for its duration.
    async fn run_once(
        &self,
        ctx: &SyncContext,
        generation: u64,
    ) -> Result<SyncReport, SyncError> {
        let (local_entries, local_session, previous_bank) = {
            let store = self.inner.store.lock().unwrap();
            (
                store.entries().to_vec(),
                store.session().cloned(),
                store.previous_bank()?,
            )
        };

        let snapshot = self.inner.remote.fetch_all(&ctx.user_id).await?;
        let remote_entries: Vec<LogEntry> = snapshot
            .practice_logs
            .into_iter()
            .map(PracticeLogRow::into_entry)
            .collect();
        let remote_session: Option<SessionState> = snapshot
            .session_state
            .and_then(SessionStateRow::into_session);

        if let DriftVerdict::Abort {
            previous_count,
            current_count,
        } = check_bank_drift(previous_bank.as_ref(), &ctx.bank)
        {
            let orphans = orphaned_entries(&local_entries, &remote_entries, &ctx.valid_qids);
            let export_path = if orphans.is_empty() {
                None
            } else {
                write_orphan_export(&self.inner.config.export_dir, &ctx.user_id, &orphans)
            };
            return Err(SyncError::Drift {
                previous_count,
                current_count,
                export_path,
            });
        }

        let merged = merge_entries(&local_entries, &remote_entries, &ctx.valid_qids);
        let merged_session = merge_session_state(local_session, remote_session);

        let rows: Vec<PracticeLogRow> = merged
            .iter()
            .map(|entry| PracticeLogRow::from_entry(entry, ctx))
            .collect();
        let pushed = rows.len();
        self.inner.remote.upsert_entries(&ctx.user_id, rows).await?;

        match &merged_session {
            Some(session) => {
                self.inner
                    .remote
                    .upsert_session_state(SessionStateRow::from_session(session, ctx))
                    .await?;
            }
            None => {
                self.inner.remote.delete_session_state(&ctx.user_id).await?;
            }
        }

        // A sign-out while the network calls were in flight invalidates
        // this run; its merge result must not land in the local store.
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return Err(SyncError::Cancelled);
        }

        let merged_count = merged.len();
        {
            let mut store = self.inner.store.lock().unwrap();
            store.replace_all(merged, merged_session)?;
            store.record_sync_success(&ctx.bank)?;
        }

        Ok(SyncReport {
            merged_entries: merged_count,
            pushed_entries: pushed,
            finished_at: Utc::now(),
        })
    }
}

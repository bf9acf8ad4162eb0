//! End-to-end sync flows against an in-memory remote store.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use drill_core::{LogEntry, PracticeResult, QuestionBankFingerprint, SessionState};
use quizdrill_client::remote::{PracticeLogRow, RemoteSnapshot, RemoteStore, SessionStateRow};
use quizdrill_client::{
    LocalLogStore, RetryPolicy, SchedulerConfig, SchedulerState, SyncContext, SyncError,
    SyncScheduler,
};

struct FakeShared {
    online: AtomicBool,
    fail_fetches: AtomicBool,
    block_fetch: AtomicBool,
    release: tokio::sync::Notify,
    logs: Mutex<HashMap<String, PracticeLogRow>>,
    session: Mutex<Option<SessionStateRow>>,
    fetch_calls: AtomicUsize,
    fetches_in_flight: AtomicUsize,
    max_concurrent_fetches: AtomicUsize,
    upsert_calls: AtomicUsize,
    session_deletes: AtomicUsize,
}

/// Remote store double backed by plain maps, with toggles for
/// connectivity, injected transport failures and a blockable fetch.
#[derive(Clone)]
struct FakeRemote(Arc<FakeShared>);

impl Default for FakeRemote {
    fn default() -> Self {
        Self(Arc::new(FakeShared {
            online: AtomicBool::new(true),
            fail_fetches: AtomicBool::new(false),
            block_fetch: AtomicBool::new(false),
            release: tokio::sync::Notify::new(),
            logs: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            fetches_in_flight: AtomicUsize::new(0),
            max_concurrent_fetches: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
            session_deletes: AtomicUsize::new(0),
        }))
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn check_connectivity(&self) -> bool {
        self.0.online.load(Ordering::SeqCst)
    }

    async fn fetch_all(&self, _user_id: &str) -> Result<RemoteSnapshot, SyncError> {
        self.0.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.0.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0
            .max_concurrent_fetches
            .fetch_max(in_flight, Ordering::SeqCst);
        if self.0.block_fetch.load(Ordering::SeqCst) {
            self.0.release.notified().await;
        }
        self.0.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.0.fail_fetches.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("injected failure".into()));
        }
        Ok(RemoteSnapshot {
            practice_logs: self.0.logs.lock().unwrap().values().cloned().collect(),
            session_state: self.0.session.lock().unwrap().clone(),
        })
    }

    async fn upsert_entries(
        &self,
        _user_id: &str,
        rows: Vec<PracticeLogRow>,
    ) -> Result<(), SyncError> {
        self.0.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut logs = self.0.logs.lock().unwrap();
        for row in rows {
            logs.insert(row.id.clone(), row);
        }
        Ok(())
    }

    async fn upsert_session_state(&self, row: SessionStateRow) -> Result<(), SyncError> {
        *self.0.session.lock().unwrap() = Some(row);
        Ok(())
    }

    async fn delete_session_state(&self, _user_id: &str) -> Result<(), SyncError> {
        self.0.session_deletes.fetch_add(1, Ordering::SeqCst);
        *self.0.session.lock().unwrap() = None;
        Ok(())
    }
}

fn bank(count: usize) -> QuestionBankFingerprint {
    QuestionBankFingerprint::from_bytes("v1", b"bank-bytes", count)
}

fn ctx_for(device: &str, qids: &[&str]) -> SyncContext {
    let qids: HashSet<String> = qids.iter().map(|s| s.to_string()).collect();
    SyncContext::new("user-1", device, bank(qids.len()), qids)
}

fn entry(qid: &str, device: &str, offset_secs: i64) -> LogEntry {
    let mut e = LogEntry::new(qid);
    e.result = Some(PracticeResult::Correct);
    e.device_id = device.to_string();
    e.updated_at = Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap();
    e.practiced_at = e.updated_at;
    e
}

fn temp_export_dir() -> PathBuf {
    std::env::temp_dir().join(format!("quizdrill-sync-flow-{}", uuid::Uuid::new_v4()))
}

fn scheduler(remote: FakeRemote) -> SyncScheduler<FakeRemote> {
    let store = LocalLogStore::open_in_memory().expect("in-memory store");
    let config = SchedulerConfig {
        debounce: Duration::from_secs(30),
        retry: RetryPolicy::default(),
        export_dir: temp_export_dir(),
    };
    SyncScheduler::new(remote, store, config)
}

#[tokio::test]
async fn post_login_sync_merges_concurrent_devices() {
    let remote = FakeRemote::default();
    let ctx_a = ctx_for("device-a", &["Q1", "Q2", "Q3"]);
    let ctx_b = ctx_for("device-b", &["Q1", "Q2", "Q3"]);

    // Device B already pushed a newer answer for Q1 plus a Q3-only entry.
    {
        let mut logs = remote.0.logs.lock().unwrap();
        for e in [entry("Q1", "device-b", 100), entry("Q3", "device-b", 50)] {
            let row = PracticeLogRow::from_entry(&e, &ctx_b);
            logs.insert(row.id.clone(), row);
        }
    }

    let sched = scheduler(remote.clone());
    sched
        .with_store(|store| {
            store.append(entry("Q1", "device-a", 10), &ctx_a)?;
            store.append(entry("Q2", "device-a", 20), &ctx_a)
        })
        .expect("local writes");

    let report = sched.login(ctx_a).await.expect("post-login sync");
    assert_eq!(report.merged_entries, 3);
    assert_eq!(report.pushed_entries, 3);
    assert_eq!(sched.state(), SchedulerState::Idle);

    sched.with_store(|store| {
        assert_eq!(store.entries().len(), 3);
        let q1 = store
            .entries()
            .iter()
            .find(|e| e.qid == "Q1")
            .expect("merged Q1");
        // Device B's copy was newer, so it won the merge.
        assert_eq!(q1.device_id, "device-b");
        assert_eq!(store.caches().by_question.len(), 3);
        assert!(store.last_sync_at().expect("meta").is_some());
    });

    assert_eq!(remote.0.logs.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn second_sync_is_rejected_while_one_runs() {
    let remote = FakeRemote::default();
    let sched = scheduler(remote.clone());
    sched
        .login(ctx_for("device-a", &["Q1"]))
        .await
        .expect("initial sync");

    remote.0.block_fetch.store(true, Ordering::SeqCst);
    let first = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.sync_now().await })
    };
    while sched.state() != SchedulerState::Running {
        tokio::task::yield_now().await;
    }

    let err = sched.sync_now().await.expect_err("must be rejected");
    assert!(matches!(err, SyncError::AlreadyInProgress));

    remote.0.release.notify_one();
    first
        .await
        .expect("task join")
        .expect("first sync completes");
    assert_eq!(sched.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_back_off_then_park() {
    let remote = FakeRemote::default();
    remote.0.fail_fetches.store(true, Ordering::SeqCst);
    let sched = scheduler(remote.clone());

    let err = sched
        .login(ctx_for("device-a", &["Q1"]))
        .await
        .expect_err("fetch fails");
    assert!(matches!(err, SyncError::Transport(_)));
    assert_eq!(sched.state(), SchedulerState::Backoff { attempt: 1 });
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 1);

    // Retry fires after 1 minute, then 5, then 5, then the scheduler parks.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(sched.state(), SchedulerState::Backoff { attempt: 2 });

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 3);
    assert_eq!(sched.state(), SchedulerState::Backoff { attempt: 3 });

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 4);
    assert_eq!(sched.state(), SchedulerState::Pending);

    // Parked: no timer left, nothing fires however long we wait.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 4);

    // A manual trigger leaves Pending once the fault clears.
    remote.0.fail_fetches.store(false, Ordering::SeqCst);
    sched.sync_now().await.expect("manual sync succeeds");
    assert_eq!(sched.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn offline_attempt_is_deferred_not_retried() {
    let remote = FakeRemote::default();
    remote.0.online.store(false, Ordering::SeqCst);
    let sched = scheduler(remote.clone());

    let err = sched
        .login(ctx_for("device-a", &["Q1"]))
        .await
        .expect_err("offline");
    assert!(matches!(err, SyncError::Offline));
    assert_eq!(sched.state(), SchedulerState::Pending);
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 0);

    remote.0.online.store(true, Ordering::SeqCst);
    sched.sync_now().await.expect("sync once back online");
    assert_eq!(sched.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn bank_drift_aborts_and_exports_orphans() {
    let remote = FakeRemote::default();
    let old_ctx = ctx_for("device-a", &["Q1", "GONE1"]);
    let sched = scheduler(remote.clone());

    sched
        .with_store(|store| {
            store.append(entry("Q1", "device-a", 10), &old_ctx)?;
            store.append(entry("GONE1", "device-a", 20), &old_ctx)?;
            // Baseline from the last successful sync: a much larger bank.
            store.record_sync_success(&QuestionBankFingerprint::from_bytes("v0", b"old", 200))
        })
        .expect("seed store");

    let new_ctx = SyncContext::new(
        "user-1",
        "device-a",
        QuestionBankFingerprint::from_bytes("v1", b"new", 140),
        ["Q1".to_string()].into_iter().collect(),
    );
    let err = sched.login(new_ctx).await.expect_err("drift abort");
    let SyncError::Drift {
        previous_count,
        current_count,
        export_path,
    } = err
    else {
        panic!("expected drift error, got {err}");
    };
    assert_eq!(previous_count, 200);
    assert_eq!(current_count, 140);

    let path = export_path.expect("orphans were exported");
    let bytes = std::fs::read(&path).expect("export file");
    let orphans: Vec<LogEntry> = serde_json::from_slice(&bytes).expect("valid json");
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].qid, "GONE1");

    // Nothing was pushed and the local log is untouched.
    assert_eq!(remote.0.upsert_calls.load(Ordering::SeqCst), 0);
    sched.with_store(|store| assert_eq!(store.entries().len(), 2));
    assert_eq!(sched.state(), SchedulerState::Idle);

    std::fs::remove_dir_all(path.parent().expect("export dir")).ok();
}

#[tokio::test]
async fn newer_session_state_wins_and_is_pushed() {
    let remote = FakeRemote::default();
    let ctx_a = ctx_for("device-a", &["Q1", "Q2"]);
    let ctx_b = ctx_for("device-b", &["Q1", "Q2"]);

    let older = SessionState {
        questions: vec!["Q1".into()],
        current_index: 0,
        elapsed_seconds: HashMap::new(),
        predicted_difficulty: HashMap::new(),
        updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    };
    *remote.0.session.lock().unwrap() = Some(SessionStateRow::from_session(&older, &ctx_b));

    let newer = SessionState {
        questions: vec!["Q1".into(), "Q2".into()],
        current_index: 1,
        elapsed_seconds: HashMap::new(),
        predicted_difficulty: HashMap::new(),
        updated_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
    };
    let sched = scheduler(remote.clone());
    sched
        .with_store(|store| store.save_session(newer.clone()))
        .expect("save session");

    sched.login(ctx_a).await.expect("sync");
    sched.with_store(|store| assert_eq!(store.session(), Some(&newer)));
    let pushed = remote.0.session.lock().unwrap().clone().expect("pushed row");
    assert_eq!(pushed.into_session(), Some(newer));
}

#[tokio::test]
async fn absent_session_state_triggers_remote_delete() {
    let remote = FakeRemote::default();
    let sched = scheduler(remote.clone());

    sched.login(ctx_for("device-a", &["Q1"])).await.expect("sync");
    // Neither side holds a paused session, so the merged state is empty
    // and the remote row is cleared rather than upserted.
    assert!(remote.0.session.lock().unwrap().is_none());
    assert_eq!(remote.0.session_deletes.load(Ordering::SeqCst), 1);
    sched.with_store(|store| assert!(store.session().is_none()));
}

#[tokio::test(start_paused = true)]
async fn local_writes_debounce_into_one_background_sync() {
    let remote = FakeRemote::default();
    let sched = scheduler(remote.clone());
    let ctx = ctx_for("device-a", &["Q1", "Q2"]);
    sched.set_background_enabled(true).expect("enable");
    sched.login(ctx.clone()).await.expect("initial sync");
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 1);

    sched
        .with_store(|store| store.append(entry("Q1", "device-a", 10), &ctx))
        .expect("write");
    sched.note_local_write();
    tokio::time::sleep(Duration::from_secs(29)).await;
    // Still inside the quiet period; a second write re-arms the timer.
    sched
        .with_store(|store| store.append(entry("Q2", "device-a", 20), &ctx))
        .expect("write");
    sched.note_local_write();
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(sched.state(), SchedulerState::Idle);
    assert_eq!(remote.0.logs.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn disabled_background_sync_ignores_local_writes() {
    let remote = FakeRemote::default();
    let sched = scheduler(remote.clone());
    let ctx = ctx_for("device-a", &["Q1"]);
    sched.login(ctx.clone()).await.expect("initial sync");

    sched
        .with_store(|store| store.append(entry("Q1", "device-a", 10), &ctx))
        .expect("write");
    sched.note_local_write();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn logout_cancels_armed_retry() {
    let remote = FakeRemote::default();
    remote.0.fail_fetches.store(true, Ordering::SeqCst);
    let sched = scheduler(remote.clone());
    sched
        .login(ctx_for("device-a", &["Q1"]))
        .await
        .expect_err("fetch fails");
    assert_eq!(sched.state(), SchedulerState::Backoff { attempt: 1 });

    sched.logout();
    assert_eq!(sched.state(), SchedulerState::Idle);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    // The armed retry observed the logout and never ran.
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_mid_sync_admits_no_second_run() {
    let remote = FakeRemote::default();
    let sched = scheduler(remote.clone());
    let ctx = ctx_for("device-a", &["Q1"]);
    // Sign in while offline so the context is installed without any
    // sync having committed yet.
    remote.0.online.store(false, Ordering::SeqCst);
    sched.login(ctx.clone()).await.expect_err("offline login");
    remote.0.online.store(true, Ordering::SeqCst);

    remote.0.block_fetch.store(true, Ordering::SeqCst);
    let stale = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.sync_now().await })
    };
    while sched.state() != SchedulerState::Running {
        tokio::task::yield_now().await;
    }

    // Logging out mid-flight resets the visible state but not the
    // exclusivity latch: a fresh login cannot start a second run.
    sched.logout();
    assert_eq!(sched.state(), SchedulerState::Idle);
    let err = sched.login(ctx).await.expect_err("old run still holds the slot");
    assert!(matches!(err, SyncError::AlreadyInProgress));

    remote.0.block_fetch.store(false, Ordering::SeqCst);
    remote.0.release.notify_one();
    let outcome = stale.await.expect("task join");
    assert!(matches!(outcome, Err(SyncError::Cancelled)));

    // At no point did two fetches overlap, the stale run committed
    // nothing, and the new session syncs normally once the slot frees.
    assert_eq!(remote.0.max_concurrent_fetches.load(Ordering::SeqCst), 1);
    sched.with_store(|store| assert!(store.last_sync_at().expect("meta").is_none()));
    sched.sync_now().await.expect("sync after the stale run ended");
    assert_eq!(sched.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn armed_retry_stands_down_after_manual_success() {
    let remote = FakeRemote::default();
    remote.0.fail_fetches.store(true, Ordering::SeqCst);
    let sched = scheduler(remote.clone());

    sched
        .login(ctx_for("device-a", &["Q1"]))
        .await
        .expect_err("fetch fails");
    assert_eq!(sched.state(), SchedulerState::Backoff { attempt: 1 });

    // A manual sync succeeds before the retry timer fires.
    remote.0.fail_fetches.store(false, Ordering::SeqCst);
    sched.sync_now().await.expect("manual sync");
    assert_eq!(sched.state(), SchedulerState::Idle);
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 2);

    // The timer observes the resolved failure and stands down.
    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(remote.0.fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(sched.state(), SchedulerState::Idle);
}

//! Integration tests for pull jobs.
//!
//! These run pull jobs end to end on the manager's worker against
//! scripted targets and check progress, watermarks and local state.

use serde_json::{json, Value};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidesync_testkit::prelude::*;

const TIMEOUT: Duration = Duration::from_secs(10);

fn pull(
    env: &TestManager,
    target: &Arc<ScriptedPullTarget>,
    options: SyncOptions,
) -> (SyncState, CallbackRecorder) {
    let recorder = CallbackRecorder::new();
    let sync = env
        .pull(
            Arc::clone(target) as Arc<dyn PullTarget>,
            options,
            "accounts",
            None,
            recorder.callback(),
        )
        .unwrap();
    env.wait_idle().unwrap();
    (sync, recorder)
}

fn local_copies(env: &TestManager, id: &str) -> Vec<Value> {
    let query = Query::eq("Id", json!(id));
    env.store.query("accounts", &query).unwrap()
}

#[test]
fn test_two_pages_report_partial_progress() {
    let env = TestManager::memory();
    let page = |ids: RangeInclusive<i64>| -> Vec<Value> {
        ids.map(|i| remote_record(&format!("00{i}"), 100 * i))
            .collect()
    };
    let target = ScriptedPullTarget::new(vec![page(1..=5), page(6..=8)]).shared();

    let (sync, recorder) = pull(&env, &target, SyncOptions::overwrite());

    assert_eq!(sync.status(), SyncStatus::Running);
    assert_eq!(sync.progress(), 0);
    assert_eq!(
        recorder.updates(),
        vec![
            (SyncStatus::Running, 0),
            (SyncStatus::Running, 0),
            (SyncStatus::Running, 62),
            (SyncStatus::Done, 100),
        ]
    );

    let done = env.get_sync_status(sync.id()).unwrap().unwrap();
    assert!(done.is_done());
    assert_eq!(done.total_size(), 8);
    assert_eq!(done.watermark(), 800);
    assert!(done.end_time() >= done.start_time());
    assert_eq!(env.store.count("accounts", &Query::all()).unwrap(), 8);
}

#[test]
fn test_pulled_records_are_clean_and_tagged() {
    let env = TestManager::memory();
    let target = ScriptedPullTarget::new(vec![vec![remote_record("001", 10)]]).shared();

    let (sync, _) = pull(&env, &target, SyncOptions::overwrite());

    let stored = local_copies(&env, "001");
    assert_eq!(stored.len(), 1);
    assert!(!record::is_dirty(&stored[0]));
    assert_eq!(stored[0][record::SYNC_ID], json!(sync.id()));
    assert_eq!(stored[0]["Name"], json!("Record 001"));
}

#[test]
fn test_empty_fetch_completes() {
    let env = TestManager::memory();
    let target = ScriptedPullTarget::new(Vec::new()).shared();

    let (sync, recorder) = pull(&env, &target, SyncOptions::overwrite());

    let last = recorder.last().unwrap();
    assert!(last.is_done());
    assert_eq!(last.progress(), 100);
    assert_eq!(last.total_size(), 0);
    assert_eq!(last.watermark(), -1);
    assert!(env.active_syncs().is_empty());
    assert!(!env.is_sync_running(sync.id()));
}

#[test]
fn test_leave_if_changed_keeps_local_edits() {
    let env = TestManager::memory();
    env.seed(
        "accounts",
        vec![local_updated("001", "edited here"), local_clean("002")],
    );
    let page = vec![remote_record("001", 10), remote_record("002", 20)];
    let target = ScriptedPullTarget::new(vec![page]).shared();

    pull(&env, &target, SyncOptions::leave_if_changed());

    let kept = local_copies(&env, "001");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0]["Name"], json!("edited here"));
    assert!(record::is_dirty(&kept[0]));

    let refreshed = local_copies(&env, "002");
    assert_eq!(refreshed[0]["Name"], json!("Record 002"));
}

#[test]
fn test_overwrite_replaces_local_edits() {
    let env = TestManager::memory();
    env.seed("accounts", vec![local_updated("001", "edited here")]);
    let target = ScriptedPullTarget::new(vec![vec![remote_record("001", 10)]]).shared();

    pull(&env, &target, SyncOptions::overwrite());

    let stored = local_copies(&env, "001");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["Name"], json!("Record 001"));
    assert!(!record::is_dirty(&stored[0]));
}

#[test]
fn test_failure_keeps_progress_and_records_error() {
    let env = TestManager::memory();
    let target = ScriptedPullTarget::new(vec![
        vec![remote_record("001", 10), remote_record("002", 20)],
        vec![remote_record("003", 30), remote_record("004", 40)],
    ])
    .ordered()
    .failing_at_page(1, || SyncError::transport_retryable("connection reset"))
    .shared();

    let (sync, recorder) = pull(&env, &target, SyncOptions::overwrite());

    let failed = recorder.wait_for_terminal(TIMEOUT).unwrap();
    assert!(failed.has_failed());
    assert_eq!(failed.progress(), 50);
    assert!(failed.error().unwrap().contains("connection reset"));

    let stored = env.get_sync_status(sync.id()).unwrap().unwrap();
    assert!(stored.has_failed());
    assert_eq!(stored.watermark(), 20);
    assert!(env.active_syncs().is_empty());
}

#[test]
fn test_unordered_failure_does_not_advance_watermark() {
    let env = TestManager::memory();
    let target = ScriptedPullTarget::new(vec![vec![remote_record("001", 10)], vec![]])
        .with_total_size(5)
        .failing_at_page(1, || SyncError::target("bad page"))
        .shared();

    let (sync, _) = pull(&env, &target, SyncOptions::overwrite());

    let stored = env.get_sync_status(sync.id()).unwrap().unwrap();
    assert!(stored.has_failed());
    assert_eq!(stored.watermark(), -1);
}

#[test]
fn test_re_run_after_stop_rewinds_watermark() {
    let env = TestManager::memory();
    let manager = env.handle();
    let fired = Arc::new(AtomicBool::new(false));
    let stop_once = Arc::clone(&fired);
    let target = ScriptedPullTarget::new(vec![
        vec![remote_record("001", 500), remote_record("002", 1000)],
        vec![remote_record("003", 1500)],
    ])
    .ordered()
    .with_page_hook(move |index| {
        if index == 1 && !stop_once.swap(true, Ordering::SeqCst) {
            if let Some(manager) = manager.upgrade() {
                manager.stop();
            }
        }
    })
    .shared();
    ScriptedPullTarget::register(&target, &env.targets);

    let (sync, recorder) = pull(&env, &target, SyncOptions::overwrite());

    assert!(fired.load(Ordering::SeqCst));
    let stopped = recorder.wait_for_terminal(TIMEOUT).unwrap();
    assert!(stopped.is_stopped());
    assert_eq!(stopped.watermark(), 1000);
    assert!(env.is_stopped());

    env.restart(false, |_: &SyncState| {}).unwrap();
    let rerun = CallbackRecorder::new();
    let resumed = env.re_run(sync.id(), rerun.callback()).unwrap();
    assert_eq!(resumed.watermark(), 999);
    env.wait_idle().unwrap();

    assert_eq!(target.requested_watermarks(), vec![-1, 999]);
    let done = rerun.wait_for_terminal(TIMEOUT).unwrap();
    assert!(done.is_done());
    assert_eq!(done.watermark(), 1500);
}

#[test]
fn test_re_run_after_failure_keeps_watermark() {
    let env = TestManager::memory();
    let failing = ScriptedPullTarget::new(vec![vec![remote_record("001", 300)], vec![]])
        .ordered()
        .with_total_size(2)
        .failing_at_page(1, || SyncError::target("bad page"))
        .shared();
    ScriptedPullTarget::register(&failing, &env.targets);

    let (sync, _) = pull(&env, &failing, SyncOptions::overwrite());
    let failed = env.get_sync_status(sync.id()).unwrap().unwrap();
    assert!(failed.has_failed());

    env.re_run(sync.id(), |_: &SyncState| {}).unwrap();
    env.wait_idle().unwrap();
    assert_eq!(failing.requested_watermarks(), vec![-1, 300]);
}

#[test]
fn test_re_run_by_name() {
    let env = TestManager::memory();
    let target = ScriptedPullTarget::new(vec![vec![remote_record("001", 10)]])
        .with_kind("contacts")
        .shared();
    ScriptedPullTarget::register(&target, &env.targets);

    env.pull(
        Arc::clone(&target) as Arc<dyn PullTarget>,
        SyncOptions::overwrite(),
        "contacts",
        Some("contacts-down"),
        |_: &SyncState| {},
    )
    .unwrap();
    env.wait_idle().unwrap();

    let recorder = CallbackRecorder::new();
    env.re_run("contacts-down", recorder.callback()).unwrap();
    env.wait_idle().unwrap();

    assert!(recorder.last().unwrap().is_done());
    assert_eq!(target.requested_watermarks(), vec![-1, 10]);
}

#[test]
fn test_re_run_unknown_target_kind() {
    let env = TestManager::memory();
    let target = ScriptedPullTarget::new(Vec::new())
        .with_kind("unregistered")
        .shared();
    let (sync, _) = pull(&env, &target, SyncOptions::overwrite());

    let err = env.re_run(sync.id(), |_: &SyncState| {}).unwrap_err();
    assert!(matches!(err, SyncError::UnknownTarget(_)));
}

#[test]
fn test_clean_ghosts_removes_deleted_remote_records() {
    let env = TestManager::memory();
    let target = ScriptedPullTarget::new(vec![vec![
        remote_record("001", 10),
        remote_record("002", 20),
        remote_record("003", 30),
    ]])
    .shared();
    ScriptedPullTarget::register(&target, &env.targets);
    let (sync, _) = pull(&env, &target, SyncOptions::overwrite());

    // A record from another job and a local edit are never ghosts.
    env.store.upsert("accounts", local_clean("900")).unwrap();
    let mut edited = env
        .store
        .query("accounts", &Query::eq("Id", json!("003")))
        .unwrap()
        .remove(0);
    record::mark_locally_updated(&mut edited);
    env.store.upsert("accounts", edited).unwrap();

    target.delete_remote(["002", "003"]);
    let ghosts = GhostRecorder::new();
    env.clean_ghosts(sync.id(), ghosts.callback()).unwrap();

    assert_eq!(ghosts.wait(TIMEOUT).unwrap().unwrap(), 1);
    let ids: Vec<_> = env
        .store
        .query("accounts", &Query::all())
        .unwrap()
        .iter()
        .filter_map(|r| record::server_id(r, "Id"))
        .collect();
    assert_eq!(ids, vec!["001", "003", "900"]);

    let after = env.get_sync_status(sync.id()).unwrap().unwrap();
    assert!(after.is_done());
    assert!(env.active_syncs().is_empty());
}

#[test]
fn test_clean_ghosts_rejects_push_jobs() {
    let env = TestManager::memory();
    let target = ScriptedPushTarget::new().shared();
    let sync = env
        .create_push(target.as_ref(), SyncOptions::overwrite(), "accounts", None)
        .unwrap();

    let err = env.clean_ghosts(sync.id(), |_| {}).unwrap_err();
    assert!(matches!(
        err,
        SyncError::WrongType {
            expected: SyncType::Pull,
            actual: SyncType::Push,
            ..
        }
    ));
}

#[test]
fn test_clean_ghosts_unknown_job() {
    let env = TestManager::memory();
    let err = env.clean_ghosts(42, |_| {}).unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

//! End-to-end lifecycle scenarios.

#![allow(clippy::unwrap_used)]

use cadence_actions::{
    AbortController, AbortReason, ActionIntents, ActionState, RunOptions, Work,
};
use cadence_testkit::{flush, init_tracing, test_engine, DeferredWork, WorkProbe};
use serde_json::json;

#[test]
fn test_equal_params_bind_to_one_action() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let op = engine.action("fetch_user", probe.echo()).build();

    let child1 = op.bind_params(json!({"id": 1}));
    let child2 = op.bind_params(json!({"id": 1}));
    assert!(child1.ptr_eq(&child2));

    let n1 = op.bind_params(json!(42));
    let n2 = op.bind_params(json!(42));
    assert!(n1.ptr_eq(&n2));
    assert!(!n1.ptr_eq(&child1));
}

#[tokio::test]
async fn test_concurrent_runs_share_one_execution() {
    init_tracing();
    let engine = test_engine();
    let deferred = DeferredWork::new();
    let op = engine.action("fetch_user", deferred.work()).build();

    let first = op.run(RunOptions::default());
    let second = op.run(RunOptions::default());
    assert!(!first.is_ready());
    assert!(!second.is_ready());
    assert_eq!(deferred.calls(), 1);
    assert_eq!(op.state(), ActionState::Running);

    deferred.resolve_next(json!({"v": 1}));
    assert_eq!(first.await.unwrap(), Some(json!({"v": 1})));
    assert_eq!(second.await.unwrap(), Some(json!({"v": 1})));
    assert_eq!(deferred.calls(), 1);
    assert_eq!(op.state(), ActionState::Completed);
}

#[tokio::test]
async fn test_prerun_then_run_completes_once() {
    let engine = test_engine();
    let deferred = DeferredWork::new();
    let op = engine.action("fetch_user", deferred.work()).build();

    let speculative = op.prerun(RunOptions::default());
    assert!(op.is_speculative());
    let promoted = op.run(RunOptions::default());
    assert!(!op.is_speculative());
    assert_eq!(deferred.calls(), 1);

    deferred.resolve_next(json!("user"));
    assert_eq!(promoted.await.unwrap(), Some(json!("user")));
    assert_eq!(speculative.await.unwrap(), Some(json!("user")));
    assert_eq!(op.state(), ActionState::Completed);
    assert!(!op.is_speculative());
    assert_eq!(deferred.calls(), 1);
}

#[test]
fn test_stop_restores_initial_data() {
    let engine = test_engine();
    let op = engine
        .action("load", |_, _| Work::ready(json!({"v": 1})))
        .initial_data(json!("empty"))
        .build();

    let result = op.run(RunOptions::default()).into_ready().unwrap();
    assert_eq!(result.unwrap(), Some(json!({"v": 1})));
    assert_eq!(op.data(), json!({"v": 1}));

    op.stop();
    assert_eq!(op.state(), ActionState::Idle);
    assert_eq!(op.data(), json!("empty"));
}

#[test]
fn test_stop_keeps_data_when_configured() {
    let engine = test_engine();
    let op = engine
        .action("load", |_, _| Work::ready(json!({"v": 1})))
        .keep_old_data(true)
        .build();

    let _ = op.run(RunOptions::default());
    op.stop();
    assert_eq!(op.state(), ActionState::Idle);
    assert_eq!(op.data(), json!({"v": 1}));
}

#[tokio::test]
async fn test_global_abort_wins_over_late_failure() {
    let engine = test_engine();
    let deferred = DeferredWork::new();
    let op = engine.action("fetch_user", deferred.work()).build();
    let global = AbortController::new();

    let result = op.run(RunOptions::default().with_global_abort_signal(global.signal()));
    assert!(global.abort(AbortReason::new("nav")));
    assert_eq!(op.state(), ActionState::Aborted);
    assert!(op.error().is_none());

    deferred.fail_next("late rejection");
    assert_eq!(result.await.unwrap(), None);
    flush().await;
    assert_eq!(op.state(), ActionState::Aborted);
    assert!(op.error().is_none());
}

#[test]
fn test_completed_run_is_reused() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let op = engine.action("count", probe.echo()).build();

    let _ = op.run(RunOptions::default());
    let again = op.run(RunOptions::default()).into_ready().unwrap().unwrap();
    assert_eq!(again, Some(serde_json::Value::Null));
    assert_eq!(probe.calls(), 1);

    let _ = op.rerun(RunOptions::default());
    assert_eq!(probe.calls(), 2);
    assert_eq!(op.state(), ActionState::Completed);
}

#[test]
fn test_state_changes_follow_lifecycle_edges() {
    let engine = test_engine();
    let op = engine
        .action("load", |_, _| Work::ready(json!(1)))
        .build();

    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = seen.clone();
    let _guard = op
        .cells()
        .state()
        .observe(move |state| log.lock().push(*state));

    let _ = op.run(RunOptions::default());
    op.stop();

    assert_eq!(
        *seen.lock(),
        vec![ActionState::Running, ActionState::Completed, ActionState::Idle]
    );
}

#[tokio::test]
async fn test_settled_waits_for_every_affected_action() {
    let engine = test_engine();
    let slow = DeferredWork::new();
    let fast = WorkProbe::new();
    let a = engine.action("slow", slow.work()).build();
    let b = engine.action("fast", fast.echo()).build();

    let outcome = engine.update_actions(ActionIntents::new().run(&a).prerun(&b));
    assert!(!outcome.results.is_ready());
    assert_eq!(b.state(), ActionState::Completed);

    slow.resolve_next(json!("done"));
    outcome.settled.clone().await;
    assert_eq!(a.state(), ActionState::Completed);
    let values = outcome.results.await.unwrap();
    assert_eq!(values, vec![Some(serde_json::Value::Null), Some(json!("done"))]);
}

//! Property tests for intent resolution.
//!
//! Starts made by the batch are synchronous, so they settle inside
//! `update_actions` and the outcome can be compared against a simple model.
//! Hanging work is only used to hold an action in Running or Aborted.

#![allow(clippy::unwrap_used)]

use cadence_actions::{
    AbortReason, Action, ActionIntents, ActionState, Engine, EngineConfig, RunOptions, Work,
    WorkError,
};
use cadence_testkit::WorkProbe;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
enum Initial {
    Idle,
    Completed,
    CompletedSpeculative,
    Running,
    Failed,
    FailedSpeculative,
    Aborted,
    AbortedSpeculative,
}

#[derive(Clone, Copy, Debug)]
struct Request {
    prerun: bool,
    run: bool,
    rerun: bool,
    reset: bool,
}

/// What the next invocation of scripted work does.
#[derive(Clone, Copy)]
enum Outcome {
    Succeed,
    Fail,
    Hang,
}

fn arb_initial() -> impl Strategy<Value = Initial> {
    prop_oneof![
        Just(Initial::Idle),
        Just(Initial::Completed),
        Just(Initial::CompletedSpeculative),
        Just(Initial::Running),
        Just(Initial::Failed),
        Just(Initial::FailedSpeculative),
        Just(Initial::Aborted),
        Just(Initial::AbortedSpeculative),
    ]
}

fn arb_request() -> impl Strategy<Value = Request> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(prerun, run, rerun, reset)| Request {
            prerun,
            run,
            rerun,
            reset,
        },
    )
}

fn scripted(engine: &Engine, name: String, probe: &WorkProbe, outcome: Arc<Mutex<Outcome>>) -> Action {
    let work = probe.wrap(move |params, _| match *outcome.lock() {
        Outcome::Succeed => Work::ready(params.to_value()),
        Outcome::Fail => Work::fail(WorkError::msg("scripted failure")),
        Outcome::Hang => Work::pending(futures::future::pending()),
    });
    engine.action(name, work).build()
}

/// Drive `action` into `initial`. Without a runtime, hanging work stays Running.
fn prepare(action: &Action, outcome: &Mutex<Outcome>, initial: Initial) {
    let (script, speculative, abort) = match initial {
        Initial::Idle => return,
        Initial::Completed => (Outcome::Succeed, false, false),
        Initial::CompletedSpeculative => (Outcome::Succeed, true, false),
        Initial::Running => (Outcome::Hang, false, false),
        Initial::Failed => (Outcome::Fail, false, false),
        Initial::FailedSpeculative => (Outcome::Fail, true, false),
        Initial::Aborted => (Outcome::Hang, false, true),
        Initial::AbortedSpeculative => (Outcome::Hang, true, true),
    };
    *outcome.lock() = script;
    let _ = if speculative {
        action.prerun(RunOptions::default())
    } else {
        action.run(RunOptions::default())
    };
    if abort {
        assert!(action.abort(AbortReason::new("prepare")));
    }
    *outcome.lock() = Outcome::Succeed;
}

/// Expected (state, speculative, invoked) after one batch.
fn model(initial: Initial, request: Request) -> (ActionState, bool, bool) {
    let (state, speculative) = match initial {
        Initial::Idle => (ActionState::Idle, false),
        Initial::Completed => (ActionState::Completed, false),
        Initial::CompletedSpeculative => (ActionState::Completed, true),
        Initial::Running => (ActionState::Running, false),
        Initial::Failed => (ActionState::Failed, false),
        Initial::FailedSpeculative => (ActionState::Failed, true),
        Initial::Aborted => (ActionState::Aborted, false),
        Initial::AbortedSpeculative => (ActionState::Aborted, true),
    };
    let will_reset = request.reset && state != ActionState::Idle;
    let start_speculative = !request.rerun && !request.run && request.prerun;
    let claimed = request.rerun || request.run || request.prerun;

    if !claimed {
        return if will_reset {
            (ActionState::Idle, false, false)
        } else {
            (state, speculative, false)
        };
    }
    if will_reset || request.rerun {
        return (ActionState::Completed, start_speculative, true);
    }
    // Promotion, including a speculative run that already failed or aborted.
    if request.run && speculative && state != ActionState::Idle {
        return (state, false, false);
    }
    if state.is_active() {
        return (state, speculative, false);
    }
    // Idle, or a fresh start of a non-speculative Failed/Aborted action.
    (ActionState::Completed, start_speculative, true)
}

proptest! {
    #[test]
    fn test_batch_matches_model(
        cases in prop::collection::vec((arb_initial(), arb_request()), 1..5)
    ) {
        let engine = Engine::new(EngineConfig::default().with_diagnostics(false)).unwrap();
        let mut intents = ActionIntents::new();
        let mut subjects = Vec::new();

        for (i, (initial, request)) in cases.iter().enumerate() {
            let probe = WorkProbe::new();
            let outcome = Arc::new(Mutex::new(Outcome::Succeed));
            let action = scripted(&engine, format!("op{i}"), &probe, outcome.clone());
            prepare(&action, &outcome, *initial);
            let calls_before = probe.calls();

            if request.prerun { intents = intents.prerun(&action); }
            if request.run { intents = intents.run(&action); }
            if request.rerun { intents = intents.rerun(&action); }
            if request.reset { intents = intents.reset(&action); }
            subjects.push((action, probe, calls_before, *initial, *request));
        }

        let outcome = engine.update_actions(intents);
        let requested = cases.iter().filter(|(_, r)| r.prerun || r.run || r.rerun).count();
        let still_running = cases
            .iter()
            .filter(|(_, r)| r.prerun || r.run || r.rerun)
            .any(|(initial, request)| model(*initial, *request).0 == ActionState::Running);
        if still_running {
            // A carried-over hanging run keeps the aggregate pending.
            prop_assert!(!outcome.results.is_ready());
        } else {
            let results = outcome.results.into_ready().unwrap().unwrap();
            prop_assert_eq!(results.len(), requested);
        }

        for (action, probe, calls_before, initial, request) in subjects {
            let (state, speculative, invoked) = model(initial, request);
            prop_assert_eq!(action.state(), state, "{:?} {:?}", initial, request);
            prop_assert_eq!(action.is_speculative(), speculative, "{:?} {:?}", initial, request);
            prop_assert_eq!(probe.calls() - calls_before, usize::from(invoked));
        }
    }

    #[test]
    fn test_equal_params_share_one_child(
        fields in prop::collection::btree_map("[a-d]", any::<i32>(), 0..5),
        tags in prop::collection::vec(any::<bool>(), 0..4),
    ) {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let probe = WorkProbe::new();
        let root = engine.action("root", probe.echo()).build();

        let forward: serde_json::Map<_, _> =
            fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
        let reverse: serde_json::Map<_, _> =
            fields.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();

        let a = root.bind_params(json!({"fields": forward, "tags": tags}));
        let b = root.bind_params(json!({"tags": tags.clone(), "fields": reverse}));
        prop_assert!(a.ptr_eq(&b));
    }
}

#[test]
fn test_promotion_never_reinvokes_work() {
    let engine = Engine::default();
    let deferred = cadence_testkit::DeferredWork::new();
    let op = engine.action("prefetch", deferred.work()).build();

    // No runtime: the run is pending and never driven, which is all this needs.
    let _ = op.prerun(RunOptions::default());
    for _ in 0..3 {
        let _ = op.run(RunOptions::default());
    }
    assert_eq!(deferred.calls(), 1);
    assert!(!op.is_speculative());
    assert_eq!(op.state(), ActionState::Running);
}

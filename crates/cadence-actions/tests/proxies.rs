//! Proxy retargeting against reactive parameter sources.

#![allow(clippy::unwrap_used)]

use cadence_actions::{
    ActionIntents, ActionState, Params, ParamsPlan, ParamsSource, ProxyOptions, RunOptions,
};
use cadence_core::Dynamic;
use cadence_testkit::{test_engine, WorkProbe};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_plan_merges_static_fields_with_cells() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let users = engine.action("user", probe.echo()).build();

    let id = Dynamic::new(json!(1));
    let plan = ParamsPlan::new()
        .with_value("include", json!("posts"))
        .with_cell("id", id.clone());
    let handle = users.bind(plan);
    assert!(handle.is_proxy());
    assert_eq!(handle.params().to_value(), json!({"id": 1, "include": "posts"}));

    id.set(json!(2));
    let target = handle.target();
    assert_eq!(target.params().to_value(), json!({"id": 2, "include": "posts"}));
    assert!(target.ptr_eq(&users.bind_params(json!({"include": "posts", "id": 2}))));
}

#[test]
fn test_rerun_on_change_restarts_new_target() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let users = engine.action("user", probe.echo()).build();
    let source = Dynamic::new(Params::Value(json!({"id": 1})));
    let proxy = users.bind_source(
        ParamsSource::Cell(source.clone()),
        ProxyOptions {
            rerun_on_change: true,
        },
    );

    let _ = proxy.run(RunOptions::default());
    assert_eq!(probe.calls(), 1);

    source.set(Params::Value(json!({"id": 2})));
    assert_eq!(probe.calls(), 2);
    assert_eq!(probe.last().unwrap().params, json!({"id": 2}));
    assert_eq!(proxy.state(), ActionState::Completed);
    assert_eq!(proxy.cells().data().get(), json!({"id": 2}));
}

#[test]
fn test_speculative_target_is_not_rerun() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let users = engine.action("user", probe.echo()).build();
    let source = Dynamic::new(Params::Value(json!({"id": 1})));
    let proxy = users.bind_source(
        ParamsSource::Cell(source.clone()),
        ProxyOptions {
            rerun_on_change: true,
        },
    );

    let _ = proxy.prerun(RunOptions::default());
    source.set(Params::Value(json!({"id": 2})));
    assert_eq!(probe.calls(), 1);
    assert_eq!(proxy.state(), ActionState::Idle);
}

#[test]
fn test_scheduler_resolves_proxies_to_targets() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let users = engine.action("user", probe.echo()).build();
    let source = Dynamic::new(Params::Value(json!({"id": 9})));
    let proxy = users.bind_source(ParamsSource::Cell(source), ProxyOptions::default());
    let direct = users.bind_params(json!({"id": 9}));

    let outcome = engine.update_actions(ActionIntents::new().run(&proxy).run(&direct));
    assert_eq!(outcome.summary.started, vec![direct.id()]);
    assert_eq!(probe.calls(), 1);
}

#[test]
fn test_retarget_guard_unregisters_listener() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let users = engine.action("user", probe.echo()).build();
    let source = Dynamic::new(Params::Unset);
    let proxy = users.bind_source(ParamsSource::Cell(source.clone()), ProxyOptions::default());

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let guard = proxy.on_retarget(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    source.set(Params::Value(json!(1)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    drop(guard);
    source.set(Params::Unset);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(proxy.target().ptr_eq(&users));
}

#[test]
fn test_descendants_include_live_proxies() {
    let engine = test_engine();
    let probe = WorkProbe::new();
    let users = engine.action("user", probe.echo()).build();
    let _child = users.bind_params(json!({"id": 1}));
    let proxy = users.bind_source(
        ParamsSource::Cell(Dynamic::new(Params::Value(json!({"id": 1})))),
        ProxyOptions::default(),
    );

    let without = users.match_all_self_or_descendant(|_| true, false);
    let with = users.match_all_self_or_descendant(|_| true, true);
    assert_eq!(without.len(), 2);
    assert_eq!(with.len(), 3);
    assert!(with.iter().any(|h| h.as_proxy().is_some_and(|p| p.ptr_eq(&proxy))));
}

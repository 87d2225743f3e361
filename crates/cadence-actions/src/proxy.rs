//! Proxies: actions that follow reactive parameters.
//!
//! A [`ProxyAction`] resolves its parameter source to a concrete target
//! (the bound action for `Params::Unset`, otherwise a child). It mirrors the
//! target's cells into its own, so consumers can observe one stable set of
//! cells while the target changes underneath.
//!
//! Resolution is pushed by source observers and also forced before every
//! method call, so a source written inside an open batch is honored without
//! waiting for the batch to commit.

use cadence_core::{AbortReason, ObserverGuard, Params};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::action::{Action, ActionCells};
use crate::bind::{ParamsInput, ParamsSource};
use crate::handle::ActionHandle;
use crate::errors::WorkError;
use crate::scheduler::{RunOptions, RunResult};
use crate::state::ActionState;

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyOptions {
    /// Restart the new target when the old one had left its speculative
    /// phase and was not Idle.
    pub rerun_on_change: bool,
}

#[derive(Clone)]
enum ProxyTarget {
    Root,
    Child(Action),
}

impl ProxyTarget {
    fn resolve(root: &Action, params: &Params) -> Self {
        match params {
            Params::Unset => ProxyTarget::Root,
            Params::Value(value) => ProxyTarget::Child(root.bind_params(value.clone())),
        }
    }

    fn action(&self, root: &Action) -> Action {
        match self {
            ProxyTarget::Root => root.clone(),
            ProxyTarget::Child(child) => child.clone(),
        }
    }

    fn same_as(&self, other: &ProxyTarget) -> bool {
        match (self, other) {
            (ProxyTarget::Root, ProxyTarget::Root) => true,
            (ProxyTarget::Child(a), ProxyTarget::Child(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

type RetargetListener = Arc<dyn Fn(&Action, &Action) + Send + Sync>;

pub(crate) struct ProxyInner {
    id: u64,
    root: Action,
    source: ParamsSource,
    options: ProxyOptions,
    target: Mutex<ProxyTarget>,
    seen_version: Mutex<u64>,
    mirror: ActionCells,
    mirror_guards: Mutex<Vec<ObserverGuard>>,
    source_guards: Mutex<Vec<ObserverGuard>>,
    listeners: Mutex<Vec<(u64, RetargetListener)>>,
    next_listener: AtomicU64,
}

/// Action-like handle following a reactive parameter source.
#[derive(Clone)]
pub struct ProxyAction {
    inner: Arc<ProxyInner>,
}

impl ProxyAction {
    pub(crate) fn new(root: Action, source: ParamsSource, options: ProxyOptions) -> Self {
        let seen_version = source.version();
        let target = ProxyTarget::resolve(&root, &source.current());
        let initial = target.action(&root);
        let mirror = ActionCells::snapshot_of(initial.cells());

        let proxy = Self {
            inner: Arc::new(ProxyInner {
                id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
                root,
                source,
                options,
                target: Mutex::new(target),
                seen_version: Mutex::new(seen_version),
                mirror,
                mirror_guards: Mutex::new(Vec::new()),
                source_guards: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        };

        let guards = proxy.inner.mirror.follow(initial.cells());
        *proxy.inner.mirror_guards.lock() = guards;

        let weak = Arc::downgrade(&proxy.inner);
        let guards = proxy.inner.source.observe(move || {
            if let Some(inner) = weak.upgrade() {
                ProxyAction { inner }.sync();
            }
        });
        *proxy.inner.source_guards.lock() = guards;

        tracing::trace!(proxy = proxy.inner.id, target = %initial, "proxy created");
        proxy
    }

    pub(crate) fn downgrade(&self) -> Weak<ProxyInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ProxyInner>) -> Option<ProxyAction> {
        weak.upgrade().map(|inner| ProxyAction { inner })
    }

    /// Resolve the source now and retarget if it moved.
    fn sync(&self) -> Action {
        let root = &self.inner.root;
        let version = self.inner.source.version();
        {
            let mut seen = self.inner.seen_version.lock();
            if *seen == version {
                drop(seen);
                return self.inner.target.lock().action(root);
            }
            *seen = version;
        }

        let next = ProxyTarget::resolve(root, &self.inner.source.current());
        let previous = {
            let mut target = self.inner.target.lock();
            if target.same_as(&next) {
                return next.action(root);
            }
            std::mem::replace(&mut *target, next.clone())
        };

        let (old, new) = (previous.action(root), next.action(root));
        self.retarget(&old, &new);
        new
    }

    fn retarget(&self, old: &Action, new: &Action) {
        let listeners: Vec<RetargetListener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(old, new);
        }

        let guards = self.inner.mirror.follow(new.cells());
        *self.inner.mirror_guards.lock() = guards;
        tracing::debug!(proxy = self.inner.id, from = %old, to = %new, "proxy retargeted");

        if self.inner.options.rerun_on_change
            && old.state() != ActionState::Idle
            && !old.is_speculative()
        {
            let result = new.rerun(RunOptions::default());
            report_detached(new, result);
        }
    }

    /// Current target, resolved now.
    pub fn target(&self) -> Action {
        self.sync()
    }

    /// The action this proxy was bound from.
    pub fn root(&self) -> &Action {
        &self.inner.root
    }

    /// Whether both handles refer to the same proxy.
    pub fn ptr_eq(&self, other: &ProxyAction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Mirrored cells. They follow whichever action is the current target.
    pub fn cells(&self) -> &ActionCells {
        self.sync();
        &self.inner.mirror
    }

    /// Register a listener called with (old, new) before cells are re-mirrored.
    pub fn on_retarget<F>(&self, listener: F) -> RetargetGuard
    where
        F: Fn(&Action, &Action) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        RetargetGuard {
            proxy: self.downgrade(),
            id,
        }
    }

    pub fn state(&self) -> ActionState {
        self.sync().state()
    }

    pub fn is_speculative(&self) -> bool {
        self.sync().is_speculative()
    }

    pub fn params(&self) -> Params {
        self.sync().params()
    }

    pub fn error(&self) -> Option<WorkError> {
        self.sync().error()
    }

    pub fn data(&self) -> Value {
        self.sync().data()
    }

    pub fn derived(&self) -> Value {
        self.sync().derived()
    }

    pub fn prerun(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.sync().prerun(options)
    }

    pub fn run(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.sync().run(options)
    }

    pub fn rerun(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.sync().rerun(options)
    }

    pub fn stop(&self) {
        self.sync().stop()
    }

    pub fn abort(&self, reason: AbortReason) -> bool {
        self.sync().abort(reason)
    }

    pub fn bind_params(&self, overlay: Value) -> Action {
        self.sync().bind_params(overlay)
    }

    pub fn replace_params(&self, overlay: Value) -> bool {
        self.sync().replace_params(overlay)
    }

    pub fn bind(&self, input: impl Into<ParamsInput>) -> ActionHandle {
        self.sync().bind(input)
    }

    pub fn bind_source(&self, source: ParamsSource, options: ProxyOptions) -> ProxyAction {
        self.sync().bind_source(source, options)
    }

    /// Matches below the current target.
    pub fn match_all_self_or_descendant<P>(
        &self,
        predicate: P,
        include_proxies: bool,
    ) -> Vec<ActionHandle>
    where
        P: Fn(&ActionHandle) -> bool,
    {
        self.sync()
            .match_all_self_or_descendant(predicate, include_proxies)
    }
}

fn report_detached(action: &Action, result: RunResult<Option<Value>>) {
    match result {
        RunResult::Ready(Ok(_)) => {}
        RunResult::Ready(Err(error)) => {
            tracing::warn!(action = %action, %error, "rerun after retarget failed");
        }
        RunResult::Pending(pending) => {
            let name = action.to_string();
            let report = async move {
                if let Err(error) = pending.await {
                    tracing::warn!(action = %name, %error, "rerun after retarget failed");
                }
            };
            let _ = action.engine().spawn(report.boxed());
        }
    }
}

impl fmt::Display for ProxyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sync())
    }
}

impl fmt::Debug for ProxyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAction")
            .field("id", &self.inner.id)
            .field("target", &self.sync())
            .finish()
    }
}

/// Unregisters a retarget listener on drop.
#[must_use = "the listener is removed as soon as the guard is dropped"]
pub struct RetargetGuard {
    proxy: Weak<ProxyInner>,
    id: u64,
}

impl Drop for RetargetGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.proxy.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::Work;
    use crate::Engine;
    use cadence_core::Dynamic;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn echo(engine: &Engine) -> Action {
        engine
            .action("echo", |params: &Params, _| Work::ready(params.to_value()))
            .build()
    }

    #[test]
    fn test_unset_source_targets_root() {
        let engine = Engine::default();
        let root = echo(&engine);
        let source = Dynamic::new(Params::Unset);
        let proxy = root.bind_source(ParamsSource::Cell(source.clone()), ProxyOptions::default());
        assert!(proxy.target().ptr_eq(&root));

        source.set(Params::Value(json!({"id": 1})));
        assert!(proxy.target().ptr_eq(&root.bind_params(json!({"id": 1}))));
    }

    #[test]
    fn test_retarget_listener_sees_old_and_new() {
        let engine = Engine::default();
        let root = echo(&engine);
        let source = Dynamic::new(Params::Value(json!({"id": 1})));
        let proxy = root.bind_source(ParamsSource::Cell(source.clone()), ProxyOptions::default());

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let _guard = proxy.on_retarget(move |old, new| {
            assert_eq!(old.params().to_value(), json!({"id": 1}));
            assert_eq!(new.params().to_value(), json!({"id": 2}));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        source.set(Params::Value(json!({"id": 2})));
        // Forced resolution after the push must not retarget twice.
        let _ = proxy.target();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mirror_follows_target() {
        let engine = Engine::default();
        let root = echo(&engine);
        let source = Dynamic::new(Params::Value(json!({"id": 1})));
        let proxy = root.bind_source(ParamsSource::Cell(source.clone()), ProxyOptions::default());

        let result = proxy.run(RunOptions::default());
        assert!(result.is_ready());
        assert_eq!(proxy.cells().data().get(), json!({"id": 1}));

        source.set(Params::Value(json!({"id": 2})));
        assert_eq!(proxy.cells().state().get(), ActionState::Idle);
        assert_eq!(proxy.cells().params().get(), Params::Value(json!({"id": 2})));
    }

    #[test]
    fn test_bind_through_proxy_merges_with_target() {
        let engine = Engine::default();
        let root = echo(&engine);
        let source = Dynamic::new(Params::Value(json!({"id": 1})));
        let proxy = root.bind_source(ParamsSource::Cell(source), ProxyOptions::default());

        let page = proxy.bind(json!({"page": 2}));
        assert!(!page.is_proxy());
        assert_eq!(page.params().to_value(), json!({"id": 1, "page": 2}));

        let found = proxy.match_all_self_or_descendant(|h| h.params().to_value()["page"] == 2, false);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_source_written_in_batch_resolves_on_call() {
        let engine = Engine::default();
        let root = echo(&engine);
        let source = Dynamic::new(Params::Value(json!({"id": 1})));
        let proxy = root.bind_source(ParamsSource::Cell(source.clone()), ProxyOptions::default());

        cadence_core::batch(|| {
            source.set(Params::Value(json!({"id": 5})));
            assert_eq!(proxy.params(), Params::Value(json!({"id": 5})));
        });
    }
}

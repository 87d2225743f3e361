//! Actions: deduplicated units of asynchronous work.
//!
//! An [`Action`] wraps a work function and a parameter value. It exposes its
//! lifecycle through reactive cells and is started, promoted and reset only
//! through the scheduler ([`Engine::update_actions`]). The internal start and
//! stop routines live here.
//!
//! Each start opens a new *run*: a generation number plus an abort scope
//! linked to the engine root, the global scope and the batch scope. Late
//! results from a superseded generation are dropped, and a run whose scope
//! fired ends `Aborted` whatever its work later returns.

use cadence_core::{
    batch, AbortController, AbortListenerGuard, AbortReason, AbortSignal, BatchGuard, Dynamic,
    DynamicLink, ObserverGuard, Params, ParamsKey,
};
use futures::future::{self, BoxFuture, Either, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::diagnostics::{Diagnostic, Intent, PlaybackCommand};
use crate::engine::Engine;
use crate::errors::{ActionError, WorkError};
use crate::proxy::ProxyInner;
use crate::scheduler::{ActionIntents, RunOptions, RunResult};
use crate::state::ActionState;
use crate::work::{Work, WorkContext, WorkFn, WorkResult};

/// Engine-unique action id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ActionId(pub(crate) u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cleanup returned by a completion side effect, run on the next reset.
pub type Teardown = Box<dyn FnOnce() + Send>;

pub type DataEffect = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type CompleteSideEffect = Arc<dyn Fn(&Action, &Value) -> Option<Teardown> + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Action, &WorkError) + Send + Sync>;
pub type Projection = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

type DeriveFn = Box<dyn Fn(Value) -> Value + Send + Sync>;

/// Construction options, shared by a root action and all its children.
#[derive(Clone, Default)]
pub(crate) struct ActionOptions {
    pub(crate) keep_old_data: bool,
    pub(crate) clear_data_on_error: bool,
    pub(crate) initial_data: Value,
    pub(crate) data_effect: Option<DataEffect>,
    pub(crate) complete_side_effect: Option<CompleteSideEffect>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) derive: Option<Projection>,
}

pub(crate) type RunOutput = Result<Option<Value>, ActionError>;
pub(crate) type SharedRun = Shared<BoxFuture<'static, RunOutput>>;

/// Outcome of a run: known now, or shared by everyone awaiting it.
#[derive(Clone)]
pub(crate) enum Completion {
    Ready(RunOutput),
    Pending(SharedRun),
}

impl Completion {
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self, Completion::Ready(_))
    }

    pub(crate) fn into_future(self) -> BoxFuture<'static, RunOutput> {
        match self {
            Completion::Ready(output) => future::ready(output).boxed(),
            Completion::Pending(shared) => shared.boxed(),
        }
    }
}

/// Reactive cells of an action. A proxy owns a mirrored set.
#[derive(Clone)]
pub struct ActionCells {
    pub(crate) state: Dynamic<ActionState>,
    pub(crate) speculative: Dynamic<bool>,
    pub(crate) params: Dynamic<Params>,
    pub(crate) error: Dynamic<Option<WorkError>>,
    pub(crate) data: Dynamic<Value>,
    pub(crate) derived: Dynamic<Value>,
}

impl ActionCells {
    /// Fresh cells holding the current values of `other`.
    pub(crate) fn snapshot_of(other: &ActionCells) -> Self {
        Self {
            state: Dynamic::new(other.state.get()),
            speculative: Dynamic::new(other.speculative.get()),
            params: Dynamic::new(other.params.get()),
            error: Dynamic::new(other.error.get()),
            data: Dynamic::new(other.data.get()),
            derived: Dynamic::new(other.derived.get()),
        }
    }

    /// Copy every cell of `source` into `self` and keep following it until
    /// the returned guards drop.
    pub(crate) fn follow(&self, source: &ActionCells) -> Vec<ObserverGuard> {
        batch(|| {
            vec![
                mirror(&source.state, &self.state),
                mirror(&source.speculative, &self.speculative),
                mirror(&source.params, &self.params),
                mirror(&source.error, &self.error),
                mirror(&source.data, &self.data),
                mirror(&source.derived, &self.derived),
            ]
        })
    }

    pub fn state(&self) -> &Dynamic<ActionState> {
        &self.state
    }

    pub fn speculative(&self) -> &Dynamic<bool> {
        &self.speculative
    }

    pub fn params(&self) -> &Dynamic<Params> {
        &self.params
    }

    pub fn error(&self) -> &Dynamic<Option<WorkError>> {
        &self.error
    }

    pub fn data(&self) -> &Dynamic<Value> {
        &self.data
    }

    pub fn derived(&self) -> &Dynamic<Value> {
        &self.derived
    }
}

fn mirror<T: Clone + Send + Sync + 'static>(source: &Dynamic<T>, target: &Dynamic<T>) -> ObserverGuard {
    target.set(source.get());
    let target = target.clone();
    source.observe(move |value| target.set(value.clone()))
}

#[derive(Default)]
struct RunSlot {
    generation: u64,
    controller: Option<AbortController>,
    scopes: Vec<AbortSignal>,
    completion: Option<Completion>,
    teardown: Option<Teardown>,
    listener: Option<AbortListenerGuard>,
}

pub(crate) struct ActionInner {
    id: ActionId,
    engine: Engine,
    label: Arc<str>,
    work: WorkFn,
    pub(crate) options: Arc<ActionOptions>,
    parent: Option<Action>,
    pub(crate) children: Mutex<HashMap<ParamsKey, Weak<ActionInner>>>,
    pub(crate) proxies: Mutex<Vec<Weak<ProxyInner>>>,
    cells: ActionCells,
    derive_link: Mutex<DynamicLink<Value, Value, DeriveFn>>,
    run: Mutex<RunSlot>,
    error_renderers: AtomicUsize,
}

/// Handle to an action. Clones refer to the same action.
#[derive(Clone)]
pub struct Action {
    pub(crate) inner: Arc<ActionInner>,
}

impl Action {
    fn construct(
        engine: Engine,
        label: Arc<str>,
        work: WorkFn,
        options: Arc<ActionOptions>,
        parent: Option<Action>,
        params: Params,
    ) -> Self {
        let id = engine.next_id();
        let data = Dynamic::new(options.initial_data.clone());
        let projection = options.derive.clone();
        let derive_fn: DeriveFn = Box::new(move |value: Value| match &projection {
            Some(project) => project(&value),
            None => value,
        });
        let (derived, derive_link) = data.map(derive_fn);

        let cells = ActionCells {
            state: Dynamic::new(ActionState::Idle),
            speculative: Dynamic::new(false),
            params: Dynamic::new(params),
            error: Dynamic::new(None),
            data,
            derived,
        };

        Self {
            inner: Arc::new(ActionInner {
                id,
                engine,
                label,
                work,
                options,
                parent,
                children: Mutex::new(HashMap::new()),
                proxies: Mutex::new(Vec::new()),
                cells,
                derive_link: Mutex::new(derive_link),
                run: Mutex::new(RunSlot::default()),
                error_renderers: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn new_child(parent: &Action, params: Params) -> Self {
        Self::construct(
            parent.inner.engine.clone(),
            parent.inner.label.clone(),
            parent.inner.work.clone(),
            parent.inner.options.clone(),
            Some(parent.clone()),
            params,
        )
    }

    pub(crate) fn downgrade(&self) -> Weak<ActionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ActionInner>) -> Option<Action> {
        weak.upgrade().map(|inner| Action { inner })
    }

    pub fn id(&self) -> ActionId {
        self.inner.id
    }

    /// Name of the wrapped work, without parameters.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Diagnostic name, `label(params)`.
    pub fn name(&self) -> String {
        self.to_string()
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// The action this one was parameterized from.
    pub fn parent(&self) -> Option<&Action> {
        self.inner.parent.as_ref()
    }

    /// Whether both handles refer to the same action.
    pub fn ptr_eq(&self, other: &Action) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn cells(&self) -> &ActionCells {
        &self.inner.cells
    }

    pub fn state(&self) -> ActionState {
        self.inner.cells.state.get()
    }

    pub fn is_speculative(&self) -> bool {
        self.inner.cells.speculative.get()
    }

    pub fn params(&self) -> Params {
        self.inner.cells.params.get()
    }

    pub fn error(&self) -> Option<WorkError> {
        self.inner.cells.error.get()
    }

    /// Last stored result (the raw result after `data_effect`).
    pub fn data(&self) -> Value {
        self.inner.cells.data.get()
    }

    /// Projection of `data` through the `derive` option.
    pub fn derived(&self) -> Value {
        self.inner.cells.derived.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ActionState::Running
    }

    pub fn is_completed(&self) -> bool {
        self.state() == ActionState::Completed
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == ActionState::Aborted
    }

    /// Start speculatively. See [`Engine::update_actions`].
    pub fn prerun(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.dispatch(Intent::Prerun, options)
    }

    /// Start, or promote a speculative run. Completed runs are reused.
    pub fn run(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.dispatch(Intent::Run, options)
    }

    /// Reset if needed and start again.
    pub fn rerun(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.dispatch(Intent::Rerun, options)
    }

    /// Reset to `Idle`, aborting a running run.
    pub fn stop(&self) {
        let _ = self
            .inner
            .engine
            .update_actions(ActionIntents::new().reset(self));
    }

    fn dispatch(&self, intent: Intent, options: RunOptions) -> RunResult<Option<Value>> {
        let intents = ActionIntents::new()
            .with_run_options(options)
            .request(intent, self);
        self.inner
            .engine
            .update_actions(intents)
            .results
            .map(|values| values.into_iter().next().flatten())
    }

    /// Abort the current run. Returns false if nothing was running.
    pub fn abort(&self, reason: AbortReason) -> bool {
        if !self.is_running() {
            return false;
        }
        let controller = self.inner.run.lock().controller.clone();
        match controller {
            Some(controller) => controller.abort(reason),
            None => false,
        }
    }

    /// Mark a UI consumer as handling this action's failures.
    ///
    /// While any guard is alive, failures are stored in `error` instead of
    /// being surfaced to the caller that started the run.
    pub fn register_error_renderer(&self) -> ErrorRendererGuard {
        self.inner.error_renderers.fetch_add(1, Ordering::SeqCst);
        ErrorRendererGuard {
            action: self.clone(),
        }
    }

    /// Whether failures are currently swallowed.
    pub fn is_error_handled(&self) -> bool {
        self.inner.options.on_error.is_some()
            || self.inner.error_renderers.load(Ordering::SeqCst) > 0
    }

    /// Check whether a playback command is valid in the current state.
    ///
    /// Idle and Aborted actions reject finish/pause/reverse with a
    /// diagnostic; nothing is changed either way.
    pub fn guard_playback(&self, command: PlaybackCommand) -> bool {
        let state = self.state();
        if matches!(state, ActionState::Idle | ActionState::Aborted) {
            self.inner.engine.diagnose(Diagnostic::ProtocolMisuse {
                action: self.to_string(),
                command,
                state,
            });
            return false;
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal routines (called by the scheduler)
    // ─────────────────────────────────────────────────────────────────────

    fn transition(&self, next: ActionState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            tracing::error!(action = %self, from = %current, to = %next, "illegal transition refused");
            return false;
        }
        self.inner.cells.state.set(next);
        tracing::debug!(action = %self, from = %current, to = %next, "action transition");
        true
    }

    fn set_data(&self, value: Value) {
        self.inner.cells.data.set(value);
        self.inner.derive_link.lock().propagate();
    }

    pub(crate) fn promote(&self) {
        self.inner.cells.speculative.set(false);
        tracing::debug!(action = %self, "speculative action promoted");
    }

    /// Outcome of the current or last run, for requests that reuse it.
    pub(crate) fn current_completion(&self) -> Completion {
        match self.state() {
            ActionState::Running => self
                .inner
                .run
                .lock()
                .completion
                .clone()
                .unwrap_or(Completion::Ready(Ok(None))),
            ActionState::Completed => Completion::Ready(Ok(Some(self.data()))),
            _ => Completion::Ready(Ok(None)),
        }
    }

    fn store_completion(&self, generation: u64, completion: Completion) -> Completion {
        let mut slot = self.inner.run.lock();
        if slot.generation == generation {
            slot.completion = Some(completion.clone());
        }
        completion
    }

    /// Start routine. The action must be Idle, Failed or Aborted.
    pub(crate) fn perform_run(&self, speculative: bool, scopes: Vec<AbortSignal>) -> Completion {
        let controller = AbortController::child_of(scopes.iter());
        let generation = {
            let mut slot = self.inner.run.lock();
            slot.generation += 1;
            slot.controller = Some(controller.clone());
            slot.scopes = scopes;
            slot.completion = None;
            slot.listener = None;
            slot.generation
        };

        batch(|| {
            if self.state().is_settled() {
                self.transition(ActionState::Idle);
            }
            self.inner.cells.error.set(None);
            self.inner.cells.speculative.set(speculative);
            self.transition(ActionState::Running);
        });

        // Registered after entering Running: a scope that is already aborted
        // fires the listener right here.
        let weak = self.downgrade();
        let listener = controller.signal().on_abort(move |reason| {
            if let Some(action) = Action::upgrade(&weak) {
                action.handle_abort(generation, reason);
            }
        });
        {
            let mut slot = self.inner.run.lock();
            if slot.generation == generation {
                slot.listener = Some(listener);
            }
        }

        if controller.is_aborted() {
            return self.store_completion(generation, Completion::Ready(Ok(None)));
        }

        let context = WorkContext {
            signal: controller.signal(),
            is_speculative: speculative,
        };
        let params = self.params();
        match (self.inner.work)(&params, context) {
            Work::Ready(result) => {
                let output = self.settle(generation, Some(result));
                self.store_completion(generation, Completion::Ready(output))
            }
            Work::Pending(work) => {
                let this = self.clone();
                let aborted = Box::pin(controller.signal().aborted());
                let driver: BoxFuture<'static, RunOutput> = async move {
                    let result = match future::select(work, aborted).await {
                        Either::Left((result, _)) => Some(result),
                        Either::Right(_) => None,
                    };
                    this.settle(generation, result)
                }
                .boxed();
                let shared = driver.shared();
                let completion =
                    self.store_completion(generation, Completion::Pending(shared.clone()));
                if !self.inner.engine.spawn(shared.map(|_| ()).boxed()) {
                    tracing::debug!(action = %self, "run not spawned, progresses when awaited");
                }
                completion
            }
        }
    }

    /// Apply a run's result. `None` means its abort scope won the race.
    fn settle(&self, generation: u64, result: Option<WorkResult>) -> RunOutput {
        let (current, aborted) = {
            let slot = self.inner.run.lock();
            let aborted = slot
                .controller
                .as_ref()
                .map_or(true, AbortController::is_aborted);
            (slot.generation == generation, aborted)
        };
        if !current {
            tracing::debug!(action = %self, generation, "dropping result of superseded run");
            return Ok(None);
        }

        let result = match result {
            Some(result) if !aborted => result,
            _ => {
                if self.is_running() {
                    batch(|| self.transition(ActionState::Aborted));
                }
                return Ok(None);
            }
        };
        if !self.is_running() {
            return Ok(None);
        }

        let options = self.inner.options.clone();
        match result {
            Ok(raw) => {
                let stored = match &options.data_effect {
                    Some(effect) => effect(raw),
                    None => raw,
                };
                batch(|| {
                    self.set_data(stored.clone());
                    self.transition(ActionState::Completed);
                    let teardown = options
                        .complete_side_effect
                        .as_ref()
                        .and_then(|effect| effect(self, &stored));
                    // Stored before the batch commits: observers may reset.
                    if let Some(teardown) = teardown {
                        self.store_teardown(generation, teardown);
                    }
                });
                Ok(Some(stored))
            }
            Err(error) => {
                let handled = self.is_error_handled();
                batch(|| {
                    self.inner.cells.error.set(Some(error.clone()));
                    if options.clear_data_on_error {
                        self.set_data(options.initial_data.clone());
                    }
                    self.transition(ActionState::Failed);
                });
                if let Some(on_error) = &options.on_error {
                    on_error(self, &error);
                }
                if handled {
                    tracing::debug!(action = %self, %error, "action failed, handled by consumer");
                    Ok(None)
                } else {
                    self.inner.engine.diagnose(Diagnostic::UnhandledFailure {
                        action: self.to_string(),
                        message: error.to_string(),
                    });
                    Err(ActionError::failed(self.to_string(), error))
                }
            }
        }
    }

    /// Keep `teardown` for the next reset of this run, or run it now if the
    /// run was already superseded.
    fn store_teardown(&self, generation: u64, teardown: Teardown) {
        let stale = {
            let mut slot = self.inner.run.lock();
            if slot.generation == generation {
                slot.teardown = Some(teardown);
                None
            } else {
                Some(teardown)
            }
        };
        if let Some(teardown) = stale {
            tracing::debug!(action = %self, generation, "run superseded, tearing down now");
            teardown();
        }
    }

    fn handle_abort(&self, generation: u64, reason: &AbortReason) {
        let (current, scopes) = {
            let slot = self.inner.run.lock();
            (slot.generation == generation, slot.scopes.clone())
        };
        if !current || !self.is_running() {
            return;
        }
        batch(|| self.transition(ActionState::Aborted));
        tracing::debug!(action = %self, %reason, "run aborted");

        if self.is_speculative() && scopes.iter().any(AbortSignal::is_aborted) {
            self.inner.engine.unprotect(self);
        }
    }

    /// Stop routine: abort if running, run teardown, return to Idle.
    pub(crate) fn perform_stop(&self) {
        let guard = BatchGuard::begin();

        if self.is_running() {
            let controller = self.inner.run.lock().controller.clone();
            if let Some(controller) = controller {
                controller.abort(AbortReason::new(format!("{self} stopped")));
            }
            // The abort listener may not be registered yet when a stop comes
            // from an observer of the start itself.
            if self.is_running() {
                self.transition(ActionState::Aborted);
            }
        }

        let teardown = {
            let mut slot = self.inner.run.lock();
            slot.generation += 1;
            slot.controller = None;
            slot.scopes.clear();
            slot.completion = None;
            slot.listener = None;
            slot.teardown.take()
        };
        if let Some(teardown) = teardown {
            teardown();
        }

        self.inner.cells.error.set(None);
        if !self.inner.options.keep_old_data {
            self.set_data(self.inner.options.initial_data.clone());
        }
        self.inner.cells.speculative.set(false);
        if self.state().is_settled() {
            self.transition(ActionState::Idle);
        }
        guard.commit();

        self.inner.engine.inner.registry.remove(self.id());
        self.inner.engine.unprotect(self);
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.inner.label, self.params())
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id())
            .field("name", &self.to_string())
            .field("state", &self.state())
            .field("speculative", &self.is_speculative())
            .finish()
    }
}

/// Keeps an action's failures swallowed while alive.
#[must_use = "the renderer is unregistered as soon as the guard is dropped"]
pub struct ErrorRendererGuard {
    action: Action,
}

impl Drop for ErrorRendererGuard {
    fn drop(&mut self) {
        self.action
            .inner
            .error_renderers
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for root actions. Options are inherited by every child.
pub struct ActionBuilder {
    engine: Engine,
    label: String,
    work: WorkFn,
    options: ActionOptions,
    params: Params,
}

impl ActionBuilder {
    pub(crate) fn new(engine: Engine, label: String, work: WorkFn) -> Self {
        Self {
            engine,
            label,
            work,
            options: ActionOptions::default(),
            params: Params::Unset,
        }
    }

    /// Keep `data` across resets.
    pub fn keep_old_data(mut self, keep: bool) -> Self {
        self.options.keep_old_data = keep;
        self
    }

    /// Restore the initial data when a run fails.
    pub fn clear_data_on_error(mut self, clear: bool) -> Self {
        self.options.clear_data_on_error = clear;
        self
    }

    /// Value of `data` before the first completion and after resets.
    pub fn initial_data(mut self, value: Value) -> Self {
        self.options.initial_data = value;
        self
    }

    /// Transform raw results before they are stored.
    pub fn data_effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.options.data_effect = Some(Arc::new(effect));
        self
    }

    /// Runs in the same batch as the transition to Completed. The returned
    /// teardown runs on the next reset.
    pub fn complete_side_effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(&Action, &Value) -> Option<Teardown> + Send + Sync + 'static,
    {
        self.options.complete_side_effect = Some(Arc::new(effect));
        self
    }

    /// Declare interest in failures; they are no longer surfaced to callers.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Action, &WorkError) + Send + Sync + 'static,
    {
        self.options.on_error = Some(Arc::new(callback));
        self
    }

    /// Pure projection of `data` exposed as `derived`.
    pub fn derive<F>(mut self, projection: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.options.derive = Some(Arc::new(projection));
        self
    }

    /// Parameters of the root action itself.
    pub fn params(mut self, params: Value) -> Self {
        self.params = Params::Value(params);
        self
    }

    pub fn build(self) -> Action {
        Action::construct(
            self.engine,
            Arc::from(self.label),
            self.work,
            Arc::new(self.options),
            None,
            self.params,
        )
    }
}

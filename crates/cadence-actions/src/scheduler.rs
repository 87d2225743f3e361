//! Batch resolution of action intents.
//!
//! [`update_actions`] takes four intent sets and turns them into one
//! consistent set of effects:
//!
//! 1. Resets of non-Idle actions are applied first.
//! 2. Each action is claimed by its highest-priority start request
//!    (`rerun` over `run` over `prerun`); a reset of the same action turns
//!    any start into a restart.
//! 3. Starts are applied speculative first, then promotions.
//!
//! The caller gets the ordered results plus a `settled` future that
//! resolves once every affected action has reached a terminal state.

use cadence_core::{batch, AbortSignal};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::IntoFuture;

use crate::action::{Action, ActionId, Completion};
use crate::diagnostics::{Diagnostic, Intent};
use crate::engine::Engine;
use crate::errors::Result;
use crate::handle::ActionHandle;
use crate::state::ActionState;

/// Abort scopes for a single-action request.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Scope for this batch only.
    pub abort_signal: Option<AbortSignal>,
    /// Scope shared across batches.
    pub global_abort_signal: Option<AbortSignal>,
}

impl RunOptions {
    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    pub fn with_global_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.global_abort_signal = Some(signal);
        self
    }
}

/// One batch of requests.
#[derive(Clone, Debug, Default)]
pub struct ActionIntents {
    pub prerun: Vec<ActionHandle>,
    pub run: Vec<ActionHandle>,
    pub rerun: Vec<ActionHandle>,
    pub reset: Vec<ActionHandle>,
    pub global_abort_signal: Option<AbortSignal>,
    pub abort_signal: Option<AbortSignal>,
    /// Per-action batch scope, replacing `abort_signal` for that action.
    pub abort_overrides: HashMap<ActionId, AbortSignal>,
}

impl ActionIntents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prerun(mut self, handle: impl Into<ActionHandle>) -> Self {
        self.prerun.push(handle.into());
        self
    }

    pub fn run(mut self, handle: impl Into<ActionHandle>) -> Self {
        self.run.push(handle.into());
        self
    }

    pub fn rerun(mut self, handle: impl Into<ActionHandle>) -> Self {
        self.rerun.push(handle.into());
        self
    }

    pub fn reset(mut self, handle: impl Into<ActionHandle>) -> Self {
        self.reset.push(handle.into());
        self
    }

    /// Add `handle` to the set named by `intent`.
    pub fn request(self, intent: Intent, handle: impl Into<ActionHandle>) -> Self {
        match intent {
            Intent::Prerun => self.prerun(handle),
            Intent::Run => self.run(handle),
            Intent::Rerun => self.rerun(handle),
            Intent::Reset => self.reset(handle),
        }
    }

    pub fn global_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.global_abort_signal = Some(signal);
        self
    }

    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    pub fn abort_override(mut self, action: &Action, signal: AbortSignal) -> Self {
        self.abort_overrides.insert(action.id(), signal);
        self
    }

    pub fn with_run_options(mut self, options: RunOptions) -> Self {
        if options.abort_signal.is_some() {
            self.abort_signal = options.abort_signal;
        }
        if options.global_abort_signal.is_some() {
            self.global_abort_signal = options.global_abort_signal;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prerun.is_empty() && self.run.is_empty() && self.rerun.is_empty() && self.reset.is_empty()
    }
}

/// Result that is either known now or must be awaited.
pub enum RunResult<T> {
    Ready(Result<T>),
    Pending(BoxFuture<'static, Result<T>>),
}

impl<T: Send + 'static> RunResult<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, RunResult::Ready(_))
    }

    /// The synchronous result, if there is one.
    pub fn into_ready(self) -> Option<Result<T>> {
        match self {
            RunResult::Ready(result) => Some(result),
            RunResult::Pending(_) => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> RunResult<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            RunResult::Ready(result) => RunResult::Ready(result.map(f)),
            RunResult::Pending(pending) => {
                RunResult::Pending(pending.map(|result| result.map(f)).boxed())
            }
        }
    }
}

impl<T: Send + 'static> IntoFuture for RunResult<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            RunResult::Ready(result) => future::ready(result).boxed(),
            RunResult::Pending(pending) => pending,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RunResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            RunResult::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// What a batch did to each action.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub reset: Vec<ActionId>,
    pub started: Vec<ActionId>,
    pub promoted: Vec<ActionId>,
    pub carried: Vec<ActionId>,
}

pub struct UpdateOutcome {
    /// One entry per distinct requested start, in prerun, run, rerun order.
    pub results: RunResult<Vec<Option<Value>>>,
    /// Resolves once every affected action settled. Never fails.
    pub settled: Shared<BoxFuture<'static, ()>>,
    pub summary: BatchSummary,
}

impl fmt::Debug for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOutcome")
            .field("results", &self.results)
            .field("summary", &self.summary)
            .finish()
    }
}

/// Resolve handles to actions, first occurrence wins.
fn resolve(handles: &[ActionHandle]) -> Vec<Action> {
    let mut seen = HashSet::new();
    handles
        .iter()
        .map(ActionHandle::target)
        .filter(|action| seen.insert(action.id()))
        .collect()
}

fn report_double_registration(engine: &Engine, sets: [(Intent, &[Action]); 4]) {
    let mut membership: IndexMap<ActionId, (Action, Vec<Intent>)> = IndexMap::new();
    for (intent, actions) in sets {
        for action in actions {
            membership
                .entry(action.id())
                .or_insert_with(|| (action.clone(), Vec::new()))
                .1
                .push(intent);
        }
    }
    for (_, (action, intents)) in membership {
        if intents.len() > 1 {
            engine.diagnose(Diagnostic::DoubleRegistration {
                action: action.to_string(),
                intents,
            });
        }
    }
}

pub(crate) fn update_actions(engine: &Engine, intents: ActionIntents) -> UpdateOutcome {
    let ActionIntents {
        prerun,
        run,
        rerun,
        reset,
        global_abort_signal,
        abort_signal,
        abort_overrides,
    } = intents;

    let prerun = resolve(&prerun);
    let run = resolve(&run);
    let rerun = resolve(&rerun);
    let reset = resolve(&reset);

    if engine.diagnostics_enabled() {
        report_double_registration(
            engine,
            [
                (Intent::Prerun, prerun.as_slice()),
                (Intent::Run, run.as_slice()),
                (Intent::Rerun, rerun.as_slice()),
                (Intent::Reset, reset.as_slice()),
            ],
        );
    }

    // Classification.
    let mut will_reset: IndexMap<ActionId, Action> = reset
        .iter()
        .filter(|action| action.state() != ActionState::Idle)
        .map(|action| (action.id(), action.clone()))
        .collect();
    let mut starts: IndexMap<ActionId, (Action, bool)> = IndexMap::new();
    let mut promotions: Vec<Action> = Vec::new();
    let mut carried: Vec<Action> = Vec::new();
    let mut claimed: HashSet<ActionId> = HashSet::new();

    for (intent, actions) in [(Intent::Rerun, &rerun), (Intent::Run, &run), (Intent::Prerun, &prerun)] {
        for action in actions {
            let id = action.id();
            if !claimed.insert(id) {
                continue;
            }
            let speculative = intent == Intent::Prerun;
            let state = action.state();

            if will_reset.contains_key(&id) {
                starts.insert(id, (action.clone(), speculative));
            } else if intent == Intent::Rerun {
                if state != ActionState::Idle {
                    will_reset.insert(id, action.clone());
                }
                starts.insert(id, (action.clone(), false));
            } else if intent == Intent::Run && action.is_speculative() && state != ActionState::Idle {
                promotions.push(action.clone());
            } else if state.is_active() {
                carried.push(action.clone());
            } else {
                starts.insert(id, (action.clone(), speculative));
            }
        }
    }

    // Effects.
    for action in will_reset.values() {
        action.perform_stop();
    }

    let root = engine.root_signal();
    let mut completions: HashMap<ActionId, Completion> = HashMap::new();
    let ordered = starts
        .values()
        .filter(|(_, speculative)| *speculative)
        .chain(starts.values().filter(|(_, speculative)| !*speculative));
    for (action, speculative) in ordered {
        let mut scopes = vec![root.clone()];
        scopes.extend(global_abort_signal.iter().cloned());
        scopes.extend(
            abort_overrides
                .get(&action.id())
                .or(abort_signal.as_ref())
                .cloned(),
        );

        engine.inner.registry.add(action);
        if *speculative {
            engine.protect(action);
        }
        completions.insert(action.id(), action.perform_run(*speculative, scopes));
    }

    if !promotions.is_empty() {
        batch(|| promotions.iter().for_each(Action::promote));
    }
    for action in carried.iter().chain(&promotions) {
        completions
            .entry(action.id())
            .or_insert_with(|| action.current_completion());
    }

    let summary = BatchSummary {
        reset: will_reset.keys().copied().collect(),
        started: starts.keys().copied().collect(),
        promoted: promotions.iter().map(Action::id).collect(),
        carried: carried.iter().map(Action::id).collect(),
    };
    tracing::debug!(
        reset = summary.reset.len(),
        started = summary.started.len(),
        promoted = summary.promoted.len(),
        carried = summary.carried.len(),
        "action batch applied"
    );

    let mut seen = HashSet::new();
    let requested: Vec<Completion> = prerun
        .iter()
        .chain(&run)
        .chain(&rerun)
        .filter(|action| seen.insert(action.id()))
        .filter_map(|action| completions.get(&action.id()).cloned())
        .collect();

    let settled = future::join_all(completions.into_values().map(Completion::into_future))
        .map(|_| ())
        .boxed()
        .shared();

    UpdateOutcome {
        results: aggregate(requested),
        settled,
        summary,
    }
}

fn aggregate(completions: Vec<Completion>) -> RunResult<Vec<Option<Value>>> {
    if completions.iter().all(Completion::is_ready) {
        let values = completions
            .into_iter()
            .filter_map(|completion| match completion {
                Completion::Ready(output) => Some(output),
                Completion::Pending(_) => None,
            })
            .collect();
        return RunResult::Ready(values);
    }
    RunResult::Pending(
        future::try_join_all(completions.into_iter().map(Completion::into_future)).boxed(),
    )
}

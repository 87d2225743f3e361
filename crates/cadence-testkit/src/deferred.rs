//! Work that completes only when the test says so.

use cadence_actions::{AbortSignal, Params, Work, WorkContext, WorkError, WorkResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

/// An invocation waiting for its result.
pub struct PendingCall {
    pub params: Value,
    pub speculative: bool,
    pub signal: AbortSignal,
    tx: oneshot::Sender<WorkResult>,
}

impl PendingCall {
    pub fn resolve(self, value: Value) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, message: &'static str) {
        let _ = self.tx.send(Err(WorkError::msg(message)));
    }
}

#[derive(Default)]
struct DeferredState {
    calls: usize,
    pending: VecDeque<PendingCall>,
}

/// Source of pending work, resolved in call order.
#[derive(Clone, Default)]
pub struct DeferredWork {
    state: Arc<Mutex<DeferredState>>,
}

impl DeferredWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Work function to hand to `Engine::action`.
    pub fn work(&self) -> impl Fn(&Params, WorkContext) -> Work + Send + Sync + 'static {
        let state = self.state.clone();
        move |params: &Params, ctx: WorkContext| {
            let (tx, rx) = oneshot::channel();
            {
                let mut state = state.lock();
                state.calls += 1;
                tracing::trace!(call = state.calls, speculative = ctx.is_speculative, "deferred work invoked");
                state.pending.push_back(PendingCall {
                    params: params.to_value(),
                    speculative: ctx.is_speculative,
                    signal: ctx.signal.clone(),
                    tx,
                });
            }
            Work::pending(async move {
                rx.await
                    .unwrap_or_else(|_| Err(WorkError::msg("deferred work dropped")))
            })
        }
    }

    /// Total invocations so far.
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    /// Invocations not yet resolved.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn take_next(&self) -> Option<PendingCall> {
        self.state.lock().pending.pop_front()
    }

    pub fn resolve_next(&self, value: Value) -> bool {
        match self.take_next() {
            Some(call) => {
                call.resolve(value);
                true
            }
            None => false,
        }
    }

    pub fn fail_next(&self, message: &'static str) -> bool {
        match self.take_next() {
            Some(call) => {
                call.fail(message);
                true
            }
            None => false,
        }
    }
}

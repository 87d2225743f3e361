//! Call-counting work functions.

use cadence_actions::{Params, Work, WorkContext};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// One recorded invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeCall {
    pub params: Value,
    pub speculative: bool,
}

/// Records every invocation of the work it wraps.
#[derive(Clone, Default)]
pub struct WorkProbe {
    calls: Arc<Mutex<Vec<ProbeCall>>>,
}

impl WorkProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn history(&self) -> Vec<ProbeCall> {
        self.calls.lock().clone()
    }

    pub fn last(&self) -> Option<ProbeCall> {
        self.calls.lock().last().cloned()
    }

    fn record(&self, params: &Params, ctx: &WorkContext) {
        self.calls.lock().push(ProbeCall {
            params: params.to_value(),
            speculative: ctx.is_speculative,
        });
    }

    /// Synchronous work returning its own parameters.
    pub fn echo(&self) -> impl Fn(&Params, WorkContext) -> Work + Send + Sync + 'static {
        self.wrap(|params: &Params, _| Work::ready(params.to_value()))
    }

    /// Record, then delegate to `work`.
    pub fn wrap<F>(&self, work: F) -> impl Fn(&Params, WorkContext) -> Work + Send + Sync + 'static
    where
        F: Fn(&Params, WorkContext) -> Work + Send + Sync + 'static,
    {
        let probe = self.clone();
        move |params: &Params, ctx: WorkContext| {
            probe.record(params, &ctx);
            work(params, ctx)
        }
    }
}

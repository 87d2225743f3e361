//! The work function contract.

use cadence_core::{AbortReason, AbortSignal, Params};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::errors::WorkError;

/// Result of a single work invocation.
pub type WorkResult = Result<Value, WorkError>;

/// What a work function hands back: a value now, or a future.
pub enum Work {
    Ready(WorkResult),
    Pending(BoxFuture<'static, WorkResult>),
}

impl Work {
    /// Successful synchronous result.
    pub fn ready(value: Value) -> Self {
        Work::Ready(Ok(value))
    }

    /// Failed synchronous result.
    pub fn fail(error: WorkError) -> Self {
        Work::Ready(Err(error))
    }

    /// Asynchronous result.
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = WorkResult> + Send + 'static,
    {
        Work::Pending(Box::pin(fut))
    }
}

impl From<WorkResult> for Work {
    fn from(result: WorkResult) -> Self {
        Work::Ready(result)
    }
}

/// Per-run context passed to work.
///
/// `signal` is advisory: work may ignore it, but should stop producing
/// side effects once it fires. The engine decides Aborted vs Failed from
/// this signal, never from the error work returns.
#[derive(Clone, Debug)]
pub struct WorkContext {
    pub signal: AbortSignal,
    pub is_speculative: bool,
}

impl WorkContext {
    /// Reason the run was aborted, if it was.
    pub fn reason(&self) -> Option<AbortReason> {
        self.signal.reason()
    }
}

/// Shared work function.
pub type WorkFn = Arc<dyn Fn(&Params, WorkContext) -> Work + Send + Sync>;

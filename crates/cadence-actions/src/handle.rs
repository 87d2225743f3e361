//! Either an action or a proxy, as accepted by the scheduler.

use cadence_core::{AbortReason, Params};
use serde_json::Value;
use std::fmt;

use crate::action::Action;
use crate::errors::WorkError;
use crate::proxy::ProxyAction;
use crate::scheduler::{RunOptions, RunResult};
use crate::state::ActionState;

#[derive(Clone, Debug)]
pub enum ActionHandle {
    Action(Action),
    Proxy(ProxyAction),
}

impl ActionHandle {
    /// The concrete action. Proxies are resolved first.
    pub fn target(&self) -> Action {
        match self {
            ActionHandle::Action(action) => action.clone(),
            ActionHandle::Proxy(proxy) => proxy.target(),
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            ActionHandle::Action(action) => Some(action),
            ActionHandle::Proxy(_) => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyAction> {
        match self {
            ActionHandle::Proxy(proxy) => Some(proxy),
            ActionHandle::Action(_) => None,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, ActionHandle::Proxy(_))
    }

    /// Same action, or same proxy.
    pub fn ptr_eq(&self, other: &ActionHandle) -> bool {
        match (self, other) {
            (ActionHandle::Action(a), ActionHandle::Action(b)) => a.ptr_eq(b),
            (ActionHandle::Proxy(a), ActionHandle::Proxy(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn state(&self) -> ActionState {
        self.target().state()
    }

    pub fn is_speculative(&self) -> bool {
        self.target().is_speculative()
    }

    pub fn params(&self) -> Params {
        self.target().params()
    }

    pub fn error(&self) -> Option<WorkError> {
        self.target().error()
    }

    pub fn data(&self) -> Value {
        self.target().data()
    }

    pub fn prerun(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.target().prerun(options)
    }

    pub fn run(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.target().run(options)
    }

    pub fn rerun(&self, options: RunOptions) -> RunResult<Option<Value>> {
        self.target().rerun(options)
    }

    pub fn stop(&self) {
        self.target().stop()
    }

    pub fn abort(&self, reason: AbortReason) -> bool {
        self.target().abort(reason)
    }
}

impl From<Action> for ActionHandle {
    fn from(action: Action) -> Self {
        ActionHandle::Action(action)
    }
}

impl From<&Action> for ActionHandle {
    fn from(action: &Action) -> Self {
        ActionHandle::Action(action.clone())
    }
}

impl From<ProxyAction> for ActionHandle {
    fn from(proxy: ProxyAction) -> Self {
        ActionHandle::Proxy(proxy)
    }
}

impl From<&ProxyAction> for ActionHandle {
    fn from(proxy: &ProxyAction) -> Self {
        ActionHandle::Proxy(proxy.clone())
    }
}

impl From<&ActionHandle> for ActionHandle {
    fn from(handle: &ActionHandle) -> Self {
        handle.clone()
    }
}

impl fmt::Display for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionHandle::Action(action) => fmt::Display::fmt(action, f),
            ActionHandle::Proxy(proxy) => fmt::Display::fmt(proxy, f),
        }
    }
}

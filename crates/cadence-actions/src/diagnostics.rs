//! Non-fatal diagnostics.
//!
//! Diagnostics never change engine behavior. When enabled they are logged
//! through `tracing` and kept in a bounded in-memory log for inspection.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::state::ActionState;

/// Which intent set a request came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Intent {
    Prerun,
    Run,
    Rerun,
    Reset,
}

/// Animation-timeline commands routed through the playback guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlaybackCommand {
    Finish,
    Pause,
    Reverse,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Diagnostic {
    /// The same action appeared in more than one intent set of a batch.
    DoubleRegistration { action: String, intents: Vec<Intent> },
    /// A method was called in a state that does not support it.
    ProtocolMisuse {
        action: String,
        command: PlaybackCommand,
        state: ActionState,
    },
    /// A speculative action's protection deadline elapsed.
    ProtectionExpired { action: String },
    /// Work failed with nobody handling the error.
    UnhandledFailure { action: String, message: String },
}

#[derive(Debug)]
pub(crate) struct DiagnosticLog {
    enabled: bool,
    capacity: usize,
    entries: Mutex<VecDeque<Diagnostic>>,
}

impl DiagnosticLog {
    pub(crate) fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn record(&self, diagnostic: Diagnostic) {
        if !self.enabled {
            return;
        }
        match &diagnostic {
            Diagnostic::DoubleRegistration { action, intents } => {
                tracing::warn!(%action, ?intents, "action requested under several intents in one batch");
            }
            Diagnostic::ProtocolMisuse {
                action,
                command,
                state,
            } => {
                tracing::warn!(%action, ?command, %state, "command not supported in current state");
            }
            Diagnostic::ProtectionExpired { action } => {
                tracing::debug!(%action, "speculative protection expired");
            }
            Diagnostic::UnhandledFailure { action, message } => {
                tracing::warn!(%action, %message, "unhandled action failure");
            }
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(diagnostic);
    }

    pub(crate) fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().iter().cloned().collect()
    }

    pub(crate) fn take(&self) -> Vec<Diagnostic> {
        self.entries.lock().drain(..).collect()
    }
}

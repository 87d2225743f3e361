//! Activation registry.
//!
//! Weak, enumeration-only record of actions that are running or settled but
//! not yet reset. Holding an entry never keeps an action alive; dead entries
//! are swept every `sweep_threshold` insertions and on every enumeration.

use parking_lot::Mutex;
use std::sync::Weak;

use crate::action::{Action, ActionId, ActionInner};

#[derive(Debug)]
pub(crate) struct ActivationRegistry {
    sweep_threshold: usize,
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: Vec<(ActionId, Weak<ActionInner>)>,
    inserts_since_sweep: usize,
}

impl RegistryState {
    fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, weak)| weak.strong_count() > 0);
        self.inserts_since_sweep = 0;
        before - self.entries.len()
    }
}

impl ActivationRegistry {
    pub(crate) fn new(sweep_threshold: usize) -> Self {
        Self {
            sweep_threshold: sweep_threshold.max(1),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub(crate) fn add(&self, action: &Action) {
        let mut state = self.state.lock();
        let id = action.id();
        if state.entries.iter().any(|(eid, _)| *eid == id) {
            return;
        }
        state.entries.push((id, action.downgrade()));
        state.inserts_since_sweep += 1;
        if state.inserts_since_sweep >= self.sweep_threshold {
            let removed = state.sweep();
            tracing::trace!(removed, remaining = state.entries.len(), "activation registry swept");
        }
    }

    pub(crate) fn remove(&self, id: ActionId) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|(eid, _)| *eid != id);
        before != state.entries.len()
    }

    pub(crate) fn contains(&self, id: ActionId) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|(eid, weak)| *eid == id && weak.strong_count() > 0)
    }

    /// Live entries in insertion order.
    pub(crate) fn snapshot(&self) -> Vec<Action> {
        let mut state = self.state.lock();
        state.sweep();
        state
            .entries
            .iter()
            .filter_map(|(_, weak)| Action::upgrade(weak))
            .collect()
    }

    /// Raw entry count, dead entries included.
    #[cfg(test)]
    pub(crate) fn raw_len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

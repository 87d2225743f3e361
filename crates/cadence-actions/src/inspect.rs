//! Development inspector over the activation registry.

use serde::Serialize;
use std::time::Instant;

use crate::action::{Action, ActionId};
use crate::engine::Engine;
use crate::state::ActionState;

/// Point-in-time view of one active action.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionSnapshot {
    pub id: ActionId,
    pub name: String,
    pub state: ActionState,
    pub speculative: bool,
    pub protected: bool,
    /// Milliseconds until protection expires.
    pub protection_remaining_ms: Option<u64>,
    pub error: Option<String>,
}

impl ActionSnapshot {
    fn capture(engine: &Engine, action: &Action, now: Instant) -> Self {
        let deadline = engine.inner.protection.deadline(action.id());
        Self {
            id: action.id(),
            name: action.to_string(),
            state: action.state(),
            speculative: action.is_speculative(),
            protected: deadline.is_some(),
            protection_remaining_ms: deadline.map(|d| remaining_ms(d, now)),
            error: action.error().map(|e| e.to_string()),
        }
    }
}

fn remaining_ms(deadline: Instant, now: Instant) -> u64 {
    u64::try_from(deadline.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX)
}

impl Engine {
    /// Snapshot every active action, in activation order.
    pub fn inspect(&self) -> Vec<ActionSnapshot> {
        let now = Instant::now();
        self.active_actions()
            .iter()
            .map(|action| ActionSnapshot::capture(self, action, now))
            .collect()
    }

    /// [`inspect`](Self::inspect) as JSON.
    pub fn inspect_json(&self) -> serde_json::Value {
        serde_json::to_value(self.inspect()).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunOptions;
    use crate::errors::WorkError;
    use crate::work::Work;
    use cadence_core::Params;
    use serde_json::json;

    #[test]
    fn test_remaining_ms_saturates_at_zero() {
        let now = Instant::now();
        let later = now + std::time::Duration::from_millis(250);
        assert_eq!(remaining_ms(later, now), 250);
        assert_eq!(remaining_ms(now, later), 0);
    }

    #[test]
    fn test_inspect_lists_active_actions() {
        let engine = Engine::default();
        let ok = engine
            .action("ok", |_: &Params, _| Work::ready(json!(1)))
            .build();
        let bad = engine
            .action("bad", |_: &Params, _| Work::fail(WorkError::msg("boom")))
            .on_error(|_, _| {})
            .build();
        let idle = engine.action("idle", |_: &Params, _| Work::ready(json!(0))).build();

        let _ = ok.run(RunOptions::default());
        let _ = bad.run(RunOptions::default());

        let snapshots = engine.inspect();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].state, ActionState::Completed);
        assert_eq!(snapshots[1].error.as_deref(), Some("boom"));
        assert!(snapshots.iter().all(|s| s.id != idle.id()));
        assert_eq!(engine.inspect_json()[0]["state"], json!("Completed"));
    }
}

//! Action lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an action.
///
/// ```text
/// Idle ──start──▶ Running ──▶ Completed | Failed | Aborted ──reset──▶ Idle
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl ActionState {
    /// Running or Completed: a plain start request leaves these alone.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Completed)
    }

    /// Completed, Failed or Aborted.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Whether `self → next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: ActionState) -> bool {
        match (self, next) {
            (Self::Idle, Self::Running) => true,
            (Self::Running, next) => next.is_settled(),
            (settled, Self::Idle) => settled.is_settled(),
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

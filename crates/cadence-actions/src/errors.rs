//! Action errors.
//!
//! [`WorkError`] is what a work function fails with; it is cheap to clone so
//! it can live in the `error` cell and inside shared completion futures.
//! [`ActionError`] is what the engine surfaces to callers.

use cadence_core::CoreError;
use std::fmt;
use std::sync::Arc;

/// Failure produced by a work function.
#[derive(Clone)]
pub struct WorkError(Arc<anyhow::Error>);

impl WorkError {
    /// Wrap any error type.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::new(error)))
    }

    /// Error from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Attempt to view the underlying error as `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Whether both values are clones of the same failure.
    pub fn ptr_eq(&self, other: &WorkError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for WorkError {
    fn from(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Errors surfaced by the action engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    /// Work failed and nothing declared interest in handling the failure.
    #[error("{action} failed: {error}")]
    Failed {
        /// Display name of the failing action
        action: String,
        /// The work failure
        error: WorkError,
    },

    /// Core primitive or configuration error
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ActionError {
    /// Create a failed-work error
    pub fn failed(action: impl Into<String>, error: WorkError) -> Self {
        Self::Failed {
            action: action.into(),
            error,
        }
    }

    /// The work failure, if this is one.
    pub fn work_error(&self) -> Option<&WorkError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Standard Result type for engine operations
pub type Result<T> = std::result::Result<T, ActionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("not found: {0}")]
    struct NotFound(u32);

    #[test]
    fn test_work_error_downcast() {
        let err = WorkError::new(NotFound(7));
        assert_eq!(err.to_string(), "not found: 7");
        assert!(matches!(err.downcast_ref::<NotFound>(), Some(NotFound(7))));
    }

    #[test]
    fn test_clone_keeps_identity() {
        let err = WorkError::msg("boom");
        assert!(err.ptr_eq(&err.clone()));
        assert!(!err.ptr_eq(&WorkError::msg("boom")));
    }

    #[test]
    fn test_failed_display() {
        let err = ActionError::failed("fetchUser({\"id\":1})", WorkError::msg("timeout"));
        assert_eq!(err.to_string(), "fetchUser({\"id\":1}) failed: timeout");
        assert!(err.work_error().is_some());
    }

    #[test]
    fn test_config_error_is_not_work_error() {
        let err = ActionError::from(cadence_core::CoreError::invalid("bad timeout"));
        assert!(err.work_error().is_none());
    }
}

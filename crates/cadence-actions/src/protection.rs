//! Speculative-work protection.
//!
//! A prerun action may have no consumer yet. While protected, the registry
//! holds a strong handle so the action survives until its deadline. Each
//! entry owns an abort scope for its deadline timer; restarting or removing
//! the entry aborts that scope, which cancels the timer task.

use cadence_core::{AbortController, AbortReason, TaskSpawner};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::action::{Action, ActionId};

struct ProtectionEntry {
    action: Action,
    timer: AbortController,
    #[cfg_attr(not(any(debug_assertions, feature = "inspector")), allow(dead_code))]
    deadline: Instant,
}

pub(crate) struct ProtectionRegistry {
    timeout: Duration,
    entries: Mutex<HashMap<ActionId, ProtectionEntry>>,
}

impl ProtectionRegistry {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Protect `action`, or restart its deadline if already protected.
    ///
    /// `on_expire` receives the timer scope id; the caller passes it back to
    /// [`expire`](Self::expire) so a stale timer cannot remove a newer entry.
    pub(crate) fn protect<F>(&self, action: &Action, spawner: &dyn TaskSpawner, on_expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let timer = AbortController::new();
        let timer_id = timer.signal().id();
        let previous = self.entries.lock().insert(
            action.id(),
            ProtectionEntry {
                action: action.clone(),
                timer: timer.clone(),
                deadline: Instant::now() + self.timeout,
            },
        );

        let restarted = previous.is_some();
        if let Some(previous) = previous {
            previous.timer.abort(AbortReason::new("protection deadline restarted"));
        }

        let sleep = spawner.sleep(self.timeout);
        let spawned = spawner.spawn_cancellable(
            Box::pin(async move {
                sleep.await;
                on_expire(timer_id);
            }),
            Arc::new(timer.signal()),
        );
        if !spawned {
            tracing::debug!(action = %action, "protection deadline not scheduled, entry kept until stop");
        }

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(action = %action, restarted, timeout_ms, "speculative action protected");
    }

    /// Remove protection. Returns whether an entry existed.
    pub(crate) fn unprotect(&self, id: ActionId) -> bool {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(entry) => {
                entry.timer.abort(AbortReason::new("protection released"));
                tracing::debug!(action = %entry.action, "speculative protection released");
                // The handle drops here, outside the lock.
                drop(entry);
                true
            }
            None => false,
        }
    }

    /// Deadline elapsed for the timer identified by `timer_id`.
    ///
    /// Returns the action if the entry was still current.
    pub(crate) fn expire(&self, id: ActionId, timer_id: u64) -> Option<Action> {
        let mut entries = self.entries.lock();
        let current = entries
            .get(&id)
            .is_some_and(|entry| entry.timer.signal().id() == timer_id);
        if !current {
            return None;
        }
        entries.remove(&id).map(|entry| entry.action)
    }

    pub(crate) fn is_protected(&self, id: ActionId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    #[cfg(any(debug_assertions, feature = "inspector"))]
    pub(crate) fn deadline(&self, id: ActionId) -> Option<Instant> {
        self.entries.lock().get(&id).map(|entry| entry.deadline)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop every entry and cancel their timers.
    pub(crate) fn clear(&self) {
        let drained: Vec<ProtectionEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.timer.abort(AbortReason::new("protection cleared"));
        }
    }
}

impl std::fmt::Debug for ProtectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionRegistry")
            .field("timeout", &self.timeout)
            .field("entries", &self.len())
            .finish()
    }
}

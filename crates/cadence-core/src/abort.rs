//! Abort scopes.
//!
//! An [`AbortController`] owns the right to abort; the [`AbortSignal`] it
//! hands out is the read side shared with work. Controllers created with
//! [`AbortController::child_of`] are linked to one or more parent signals:
//! aborting any parent aborts the child with the parent's reason. Parents
//! only hold weak links to children; dead links are swept on insertion.

use futures::channel::oneshot;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::task::CancellationToken;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Children are swept of dead entries once the list grows past this.
const CHILD_SWEEP_THRESHOLD: usize = 32;

/// Why a scope was aborted.
///
/// Reasons compare by identity: two reasons are equal only if one is a
/// clone of the other. Use [`AbortReason::message`] for display.
#[derive(Clone)]
pub struct AbortReason(Arc<str>);

impl AbortReason {
    /// Create a new, distinct reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self(Arc::from(message.into()))
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.0
    }

    /// Whether both values originate from the same `AbortReason::new` call.
    pub fn same_as(&self, other: &AbortReason) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for AbortReason {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for AbortReason {}

impl fmt::Debug for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AbortReason").field(&self.message()).finish()
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

type Listener = Box<dyn FnOnce(&AbortReason) + Send>;

struct AbortState {
    id: u64,
    aborted: AtomicBool,
    reason: Mutex<Option<AbortReason>>,
    children: Mutex<Vec<Weak<AbortState>>>,
    next_listener: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl AbortState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            aborted: AtomicBool::new(false),
            reason: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn abort(&self, reason: &AbortReason) -> bool {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.reason.lock() = Some(reason.clone());

        let listeners = std::mem::take(&mut *self.listeners.lock());
        // Listeners and children run without any lock held.
        for (_, listener) in listeners {
            listener(reason);
        }

        let children: Vec<Arc<AbortState>> = {
            let mut children = self.children.lock();
            std::mem::take(&mut *children)
                .into_iter()
                .filter_map(|c| c.upgrade())
                .collect()
        };
        for child in children {
            child.abort(reason);
        }

        tracing::trace!(scope = self.id, reason = %reason, "abort scope fired");
        true
    }

    fn adopt(&self, child: &Arc<AbortState>) {
        let mut children = self.children.lock();
        // Holding the lock across the flag check: abort() flips the flag
        // before draining children, so a child pushed here is always seen.
        if self.aborted.load(Ordering::SeqCst) {
            drop(children);
            if let Some(reason) = self.reason.lock().clone() {
                child.abort(&reason);
            }
            return;
        }
        if children.len() >= CHILD_SWEEP_THRESHOLD {
            children.retain(|c| c.strong_count() > 0);
        }
        children.push(Arc::downgrade(child));
    }
}

/// Read side of an abort scope.
#[derive(Clone)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    /// A signal with no controller. It never aborts.
    pub fn never() -> Self {
        Self {
            state: AbortState::new(),
        }
    }

    /// Process-unique scope id.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Whether the scope has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// The abort reason, once aborted.
    pub fn reason(&self) -> Option<AbortReason> {
        self.state.reason.lock().clone()
    }

    /// Whether both handles refer to the same scope.
    pub fn ptr_eq(&self, other: &AbortSignal) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Register a one-shot listener.
    ///
    /// If the scope is already aborted the listener runs immediately.
    /// Dropping the returned guard unregisters a listener that has not fired.
    pub fn on_abort<F>(&self, listener: F) -> AbortListenerGuard
    where
        F: FnOnce(&AbortReason) + Send + 'static,
    {
        let mut listeners = self.state.listeners.lock();
        if self.is_aborted() {
            drop(listeners);
            if let Some(reason) = self.reason() {
                listener(&reason);
            }
            return AbortListenerGuard::inert();
        }
        let id = self.state.next_listener.fetch_add(1, Ordering::Relaxed);
        listeners.push((id, Box::new(listener)));
        AbortListenerGuard {
            state: Arc::downgrade(&self.state),
            id: Some(id),
        }
    }

    /// Resolves with the reason once the scope is aborted.
    pub fn aborted(&self) -> impl Future<Output = AbortReason> + Send + 'static {
        let (tx, rx) = oneshot::channel::<AbortReason>();
        let guard = self.on_abort(move |reason| {
            let _ = tx.send(reason.clone());
        });
        async move {
            let outcome = rx.await;
            drop(guard);
            match outcome {
                Ok(reason) => reason,
                // Every signal handle is gone: the scope can never fire.
                Err(_) => futures::future::pending().await,
            }
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("id", &self.id())
            .field("reason", &self.reason())
            .finish()
    }
}

#[async_trait::async_trait]
impl CancellationToken for AbortSignal {
    async fn cancelled(&self) {
        self.aborted().await;
    }

    fn is_cancelled(&self) -> bool {
        self.is_aborted()
    }
}

/// Unregisters an abort listener on drop.
#[must_use = "the listener is unregistered as soon as the guard is dropped"]
pub struct AbortListenerGuard {
    state: Weak<AbortState>,
    id: Option<u64>,
}

impl AbortListenerGuard {
    fn inert() -> Self {
        Self {
            state: Weak::new(),
            id: None,
        }
    }

    /// Keep the listener registered until the scope fires.
    pub fn detach(mut self) {
        self.id = None;
    }
}

impl Drop for AbortListenerGuard {
    fn drop(&mut self) {
        if let (Some(id), Some(state)) = (self.id, self.state.upgrade()) {
            state.listeners.lock().retain(|(lid, _)| *lid != id);
        }
    }
}

/// Write side of an abort scope.
#[derive(Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// Create a root scope.
    pub fn new() -> Self {
        Self {
            signal: AbortSignal {
                state: AbortState::new(),
            },
        }
    }

    /// Create a scope aborted whenever any of `parents` aborts.
    ///
    /// If a parent is already aborted the child starts aborted with that
    /// parent's reason.
    pub fn child_of<'a>(parents: impl IntoIterator<Item = &'a AbortSignal>) -> Self {
        let controller = Self::new();
        for parent in parents {
            parent.state.adopt(&controller.signal.state);
        }
        controller
    }

    /// The shared read side.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the scope and every descendant.
    ///
    /// Returns true if this call triggered the abort (first caller wins).
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.signal.state.abort(&reason)
    }

    /// Whether the scope has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortController")
            .field("signal", &self.signal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_abort_first_caller_wins() {
        let controller = AbortController::new();
        let first = AbortReason::new("first");
        assert!(controller.abort(first.clone()));
        assert!(!controller.abort(AbortReason::new("second")));
        assert_eq!(controller.signal().reason(), Some(first));
    }

    #[test]
    fn test_reason_identity() {
        let a = AbortReason::new("nav");
        let b = AbortReason::new("nav");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_child_aborts_with_either_parent() {
        let global = AbortController::new();
        let batch = AbortController::new();
        let child = AbortController::child_of([&global.signal(), &batch.signal()]);

        let reason = AbortReason::new("nav");
        global.abort(reason.clone());
        assert!(child.is_aborted());
        assert_eq!(child.signal().reason(), Some(reason));
        assert!(!batch.is_aborted());
    }

    #[test]
    fn test_child_of_aborted_parent_starts_aborted() {
        let parent = AbortController::new();
        parent.abort(AbortReason::new("gone"));
        let child = AbortController::child_of([&parent.signal()]);
        assert!(child.is_aborted());
    }

    #[test]
    fn test_child_abort_does_not_touch_parent() {
        let parent = AbortController::new();
        let child = AbortController::child_of([&parent.signal()]);
        child.abort(AbortReason::new("local"));
        assert!(!parent.is_aborted());
    }

    #[test]
    fn test_listener_guard_unregisters() {
        let controller = AbortController::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let guard = controller
            .signal()
            .on_abort(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        drop(guard);

        let h = hits.clone();
        controller
            .signal()
            .on_abort(move |_| {
                h.fetch_add(10, Ordering::SeqCst);
            })
            .detach();

        controller.abort(AbortReason::new("x"));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_listener_on_aborted_signal_runs_immediately() {
        let controller = AbortController::new();
        controller.abort(AbortReason::new("done"));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _guard = controller.signal().on_abort(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_children_are_swept() {
        let parent = AbortController::new();
        for _ in 0..(CHILD_SWEEP_THRESHOLD * 3) {
            let _child = AbortController::child_of([&parent.signal()]);
        }
        assert!(parent.signal.state.children.lock().len() <= CHILD_SWEEP_THRESHOLD + 1);
    }

    #[tokio::test]
    async fn test_aborted_future_resolves() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let waiter = tokio::spawn(async move { signal.aborted().await });
        tokio::task::yield_now().await;
        let reason = AbortReason::new("later");
        controller.abort(reason.clone());
        let got = waiter.await.unwrap();
        assert_eq!(got, reason);
    }
}

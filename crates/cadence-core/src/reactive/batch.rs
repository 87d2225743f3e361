//! Atomic multi-cell updates.
//!
//! While a batch is open on the current thread, `Dynamic::set` still stores
//! the value and bumps the version immediately, but observer notification is
//! queued. Each cell is notified at most once per batch, with the value it
//! holds at commit time.

use std::cell::RefCell;

type Deferred = Box<dyn FnOnce()>;

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Vec<(u64, Deferred)>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Open batch handle. Dropping it commits.
///
/// Batches nest; only the outermost commit flushes queued notifications.
#[must_use = "dropping the guard commits the batch immediately"]
pub struct BatchGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl BatchGuard {
    /// Begin a batch on the current thread.
    pub fn begin() -> Self {
        BATCH.with(|b| b.borrow_mut().depth += 1);
        Self {
            _not_send: std::marker::PhantomData,
        }
    }

    /// Commit explicitly. Equivalent to dropping the guard.
    pub fn commit(self) {}
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let flushed = BATCH.with(|b| {
            let mut state = b.borrow_mut();
            state.depth = state.depth.saturating_sub(1);
            if state.depth == 0 {
                std::mem::take(&mut state.pending)
            } else {
                Vec::new()
            }
        });

        if std::thread::panicking() {
            return;
        }

        for (_, notify) in flushed {
            notify();
        }
    }
}

/// Run `f` inside a batch and return its result.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let guard = BatchGuard::begin();
    let result = f();
    guard.commit();
    result
}

/// Whether a batch is currently open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|b| b.borrow().depth > 0)
}

/// Queue `notify` for cell `cell_id` if a batch is open, otherwise run it now.
pub(crate) fn defer_or_run(cell_id: u64, notify: impl FnOnce() + 'static) {
    let notify: Deferred = Box::new(notify);
    let immediate = BATCH.with(|b| {
        let mut state = b.borrow_mut();
        if state.depth == 0 {
            return Some(notify);
        }
        if !state.pending.iter().any(|(id, _)| *id == cell_id) {
            state.pending.push((cell_id, notify));
        }
        None
    });

    if let Some(notify) = immediate {
        notify();
    }
}

//! Dynamic<T> - A reactive value with change notifications
//!
//! `Dynamic<T>` wraps a value and provides both poll-based (`subscribe`) and
//! push-based (`observe`) change notification. Push notifications honor the
//! current [`batch`](super::batch) so observers only see committed state.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::batch::defer_or_run;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Inner state of a Dynamic value.
struct DynamicInner<T> {
    /// Process-unique cell id, used to coalesce batched notifications.
    id: u64,
    /// The current value.
    value: RwLock<T>,
    /// Version counter incremented on each update.
    version: AtomicU64,
    next_observer: AtomicU64,
    observers: Mutex<Vec<(u64, Observer<T>)>>,
}

impl<T: Clone + Send + Sync + 'static> DynamicInner<T> {
    fn notify(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        defer_or_run(self.id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.notify_now();
            }
        });
    }

    fn notify_now(&self) {
        // Snapshot observers so callbacks may observe/unobserve re-entrantly.
        let observers: Vec<Observer<T>> = self
            .observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        if observers.is_empty() {
            return;
        }
        let value = self.value.read().clone();
        for observer in observers {
            observer(&value);
        }
    }
}

/// A reactive value that can be observed for changes.
///
/// `Dynamic<T>` provides:
/// - `get()`: Synchronously read the current value
/// - `set()`: Update the value, increment version, notify observers
/// - `subscribe()`: Get a `Subscription` for polling changes
/// - `observe()`: Register a push callback, removed when the guard drops
/// - `map()`: Create a derived `Dynamic<U>` with a sync link for propagation
///
/// Clones share state.
#[derive(Clone)]
pub struct Dynamic<T> {
    inner: Arc<DynamicInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Dynamic<T> {
    /// Create a new Dynamic with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(DynamicInner {
                id: NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed),
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                next_observer: AtomicU64::new(0),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get the current value.
    ///
    /// Reading never subscribes; callers that want change notification
    /// use `subscribe` or `observe` explicitly.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Read the current value through a closure without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Get the current version number.
    ///
    /// The version is incremented each time `set()` is called.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Set a new value, increment the version and notify observers.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.inner.value.write();
            *guard = value;
        }
        self.inner.version.fetch_add(1, Ordering::Release);
        self.inner.notify();
    }

    /// Update the value using a function.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(T) -> T,
    {
        let new_value = f(self.get());
        self.set(new_value);
    }

    /// Subscribe to value changes.
    ///
    /// Returns a `Subscription` that can poll for changes. The subscription
    /// starts at the current version.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            source: self.inner.clone(),
            last_version: self.inner.version.load(Ordering::Acquire),
        }
    }

    /// Register a push observer. It is called after every committed `set`
    /// with the value the cell holds at notification time.
    pub fn observe<F>(&self, f: F) -> ObserverGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().push((id, Arc::new(f)));

        let weak: Weak<DynamicInner<T>> = Arc::downgrade(&self.inner);
        ObserverGuard {
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.observers.lock().retain(|(oid, _)| *oid != id);
                }
            })),
        }
    }

    /// Number of registered push observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a derived Dynamic that transforms values using the given function.
    ///
    /// Returns the derived `Dynamic<U>` initialized with the mapped current
    /// value and a `DynamicLink` that propagates later updates.
    ///
    /// ```rust,ignore
    /// let counter = Dynamic::new(5);
    /// let (doubled, mut link) = counter.map(|x| x * 2);
    ///
    /// counter.set(10);
    /// link.propagate();
    /// assert_eq!(doubled.get(), 20);
    /// ```
    pub fn map<U, F>(&self, f: F) -> (Dynamic<U>, DynamicLink<T, U, F>)
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let initial = f(self.get());
        let derived = Dynamic::new(initial);

        let link = DynamicLink {
            source_sub: self.subscribe(),
            target: derived.clone(),
            transform: f,
        };

        (derived, link)
    }
}

impl<T: Clone + Send + Sync + Default + 'static> Default for Dynamic<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Dynamic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dynamic")
            .field("value", &self.get())
            .field("version", &self.version())
            .finish()
    }
}

/// Removes a push observer when dropped.
#[must_use = "the observer is removed as soon as the guard is dropped"]
pub struct ObserverGuard {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ObserverGuard {
    /// Keep the observer registered for the lifetime of the cell.
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ObserverGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverGuard")
            .field("attached", &self.release.is_some())
            .finish()
    }
}

/// A subscription to a Dynamic value for polling changes.
pub struct Subscription<T> {
    source: Arc<DynamicInner<T>>,
    last_version: u64,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    /// Check if the source has changed since the last poll.
    pub fn has_changed(&self) -> bool {
        self.source.version.load(Ordering::Acquire) > self.last_version
    }

    /// Poll for a new value.
    ///
    /// Returns `Some(value)` if the source has been updated since the last
    /// poll, updating the tracked version. Returns `None` otherwise.
    pub fn poll(&mut self) -> Option<T> {
        let current_version = self.source.version.load(Ordering::Acquire);
        if current_version > self.last_version {
            self.last_version = current_version;
            Some(self.source.value.read().clone())
        } else {
            None
        }
    }

    /// Get the current value regardless of whether it changed.
    pub fn get(&self) -> T {
        self.source.value.read().clone()
    }

    /// Mark the current version as observed without reading the value.
    pub fn mark_seen(&mut self) {
        self.last_version = self.source.version.load(Ordering::Acquire);
    }
}

/// A link between a source Dynamic and a derived Dynamic.
pub struct DynamicLink<T, U, F>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    source_sub: Subscription<T>,
    target: Dynamic<U>,
    transform: F,
}

impl<T, U, F> DynamicLink<T, U, F>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    /// Propagate any updates from source to target.
    ///
    /// Returns `true` if an update was propagated.
    pub fn propagate(&mut self) -> bool {
        if let Some(value) = self.source_sub.poll() {
            let mapped = (self.transform)(value);
            self.target.set(mapped);
            true
        } else {
            false
        }
    }

    /// Check if the source has changed since the last propagation.
    pub fn has_pending_update(&self) -> bool {
        self.source_sub.has_changed()
    }

    /// Get a reference to the target Dynamic.
    pub fn target(&self) -> &Dynamic<U> {
        &self.target
    }
}

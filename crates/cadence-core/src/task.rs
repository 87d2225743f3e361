//! Runtime-agnostic task spawning.
//!
//! The action engine never awaits work itself; pending work and protection
//! deadlines are handed to a [`TaskSpawner`]. [`TokioSpawner`] is the
//! production implementation and tracks its handles so `shutdown` can stop
//! everything it started.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cooperative cancellation token.
#[async_trait]
pub trait CancellationToken: Send + Sync {
    /// Resolves when cancellation is requested.
    async fn cancelled(&self);

    /// Non-blocking cancellation check.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Task spawning contract for runtime implementations.
pub trait TaskSpawner: Send + Sync {
    /// Spawn a background task.
    ///
    /// Returns false if the task could not be scheduled (no runtime).
    fn spawn(&self, fut: BoxFuture<'static, ()>) -> bool;

    /// Spawn a background task that is dropped once `token` is cancelled.
    fn spawn_cancellable(
        &self,
        fut: BoxFuture<'static, ()>,
        token: Arc<dyn CancellationToken>,
    ) -> bool;

    /// A future that completes after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Tokio-backed spawner.
///
/// Requires a Tokio runtime on the calling thread; without one, spawning
/// reports failure and the caller is expected to drive the future itself.
#[derive(Debug)]
pub struct TokioSpawner {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioSpawner {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    fn track<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime available, task not spawned");
            return false;
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = runtime.spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = fut => {}
            }
        });
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        true
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn live_tasks(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Stop every task spawned through this spawner.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Default for TokioSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokioSpawner {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, fut: BoxFuture<'static, ()>) -> bool {
        self.track(fut)
    }

    fn spawn_cancellable(
        &self,
        fut: BoxFuture<'static, ()>,
        token: Arc<dyn CancellationToken>,
    ) -> bool {
        self.track(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        })
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        // Lazy: the timer is only registered once polled inside a runtime.
        Box::pin(async move { tokio::time::sleep(duration).await })
    }
}

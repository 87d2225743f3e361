//! The action engine.
//!
//! An [`Engine`] is the shared context every action belongs to: it owns the
//! activation registry, speculative protection, diagnostics, the task
//! spawner that drives pending work, and the root abort scope that
//! [`Engine::shutdown`] fires.

use cadence_core::{
    AbortController, AbortReason, AbortSignal, EngineConfig, Params, TaskSpawner, TokioSpawner,
};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::action::{Action, ActionBuilder, ActionId};
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::errors::Result;
use crate::protection::ProtectionRegistry;
use crate::registry::ActivationRegistry;
use crate::scheduler::{self, ActionIntents, UpdateOutcome};
use crate::work::{Work, WorkContext};

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) spawner: Arc<dyn TaskSpawner>,
    pub(crate) registry: ActivationRegistry,
    pub(crate) protection: ProtectionRegistry,
    pub(crate) diagnostics: DiagnosticLog,
    root: AbortController,
    next_id: AtomicU64,
}

/// Shared handle to an action engine. Clones share state.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine driven by Tokio.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_spawner(config, Arc::new(TokioSpawner::new()))
    }

    /// Create an engine with a custom task spawner.
    pub fn with_spawner(config: EngineConfig, spawner: Arc<dyn TaskSpawner>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, spawner))
    }

    fn build(config: EngineConfig, spawner: Arc<dyn TaskSpawner>) -> Self {
        let inner = EngineInner {
            registry: ActivationRegistry::new(config.sweep_threshold),
            protection: ProtectionRegistry::new(config.protection_timeout()),
            diagnostics: DiagnosticLog::new(config.diagnostics, config.diagnostic_capacity),
            spawner,
            root: AbortController::new(),
            next_id: AtomicU64::new(1),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Start building a root action around `work`.
    pub fn action<F>(&self, name: impl Into<String>, work: F) -> ActionBuilder
    where
        F: Fn(&Params, WorkContext) -> Work + Send + Sync + 'static,
    {
        ActionBuilder::new(self.clone(), name.into(), Arc::new(work))
    }

    /// Resolve one batch of intents into effects. See [`scheduler`].
    pub fn update_actions(&self, intents: ActionIntents) -> UpdateOutcome {
        scheduler::update_actions(self, intents)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Root scope every run is linked to.
    pub fn root_signal(&self) -> AbortSignal {
        self.inner.root.signal()
    }

    /// Actions that are running or settled and not yet reset.
    pub fn active_actions(&self) -> Vec<Action> {
        self.inner.registry.snapshot()
    }

    /// Whether `action` is running or settled and not yet reset.
    pub fn is_registered(&self, action: &Action) -> bool {
        self.inner.registry.contains(action.id())
    }

    /// Actions currently running.
    pub fn running_actions(&self) -> Vec<Action> {
        self.active_actions()
            .into_iter()
            .filter(|a| a.state() == crate::ActionState::Running)
            .collect()
    }

    /// Whether any action is running.
    pub fn is_busy(&self) -> bool {
        !self.running_actions().is_empty()
    }

    /// Whether `action` is held by speculative protection.
    pub fn is_protected(&self, action: &Action) -> bool {
        self.inner.protection.is_protected(action.id())
    }

    /// Number of protected speculative actions.
    pub fn protected_count(&self) -> usize {
        self.inner.protection.len()
    }

    /// Recorded diagnostics, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.snapshot()
    }

    /// Drain recorded diagnostics.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.take()
    }

    /// Abort every run linked to the root scope and release protection.
    ///
    /// Runs started after shutdown begin aborted.
    pub fn shutdown(&self) {
        self.inner.root.abort(AbortReason::new("engine shutdown"));
        self.inner.protection.clear();
        tracing::info!("action engine shut down");
    }

    pub(crate) fn next_id(&self) -> ActionId {
        ActionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn diagnose(&self, diagnostic: Diagnostic) {
        self.inner.diagnostics.record(diagnostic);
    }

    pub(crate) fn diagnostics_enabled(&self) -> bool {
        self.inner.diagnostics.enabled()
    }

    pub(crate) fn spawn(&self, fut: BoxFuture<'static, ()>) -> bool {
        self.inner.spawner.spawn(fut)
    }

    pub(crate) fn protect(&self, action: &Action) {
        let weak = Arc::downgrade(&self.inner);
        let id = action.id();
        self.inner
            .protection
            .protect(action, self.inner.spawner.as_ref(), move |timer_id| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Some(expired) = inner.protection.expire(id, timer_id) {
                    inner.diagnostics.record(Diagnostic::ProtectionExpired {
                        action: expired.to_string(),
                    });
                }
            });
    }

    pub(crate) fn unprotect(&self, action: &Action) -> bool {
        self.inner.protection.unprotect(action.id())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::build(EngineConfig::default(), Arc::new(TokioSpawner::new()))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("protection", &self.inner.protection)
            .finish()
    }
}

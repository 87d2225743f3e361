//! Cadence Core - primitives shared by the action engine
//!
//! - [`reactive`]: observable cells and atomic multi-cell batches
//! - [`abort`]: hierarchical abort scopes
//! - [`params`]: parameter values, structural keys and deep merge
//! - [`task`]: task spawning and cancellation tokens
//! - [`config`]: engine configuration and validation

#![forbid(unsafe_code)]

pub mod abort;
pub mod config;
pub mod errors;
pub mod params;
pub mod reactive;
pub mod task;

pub use abort::{AbortController, AbortListenerGuard, AbortReason, AbortSignal};
pub use config::EngineConfig;
pub use errors::{CoreError, Result};
pub use params::{Params, ParamsKey};
pub use reactive::{batch, BatchGuard, Dynamic, DynamicLink, ObserverGuard, Subscription};
pub use task::{CancellationToken, TaskSpawner, TokioSpawner};

//! Cadence Actions - orchestration of deduplicated asynchronous work
//!
//! An [`Engine`] owns every [`Action`] built from it. Callers describe what
//! they want in an [`ActionIntents`] batch (prerun, run, rerun, reset) and
//! [`Engine::update_actions`] resolves it into one consistent set of
//! effects:
//!
//! - equal parameters share one action ([`Action::bind_params`])
//! - speculative work started by `prerun` is promoted by `run` without
//!   restarting
//! - each run is cancelled through abort scopes, never through its error
//! - proxies ([`ProxyAction`]) follow reactive parameters
//!
//! ```rust,ignore
//! let engine = Engine::new(EngineConfig::default())?;
//! let user = engine
//!     .action("user", |params, _ctx| Work::pending(fetch_user(params.clone())))
//!     .build();
//!
//! let page = user.bind_params(json!({"id": 7}));
//! let data = page.run(RunOptions::default()).await?;
//! ```

#![forbid(unsafe_code)]

pub mod action;
pub mod bind;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod handle;
#[cfg(any(debug_assertions, feature = "inspector"))]
pub mod inspect;
pub mod proxy;
pub mod scheduler;
pub mod state;
pub mod work;

mod protection;
mod registry;

pub use action::{Action, ActionBuilder, ActionCells, ActionId, ErrorRendererGuard, Teardown};
pub use bind::{ParamsInput, ParamsPlan, ParamsSource, PlanField};
pub use diagnostics::{Diagnostic, Intent, PlaybackCommand};
pub use engine::Engine;
pub use errors::{ActionError, Result, WorkError};
pub use handle::ActionHandle;
#[cfg(any(debug_assertions, feature = "inspector"))]
pub use inspect::ActionSnapshot;
pub use proxy::{ProxyAction, ProxyOptions, RetargetGuard};
pub use scheduler::{ActionIntents, BatchSummary, RunOptions, RunResult, UpdateOutcome};
pub use state::ActionState;
pub use work::{Work, WorkContext, WorkFn, WorkResult};

pub use cadence_core::{AbortController, AbortReason, AbortSignal, EngineConfig, Params};

//! Cadence Testing Infrastructure
//!
//! Shared helpers for engine integration tests: work probes that count and
//! record invocations, manually resolvable deferred work, engine factories
//! and tracing setup.
//!
//! ```rust,ignore
//! use cadence_testkit::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_tracing();
//!     let engine = test_engine();
//!     let deferred = DeferredWork::new();
//!     let action = engine.action("load", deferred.work()).build();
//!     // ... test logic
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod deferred;
pub mod fixtures;
pub mod probe;

pub use deferred::{DeferredWork, PendingCall};
pub use fixtures::{flush, init_tracing, test_engine, test_engine_with};
pub use probe::{ProbeCall, WorkProbe};

//! # Reactive Primitives for Action State
//!
//! This module provides the reactive cells every action exposes (`state`,
//! `error`, `data`, `params`, ...) and the batching primitive that keeps
//! multi-cell writes consistent for observers.
//!
//! ## Core Types
//!
//! - [`Dynamic<T>`]: A reactive value that can be read, written, polled and
//!   observed for changes.
//!
//! - [`Subscription<T>`]: A polling-based subscription to a `Dynamic<T>`.
//!   Tracks version changes for efficient change detection.
//!
//! - [`DynamicLink`]: Propagates a pure projection from one cell into another.
//!
//! - [`batch`] / [`BatchGuard`]: Defers observer notification until the
//!   outermost batch commits, so observers never see a half-applied update.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cadence_core::reactive::{batch, Dynamic};
//!
//! let state = Dynamic::new("idle");
//! let error = Dynamic::new(None::<String>);
//!
//! let _guard = state.observe(|s| println!("state = {s}"));
//!
//! batch(|| {
//!     error.set(None);
//!     state.set("running");
//! }); // observers run here, once per cell
//! ```

mod batch;
mod dynamic;

pub use batch::{batch, is_batching, BatchGuard};
pub use dynamic::{Dynamic, DynamicLink, ObserverGuard, Subscription};

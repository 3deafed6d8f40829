//! # jobscope
//!
//! Structured concurrency runtime: a tree of cancellable jobs with typed
//! context propagation, fail-fast and supervised failure disciplines,
//! cooperative cancellation with cleanup guarantees, and dispatchers that
//! bound true parallelism.
//!
//! ## Architecture
//!
//! ```text
//!                         ┌────────────────────┐
//!                         │      Runtime       │  bus + subscribers +
//!                         │  run(f) / shutdown │  default dispatcher
//!                         └─────────┬──────────┘
//!                                   │ root region
//!                         ┌─────────▼──────────┐
//!                         │        Job          │  state machine, token,
//!                         │  cancel/join/state  │  parent/child links
//!                         └───┬──────────┬──────┘
//!              escalation ▲   │          │ launch / scope / delay
//!             (kind-gated)│   │          ▼
//!     ┌───────────────────┴───▼──┐   ┌───────────────────────┐
//!     │        child Jobs        │   │         Scope         │
//!     │ Normal: fail-fast        │   │ job + ContextMap +    │
//!     │ Supervisor: isolate      │   │ Dispatcher + shield   │
//!     └──────────────────────────┘   └──────────┬────────────┘
//!                                               │ submit(JobUnit)
//!                                    ┌──────────▼────────────┐
//!                                    │       Dispatcher      │
//!                                    │ pool(n) / limited(k)  │
//!                                    └───────────────────────┘
//! ```
//!
//! ## Core concepts
//!
//! - **[`Job`]** — a node in the cancellation tree with a monotonic state
//!   machine (`New → Active → Completing → Completed`, any non-terminal
//!   state `→ Cancelling → Cancelled`). A job is terminal only after its
//!   body returned and every child is terminal.
//! - **Failure vs. cancellation** — a failure ([`CancelCause::Failure`])
//!   escalates through normal parents, cancelling siblings fail-fast; every
//!   other cause is a silent control signal. A [`JobKind::Supervisor`]
//!   boundary contains child failures instead.
//! - **[`Scope`]** — the capability handle passed to every body: launch
//!   children, open nested structured regions ([`Scope::scope`],
//!   [`Scope::timeout`]), and suspend at cancellation delivery points
//!   ([`Scope::delay`], [`Scope::checkpoint`], [`Scope::yield_now`]).
//!   [`Scope::uninterruptible`] shields cleanup regions.
//! - **[`ContextMap`]** — immutable typed map composed down the tree;
//!   nearest-enclosing lookup by element type.
//! - **[`Dispatcher`]** — explicit bounded-parallelism executor;
//!   [`Dispatcher::limited_parallelism`] with `k = 1` is a lock-free
//!   mutual-exclusion lane.
//! - **[`Event`]/[`Bus`]/[`Subscribe`]** — observability fan-out; dropped
//!   events never change semantics.
//!
//! ## Example
//!
//! ```rust,no_run
//! use jobscope::{JobError, Runtime, RuntimeConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), JobError> {
//!     let rt = Runtime::new(RuntimeConfig::default());
//!     let total = rt
//!         .run(|scope| async move {
//!             let a = scope.async_compute(|s| async move {
//!                 s.delay(Duration::from_millis(10)).await?;
//!                 Ok(20)
//!             });
//!             let b = scope.async_compute(|s| async move {
//!                 s.delay(Duration::from_millis(10)).await?;
//!                 Ok(22)
//!             });
//!             Ok(a.await_value().await? + b.await_value().await?)
//!         })
//!         .await?;
//!     assert_eq!(total, 42);
//!     rt.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod job;
pub mod runtime;
pub mod scope;
pub mod subscribers;

pub use config::RuntimeConfig;
pub use context::{ContextMap, Element};
pub use dispatch::Dispatcher;
pub use error::{CancelCause, ContextError, DispatcherError, Fault, JobError};
pub use events::{Bus, Event, EventKind};
pub use job::{Job, JobId, JobKind, JobState, Outcome, UncaughtHandler};
pub use runtime::Runtime;
pub use scope::{Compute, Scope, ScopeOptions};
pub use subscribers::{Subscribe, SubscriberSet};

#[cfg(feature = "logging")]
pub use subscribers::LogWriter;

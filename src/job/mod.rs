//! The job tree: lifecycle states, cancellation, and failure propagation.
//!
//! A [`Job`] is a node in a cancellation tree. [`state`] defines the
//! monotonic state machine; [`job`] implements the node, its transitions,
//! and the propagation rules between parents and children.

mod job;
mod state;

pub use job::{Job, UncaughtHandler};
pub use state::{JobId, JobKind, JobState, Outcome};

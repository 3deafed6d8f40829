//! # Job identity, kind, lifecycle states, and terminal outcomes.
//!
//! The state machine is monotonic along two chains:
//!
//! ```text
//! New ──► Active ──► Completing ──► Completed
//!   \        │           │
//!    \       ▼           ▼
//!     └──► Cancelling ──► Cancelled
//! ```
//!
//! ## Rules
//! - `New` is reachable only via lazy launch; eager jobs start `Active`.
//! - `Completing` means the body returned but children are still running.
//! - `Cancelling` means cancellation was requested or a failure was adopted;
//!   cleanup may still be executing.
//! - `Cancelled` and `Completed` are absorbing: no transition ever leaves
//!   them.
//! - A job cannot reach a terminal state while any child is non-terminal.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::error::CancelCause;

/// Global counter backing [`JobId::next`].
static JOB_SEQ: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a job, stable for its whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Allocates the next identity.
    pub(crate) fn next() -> Self {
        JobId(JOB_SEQ.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure-propagation discipline of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Fail-fast: a child's failure cancels siblings and escalates to the
    /// parent.
    Normal,
    /// Supervised: a child's failure is contained at this boundary; siblings
    /// and the parent are unaffected.
    Supervisor,
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Created but not yet scheduled (lazy launch only).
    New,
    /// Running or runnable.
    Active,
    /// Body returned successfully; waiting for children.
    Completing,
    /// Cancellation requested or failure adopted; cleanup may be running.
    Cancelling,
    /// Terminal: cancelled, carries a cancellation cause.
    Cancelled,
    /// Terminal: completed successfully.
    Completed,
}

impl JobState {
    /// True for `Cancelled` and `Completed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Cancelled | JobState::Completed)
    }

    /// True while the job is doing useful work (`Active` or `Completing`).
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Active | JobState::Completing)
    }

    /// Short stable label (snake_case) for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Active => "active",
            JobState::Completing => "completing",
            JobState::Cancelling => "cancelling",
            JobState::Cancelled => "cancelled",
            JobState::Completed => "completed",
        }
    }
}

/// How a job ended.
///
/// Failed jobs end `Cancelled` carrying [`CancelCause::Failure`]; there is
/// no third terminal state.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// The job and all its children completed successfully.
    Completed,
    /// The job was cancelled with the given cause.
    Cancelled(CancelCause),
}

impl Outcome {
    /// True if the job completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    /// The propagated failure, if this outcome carries one.
    pub fn fault(&self) -> Option<&crate::error::Fault> {
        match self {
            Outcome::Cancelled(cause) => cause.fault(),
            Outcome::Completed => None,
        }
    }
}

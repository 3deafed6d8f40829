//! Error and cancellation-cause taxonomy for the jobscope runtime.
//!
//! The runtime distinguishes two fundamentally different ways a job can end
//! abnormally:
//!
//! - **Cancellation** — a control signal, not a defect. Produced by an explicit
//!   [`Job::cancel`](crate::Job::cancel), a timeout, or scope teardown.
//!   Swallowed at [`Job::join`](crate::Job::join).
//! - **Failure** — an application error. Travels up a chain of normal jobs,
//!   cancelling siblings, and is re-raised at the nearest awaiting caller.
//!
//! Instead of encoding the distinction in exception types, both are explicit
//! values: [`CancelCause`] tags why a job was cancelled, and
//! [`CancelCause::escalates`] is the single policy point deciding which causes
//! propagate to the parent job.
//!
//! ## Escalation policy
//! Only [`CancelCause::Failure`] escalates. `Requested`, `ParentCancelled`,
//! `SiblingFailed`, and `TimedOut` are silent: they end the job's subtree but
//! are never re-raised to the parent or from `join`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::job::JobId;

/// Cloneable application failure cause.
///
/// Carries its message as `Arc<str>` so the same cause can travel up the job
/// tree and into completion observers without copying.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Fault {
    message: Arc<str>,
}

impl Fault {
    /// Creates a fault from a message.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a job was cancelled.
///
/// Stored on the job when it enters `Cancelling` and carried by its terminal
/// [`Outcome`](crate::Outcome). Whether the cause travels further up the tree
/// is decided by [`CancelCause::escalates`], never by type identity.
#[derive(Clone, Debug)]
pub enum CancelCause {
    /// Explicit `cancel()` call, with an optional human-readable reason.
    Requested {
        /// Why the caller requested cancellation, if stated.
        reason: Option<Arc<str>>,
    },
    /// The parent job entered `Cancelling` and tore the subtree down.
    ParentCancelled,
    /// A sibling under the same normal parent failed.
    SiblingFailed {
        /// Identity of the failing sibling.
        sibling: JobId,
    },
    /// The job lost the race against a timer inside a `timeout` region.
    TimedOut {
        /// The timeout that expired.
        after: Duration,
    },
    /// The job's own body failed, or a non-supervisor child's failure was
    /// adopted. The only escalating cause.
    Failure(Fault),
}

impl CancelCause {
    /// Shorthand for an explicit request without a reason.
    pub fn requested() -> Self {
        CancelCause::Requested { reason: None }
    }

    /// True if this cause propagates to the parent job.
    ///
    /// This is the crate's silent-vs-escalating policy in one place: a
    /// failure escalates, every pure cancellation is silent.
    pub fn escalates(&self) -> bool {
        matches!(self, CancelCause::Failure(_))
    }

    /// The failure cause, if this cancellation carries one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            CancelCause::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// Short stable label (snake_case) for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            CancelCause::Requested { .. } => "cancel_requested",
            CancelCause::ParentCancelled => "parent_cancelled",
            CancelCause::SiblingFailed { .. } => "sibling_failed",
            CancelCause::TimedOut { .. } => "timed_out",
            CancelCause::Failure(_) => "failure",
        }
    }
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Requested { reason: Some(r) } => write!(f, "requested: {r}"),
            CancelCause::Requested { reason: None } => write!(f, "requested"),
            CancelCause::ParentCancelled => write!(f, "parent cancelled"),
            CancelCause::SiblingFailed { sibling } => write!(f, "sibling {sibling} failed"),
            CancelCause::TimedOut { after } => write!(f, "timed out after {after:?}"),
            CancelCause::Failure(fault) => write!(f, "failure: {fault}"),
        }
    }
}

/// Error surfaced by jobs, scopes, and suspension points.
#[non_exhaustive]
#[derive(Clone, Debug, Error)]
pub enum JobError {
    /// Control signal: the job (or an awaited job) was cancelled without a
    /// propagated failure. Swallowed at `join`; flows out of bodies via `?`.
    #[error("cancelled: {0}")]
    Cancelled(CancelCause),

    /// A propagated application failure.
    #[error("failed: {0}")]
    Failed(Fault),

    /// A `timeout` region expired before its body finished.
    #[error("timed out after {after:?}")]
    TimedOut {
        /// The timeout that expired.
        after: Duration,
    },

    /// Operational error from a dispatcher.
    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    /// A required context element was absent.
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl JobError {
    /// Builds an ordinary application failure.
    pub fn fail(message: impl Into<Arc<str>>) -> Self {
        JobError::Failed(Fault::new(message))
    }

    /// True if this is a cancellation control signal rather than an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled(_))
    }

    /// Short stable label (snake_case) for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Cancelled(_) => "job_cancelled",
            JobError::Failed(_) => "job_failed",
            JobError::TimedOut { .. } => "job_timed_out",
            JobError::Dispatcher(_) => "dispatcher_error",
            JobError::Context(_) => "context_error",
        }
    }

    /// Classifies a non-cancellation error as a failure cause.
    ///
    /// Used at propagation points: any body error other than `Cancelled`
    /// becomes an ordinary failure that cancels the subtree fail-fast.
    pub(crate) fn into_fault(self) -> Fault {
        match self {
            JobError::Failed(fault) => fault,
            JobError::Cancelled(cause) => Fault::new(format!("cancelled: {cause}")),
            other => Fault::new(other.to_string()),
        }
    }
}

/// Operational errors raised by dispatchers.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DispatcherError {
    /// Work was submitted after the dispatcher shut down.
    #[error("dispatcher closed")]
    Closed,
}

impl DispatcherError {
    /// Short stable label (snake_case) for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatcherError::Closed => "dispatcher_closed",
        }
    }
}

/// Errors raised by callers asserting on the context map.
///
/// Lookup itself never fails; `Missing` is produced by
/// [`ContextMap::require`](crate::ContextMap::require) when a mandatory
/// element is absent.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A required context element was not attached by any enclosing scope.
    #[error("missing required context element: {key}")]
    Missing {
        /// Type name of the missing element.
        key: &'static str,
    },
}

//! # Compute: a launched child with a future value.
//!
//! Returned by [`Scope::async_compute`](crate::Scope::async_compute). Pairs
//! the child's [`Job`] handle with a one-shot channel carrying the body's
//! result.
//!
//! ## Rules
//! - `await_value` observes the result only after the child is fully
//!   terminal.
//! - Unlike [`Job::join`], awaiting the value **re-raises the child's
//!   failure even under a supervisor boundary** — a direct handle is one of
//!   the two ways an isolated failure stays observable.
//! - Cancellation of the child surfaces as `Err(Cancelled)`, since there is
//!   no value to produce.

use tokio::sync::oneshot;

use crate::error::{CancelCause, JobError};
use crate::job::{Job, Outcome};

/// Handle to a launched child task that produces a value.
pub struct Compute<T> {
    job: Job,
    rx: oneshot::Receiver<T>,
}

impl<T> Compute<T> {
    pub(crate) fn new(job: Job, rx: oneshot::Receiver<T>) -> Self {
        Self { job, rx }
    }

    /// The underlying job handle (for cancel/state observation).
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Suspends until the child is terminal, then yields its value.
    ///
    /// A lazily launched child is started first. Failures re-raise here
    /// regardless of the parent's kind; cancellations surface as
    /// `Err(Cancelled)`.
    pub async fn await_value(mut self) -> Result<T, JobError> {
        self.job.start();
        self.job.wait_terminal().await;
        match self.job.outcome() {
            Some(Outcome::Completed) => match self.rx.try_recv() {
                Ok(value) => Ok(value),
                // Completed without sending: the body was replaced or the
                // sender dropped; report it as a failure, not a hang.
                Err(_) => Err(JobError::fail("computed value unavailable")),
            },
            Some(Outcome::Cancelled(CancelCause::Failure(fault))) => Err(JobError::Failed(fault)),
            Some(Outcome::Cancelled(cause)) => Err(JobError::Cancelled(cause)),
            None => Err(JobError::fail("job not terminal after wait")),
        }
    }
}

impl<T> std::fmt::Debug for Compute<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compute").field("job", &self.job).finish()
    }
}

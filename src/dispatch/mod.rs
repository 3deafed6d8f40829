//! Dispatchers: bounded-parallelism execution of job bodies.
//!
//! A [`Dispatcher`] bounds how many units of work actively execute at once;
//! a unit parked at a suspension point occupies no worker, so awaiting
//! another job never starves the pool. [`Dispatcher::limited_parallelism`]
//! multiplexes a pool down to `k` concurrently in-flight units, held across
//! suspension points — `k = 1` is a mutual-exclusion lane for shared
//! mutable state, the preferred alternative to ad hoc locking for composite
//! invariants.
//!
//! A unit of work that fails propagates the failure to its owning
//! [`Job`](crate::Job), never to the dispatcher.

mod limited;
mod pool;

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{DispatcherError, JobError};
use crate::job::Job;

use limited::Limited;
use pool::WorkerPool;

/// Boxed body future driven by a dispatcher worker.
pub(crate) type UnitFuture = BoxFuture<'static, ()>;

/// One schedulable unit: a job body plus the handle of the job that owns it.
///
/// Carrying the handle lets a rejecting dispatcher fail the job with
/// [`DispatcherError::Closed`] instead of stranding it in a non-terminal
/// state.
pub(crate) struct JobUnit {
    job: Job,
    fut: UnitFuture,
}

impl JobUnit {
    pub(crate) fn new(job: Job, fut: UnitFuture) -> Self {
        Self { job, fut }
    }

    /// The owning job.
    pub(crate) fn job(&self) -> &Job {
        &self.job
    }

    /// Drives the body to completion.
    pub(crate) async fn run(self) {
        self.fut.await;
    }

    /// Fails the owning job: the dispatcher will never run this unit.
    pub(crate) fn reject(self) {
        self.job
            .complete_body(Err(JobError::Dispatcher(DispatcherError::Closed)));
    }
}

/// Execution seam implemented by worker pools and wrappers.
pub(crate) trait Dispatch: Send + Sync + 'static {
    /// Enqueues a unit.
    ///
    /// On `Closed` the unit's job has already been failed with
    /// [`DispatcherError::Closed`] before the call returns.
    fn submit(&self, unit: JobUnit) -> Result<(), DispatcherError>;

    /// Shuts the dispatcher down: new submissions fail, already-accepted
    /// units still run to completion.
    fn close(&self);

    /// True once `close` has been called.
    fn is_closed(&self) -> bool;

    /// Name for logs and events.
    fn name(&self) -> &str;
}

/// Handle to a dispatcher; cheap to clone, explicitly constructed and
/// explicitly passed (no process-wide singleton).
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<dyn Dispatch>,
}

impl Dispatcher {
    /// Creates a pool dispatcher with the given worker count (clamped ≥ 1).
    ///
    /// Submissions must happen within a tokio runtime.
    pub fn pool(name: impl Into<Arc<str>>, workers: usize) -> Self {
        Self {
            inner: Arc::new(WorkerPool::new(name.into(), workers.max(1))),
        }
    }

    /// Pool sized for compute-bound work: one worker per available core.
    pub fn compute() -> Self {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        Self::pool("compute", workers)
    }

    /// Pool sized for blocking-ish work (a larger bound than core count).
    pub fn blocking(workers: usize) -> Self {
        Self::pool("blocking", if workers == 0 { 64 } else { workers })
    }

    /// Wraps this dispatcher, admitting at most `k` of the wrapper's own
    /// units concurrently (clamped ≥ 1); the rest wait in the wrapper's
    /// FIFO queue.
    ///
    /// With `k = 1` the returned lane serializes every unit submitted
    /// through it, giving mutual exclusion without locks.
    #[must_use]
    pub fn limited_parallelism(&self, k: usize) -> Self {
        Self {
            inner: Arc::new(Limited::new(self.clone(), k.max(1))),
        }
    }

    pub(crate) fn submit(&self, unit: JobUnit) -> Result<(), DispatcherError> {
        self.inner.submit(unit)
    }

    /// Shuts the dispatcher down: new submissions fail with
    /// [`DispatcherError::Closed`], already-accepted units still run.
    pub fn close(&self) {
        self.inner.close();
    }

    /// True once the dispatcher has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Dispatcher name for logs and events.
    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

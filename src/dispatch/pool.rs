//! # WorkerPool: bounded active execution over spawned unit tasks.
//!
//! Every accepted unit runs as its own task; a semaphore with one permit per
//! worker gates polling. At most N units are actively executing at any
//! instant, while a unit parked at a suspension point holds no permit.
//!
//! ## Rules
//! - **Bounded execution**: at most `workers` units are polled concurrently.
//! - **Suspension releases the worker**: the permit is held per poll, so a
//!   unit awaiting a child, a timer, or another job hands its worker to the
//!   next runnable unit — a body joining a unit submitted behind it cannot
//!   deadlock the pool. (`limited_parallelism` is the wrapper that keeps
//!   its slot across suspension points.)
//! - **Close rejects, never strands**: new submissions fail; units already
//!   accepted run to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::error::DispatcherError;

use super::{Dispatch, JobUnit};

type AcquireFuture =
    Pin<Box<dyn Future<Output = Result<OwnedSemaphorePermit, AcquireError>> + Send>>;

pub(super) struct WorkerPool {
    name: Arc<str>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl WorkerPool {
    pub(super) fn new(name: Arc<str>, workers: usize) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(workers)),
            closed: AtomicBool::new(false),
        }
    }
}

impl Dispatch for WorkerPool {
    /// Spawns the unit gated by the pool's permits.
    ///
    /// Must be called within a tokio runtime.
    fn submit(&self, unit: JobUnit) -> Result<(), DispatcherError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            unit.reject();
            return Err(DispatcherError::Closed);
        }
        tokio::spawn(Gated {
            permits: Arc::clone(&self.permits),
            waiting: None,
            fut: Box::pin(unit.run()),
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Future wrapper holding a pool permit only while its inner future is
/// actively being polled.
///
/// `Pending` from the unit drops the permit before parking, so suspended
/// units never occupy a worker; the next poll re-acquires (FIFO-fair via
/// the semaphore's wait queue).
struct Gated {
    permits: Arc<Semaphore>,
    waiting: Option<AcquireFuture>,
    fut: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Future for Gated {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let acquire = this
            .waiting
            .get_or_insert_with(|| Box::pin(Arc::clone(&this.permits).acquire_owned()));
        let permit = match acquire.as_mut().poll(cx) {
            Poll::Ready(Ok(permit)) => permit,
            // Semaphore closed: nothing to gate on, run the unit out.
            Poll::Ready(Err(_)) => return this.fut.as_mut().poll(cx),
            Poll::Pending => return Poll::Pending,
        };
        this.waiting = None;
        let res = this.fut.as_mut().poll(cx);
        drop(permit);
        res
    }
}

//! # Limited: parallelism cap over another dispatcher.
//!
//! Wraps a dispatcher and admits at most `k` of its own units at a time,
//! regardless of how many logical tasks submit through it. Holds its own
//! FIFO queue; when an in-flight unit finishes, the admission slot is handed
//! straight to the next queued unit.
//!
//! ```text
//! submit ──► running < k ? ──► forward to underlying dispatcher
//!                 │
//!                 └─ no ────► [own FIFO queue] ─► (slot freed) ─► forward
//! ```
//!
//! ## Rules
//! - The admission counter tracks the wrapper's own units only; other users
//!   of the underlying dispatcher are not counted.
//! - A slot is held for a unit's entire run, suspension points included.
//! - If the underlying dispatcher closes, every queued unit is rejected
//!   (its job fails with `dispatcher closed`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::DispatcherError;

use super::{Dispatch, Dispatcher, JobUnit};

struct Admission {
    running: usize,
    queue: VecDeque<JobUnit>,
}

struct LimitedCore {
    name: Arc<str>,
    under: Dispatcher,
    limit: usize,
    state: Mutex<Admission>,
    closed: AtomicBool,
}

impl LimitedCore {
    fn state(&self) -> MutexGuard<'_, Admission> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(super) struct Limited {
    core: Arc<LimitedCore>,
}

impl Limited {
    pub(super) fn new(under: Dispatcher, limit: usize) -> Self {
        let name: Arc<str> = format!("{}/limited({})", under.name(), limit).into();
        Self {
            core: Arc::new(LimitedCore {
                name,
                under,
                limit,
                state: Mutex::new(Admission {
                    running: 0,
                    queue: VecDeque::new(),
                }),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Wraps a unit so that finishing it hands the slot to the next queued
    /// unit, then forwards it to the underlying dispatcher.
    fn forward(core: &Arc<LimitedCore>, unit: JobUnit) -> Result<(), DispatcherError> {
        let hook = Arc::clone(core);
        let wrapped = JobUnit::new(
            unit.job().clone(),
            Box::pin(async move {
                unit.run().await;
                Self::on_done(&hook);
            }),
        );
        match core.under.submit(wrapped) {
            Ok(()) => Ok(()),
            Err(err) => {
                // The wrapped unit was rejected (job already failed); the
                // slot it held dies with it, and nothing queued can run.
                Self::drain_rejected(core);
                Err(err)
            }
        }
    }

    /// Called when an admitted unit finishes: hand the slot to the next
    /// queued unit, or release it.
    fn on_done(core: &Arc<LimitedCore>) {
        let next = {
            let mut st = core.state();
            match st.queue.pop_front() {
                Some(unit) => Some(unit),
                None => {
                    st.running = st.running.saturating_sub(1);
                    None
                }
            }
        };
        if let Some(unit) = next {
            let _ = Self::forward(core, unit);
        }
    }

    /// The underlying dispatcher is gone; fail everything still queued.
    fn drain_rejected(core: &Arc<LimitedCore>) {
        core.closed.store(true, AtomicOrdering::Release);
        let drained = {
            let mut st = core.state();
            st.running = st.running.saturating_sub(1);
            std::mem::take(&mut st.queue)
        };
        for unit in drained {
            unit.reject();
        }
    }
}

impl Dispatch for Limited {
    fn submit(&self, unit: JobUnit) -> Result<(), DispatcherError> {
        if self.core.closed.load(AtomicOrdering::Acquire) || self.core.under.is_closed() {
            unit.reject();
            return Err(DispatcherError::Closed);
        }
        let admitted = {
            let mut st = self.core.state();
            if st.running < self.core.limit {
                st.running += 1;
                true
            } else {
                st.queue.push_back(unit);
                return Ok(());
            }
        };
        debug_assert!(admitted);
        Self::forward(&self.core, unit)
    }

    fn close(&self) {
        self.core.closed.store(true, AtomicOrdering::Release);
        let drained = {
            let mut st = self.core.state();
            std::mem::take(&mut st.queue)
        };
        for unit in drained {
            unit.reject();
        }
    }

    fn is_closed(&self) -> bool {
        self.core.closed.load(AtomicOrdering::Acquire)
    }

    fn name(&self) -> &str {
        &self.core.name
    }
}

//! # Lifecycle events emitted by jobs and dispatchers.
//!
//! [`EventKind`] classifies what happened; [`Event`] carries the metadata
//! (which job, why, when). Events exist for observability only — no runtime
//! decision is driven by them, so a dropped event never changes semantics.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore publish order when events are
//! delivered out of order across subscribers.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::job::JobId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Job lifecycle ===
    /// A job became `Active` (eager launch or explicit start).
    ///
    /// Sets: `job`, `at`, `seq`.
    JobLaunched,

    /// A job reached `Completed`.
    ///
    /// Sets: `job`, `at`, `seq`.
    JobCompleted,

    /// A job entered `Cancelling`.
    ///
    /// Sets: `job`, `reason` (cause label), `at`, `seq`.
    JobCancelling,

    /// A job reached `Cancelled`.
    ///
    /// Sets: `job`, `reason` (cause label), `at`, `seq`.
    JobCancelled,

    // === Failure propagation ===
    /// A normal parent adopted a child's failure and is cancelling its
    /// subtree before re-raising.
    ///
    /// Sets: `job` (the failing child), `reason` (failure message), `at`, `seq`.
    FailureEscalated,

    /// A supervisor boundary contained a child's failure; siblings keep
    /// running. Published only when no uncaught-failure handler is attached.
    ///
    /// Sets: `job` (the failing child), `reason` (failure message), `at`, `seq`.
    FailureIsolated,

    // === Dispatchers ===
    /// A unit of work was rejected because its dispatcher had shut down.
    ///
    /// Sets: `job`, `dispatcher`, `at`, `seq`.
    DispatcherRejected,

    // === Subscriber plumbing ===
    /// A subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `dispatcher` (subscriber name), `reason`, `at`, `seq`.
    SubscriberOverflow,

    /// A subscriber panicked while processing an event.
    ///
    /// Sets: `dispatcher` (subscriber name), `reason`, `at`, `seq`.
    SubscriberPanicked,
}

impl EventKind {
    /// Short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::JobLaunched => "job_launched",
            EventKind::JobCompleted => "job_completed",
            EventKind::JobCancelling => "job_cancelling",
            EventKind::JobCancelled => "job_cancelled",
            EventKind::FailureEscalated => "failure_escalated",
            EventKind::FailureIsolated => "failure_isolated",
            EventKind::DispatcherRejected => "dispatcher_rejected",
            EventKind::SubscriberOverflow => "subscriber_overflow",
            EventKind::SubscriberPanicked => "subscriber_panicked",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Identity of the job concerned, if applicable.
    pub job: Option<JobId>,
    /// Dispatcher or subscriber name, if applicable.
    pub dispatcher: Option<Arc<str>>,
    /// Human-readable reason (cause labels, failure messages).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            dispatcher: None,
            reason: None,
        }
    }

    /// Attaches the job concerned.
    #[inline]
    pub fn with_job(mut self, job: JobId) -> Self {
        self.job = Some(job);
        self
    }

    /// Attaches a dispatcher or subscriber name.
    #[inline]
    pub fn with_dispatcher(mut self, name: impl Into<Arc<str>>) -> Self {
        self.dispatcher = Some(name.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

//! # Job: a node in the cancellation tree.
//!
//! Supervises the lifecycle of one unit of work and its children:
//! - monotonic state transitions per [`JobState`](super::JobState),
//! - cooperative cancellation via a [`CancellationToken`] chained from the
//!   parent's,
//! - bottom-up propagation of child outcomes per the job's
//!   [`JobKind`](super::JobKind).
//!
//! ## Propagation rules
//! ```text
//! child ends Cancelled(Failure(f))
//!     │
//!     ├─ parent is Normal ──► parent → Cancelling(Failure(f))
//!     │                         ├─► remaining children cancelled (SiblingFailed)
//!     │                         └─► escalates further when parent terminal
//!     │
//!     └─ parent is Supervisor ─► parent stays Active
//!                                 ├─► uncaught handler invoked, if attached
//!                                 └─► else FailureIsolated event, cause dropped
//!
//! child ends Cancelled(silent cause) ──► parent unaffected
//! ```
//!
//! ## Rules
//! - A job reaches `Cancelled`/`Completed` only after its body has returned
//!   **and** every child is terminal. Cleanup running in an uninterruptible
//!   region therefore always finishes before the job ends.
//! - `cancel` is idempotent; the first cause wins and later causes are
//!   ignored. When two children fail concurrently the first adopted failure
//!   is the one re-raised.
//! - The parent link is weak: propagation never keeps a parent alive.
//! - State changes and their watch/bus notifications happen under the core
//!   lock; completion observers and cross-node calls run outside it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, JobUnit, UnitFuture};
use crate::error::{CancelCause, Fault, JobError};
use crate::events::{Bus, Event, EventKind};

use super::state::{JobId, JobKind, JobState, Outcome};

/// Handler invoked when a supervisor boundary drops a child failure that
/// nothing awaits. The only path by which an isolated failure becomes
/// observable without awaiting that child directly.
pub type UncaughtHandler = Arc<dyn Fn(JobId, &Fault) + Send + Sync + 'static>;

/// Completion callback; receives the terminal failure cause, or `None` for
/// success and plain cancellation.
type CompletionObserver = Box<dyn FnOnce(Option<&Fault>) + Send + 'static>;

/// Body of a lazily launched job, retained until `start`.
struct PendingLaunch {
    dispatcher: Dispatcher,
    fut: UnitFuture,
}

/// Mutable core, guarded by one mutex per job.
struct Core {
    state: JobState,
    children: HashMap<JobId, Job>,
    observers: Vec<CompletionObserver>,
    cancel_cause: Option<CancelCause>,
    body_done: bool,
    pending: Option<PendingLaunch>,
}

struct Inner {
    id: JobId,
    kind: JobKind,
    /// Weak: used only for upward propagation, never keeps the parent alive.
    parent: Weak<Inner>,
    token: CancellationToken,
    state_tx: watch::Sender<JobState>,
    bus: Bus,
    handler: Option<UncaughtHandler>,
    core: Mutex<Core>,
}

/// Cheap-clone handle to a node in the cancellation tree.
#[derive(Clone)]
pub struct Job {
    inner: Arc<Inner>,
}

impl Job {
    /// Creates a root job with no parent (entry point of a runtime scope).
    pub(crate) fn root(kind: JobKind, bus: Bus, handler: Option<UncaughtHandler>) -> Job {
        Job {
            inner: Arc::new(Inner {
                id: JobId::next(),
                kind,
                parent: Weak::new(),
                token: CancellationToken::new(),
                state_tx: watch::channel(JobState::Active).0,
                bus,
                handler,
                core: Mutex::new(Core {
                    state: JobState::Active,
                    children: HashMap::new(),
                    observers: Vec::new(),
                    cancel_cause: None,
                    body_done: false,
                    pending: None,
                }),
            }),
        }
    }

    /// Creates a child job registered under `parent`.
    ///
    /// The child's token derives from the parent's, its bus is inherited,
    /// and its uncaught handler defaults to the nearest enclosing one. A
    /// child created under a cancelling or terminal parent is cancelled
    /// immediately.
    pub(crate) fn child_of(
        parent: &Job,
        kind: JobKind,
        handler: Option<UncaughtHandler>,
        eager: bool,
    ) -> Job {
        let initial = if eager { JobState::Active } else { JobState::New };
        let job = Job {
            inner: Arc::new(Inner {
                id: JobId::next(),
                kind,
                parent: Arc::downgrade(&parent.inner),
                token: parent.inner.token.child_token(),
                state_tx: watch::channel(initial).0,
                bus: parent.inner.bus.clone(),
                handler: handler.or_else(|| parent.inner.handler.clone()),
                core: Mutex::new(Core {
                    state: initial,
                    children: HashMap::new(),
                    observers: Vec::new(),
                    cancel_cause: None,
                    body_done: false,
                    pending: None,
                }),
            }),
        };

        let parent_state = {
            let mut pc = parent.core();
            if !pc.state.is_terminal() {
                pc.children.insert(job.id(), job.clone());
            }
            pc.state
        };
        if parent_state == JobState::Cancelling || parent_state.is_terminal() {
            job.cancel(CancelCause::ParentCancelled);
        } else if eager {
            job.inner
                .bus
                .publish(Event::now(EventKind::JobLaunched).with_job(job.id()));
        }
        job
    }

    /// Creates a detached scope job: its token chains from the parent's so
    /// cancellation still flows downward, but it is not registered as a
    /// child and never escalates through the tree — a structured scope
    /// delivers its outcome to the caller awaiting it inline instead.
    pub(crate) fn scope_of(parent: &Job, kind: JobKind, handler: Option<UncaughtHandler>) -> Job {
        Job {
            inner: Arc::new(Inner {
                id: JobId::next(),
                kind,
                parent: Weak::new(),
                token: parent.inner.token.child_token(),
                state_tx: watch::channel(JobState::Active).0,
                bus: parent.inner.bus.clone(),
                handler: handler.or_else(|| parent.inner.handler.clone()),
                core: Mutex::new(Core {
                    state: JobState::Active,
                    children: HashMap::new(),
                    observers: Vec::new(),
                    cancel_cause: None,
                    body_done: false,
                    pending: None,
                }),
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unique identity of this job.
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Failure-propagation discipline of this job.
    pub fn kind(&self) -> JobKind {
        self.inner.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.core().state
    }

    /// True while the job is doing useful work (`Active` or `Completing`).
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// True once cancellation has been requested or adopted (`Cancelling`
    /// or `Cancelled`).
    pub fn is_cancelled(&self) -> bool {
        matches!(self.state(), JobState::Cancelling | JobState::Cancelled)
    }

    /// True once the job completed successfully.
    pub fn is_completed(&self) -> bool {
        self.state() == JobState::Completed
    }

    /// The pending or terminal cancellation cause, if any.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.core().cancel_cause.clone()
    }

    /// The terminal outcome, or `None` while the job is still running.
    pub fn outcome(&self) -> Option<Outcome> {
        let core = self.core();
        match core.state {
            JobState::Completed => Some(Outcome::Completed),
            JobState::Cancelled => Some(Outcome::Cancelled(
                core.cancel_cause.clone().unwrap_or_else(CancelCause::requested),
            )),
            _ => None,
        }
    }

    /// Event bus this job publishes to.
    pub(crate) fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Cooperative cancellation signal observed by suspension points.
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Waits until this job's token fires.
    pub(crate) async fn cancelled_signal(&self) {
        self.inner.token.cancelled().await;
    }

    /// Requests cancellation with the given cause and returns immediately.
    ///
    /// Idempotent: once the job is `Cancelling` or terminal, later calls are
    /// no-ops and the first cause is kept. Non-terminal children are
    /// cancelled with `ParentCancelled`.
    pub fn cancel(&self, cause: CancelCause) {
        self.cancel_with(cause, CancelCause::ParentCancelled);
    }

    /// Cancellation entry point; `child_cause` is what the children see
    /// (`SiblingFailed` when driven by a failing child, `ParentCancelled`
    /// otherwise).
    fn cancel_with(&self, cause: CancelCause, child_cause: CancelCause) {
        let children = {
            let mut core = self.core();
            if core.state.is_terminal() || core.state == JobState::Cancelling {
                return;
            }
            core.cancel_cause = Some(cause.clone());
            if core.state == JobState::New {
                // Lazy body never ran; nothing will call complete_body.
                core.pending = None;
                core.body_done = true;
            }
            core.state = JobState::Cancelling;
            self.inner.state_tx.send_replace(JobState::Cancelling);
            self.inner.bus.publish(
                Event::now(EventKind::JobCancelling)
                    .with_job(self.inner.id)
                    .with_reason(cause.as_label()),
            );
            core.children.values().cloned().collect::<Vec<_>>()
        };

        self.inner.token.cancel();
        for child in children {
            child.cancel_with(child_cause.clone(), CancelCause::ParentCancelled);
        }
        self.maybe_finish();
    }

    /// Records the body's result and classifies it.
    ///
    /// `Err(Cancelled)` is a control signal: the job becomes `Cancelling`
    /// with that cause if it was not already. Any other error is an ordinary
    /// failure that cancels the subtree fail-fast. The job still waits for
    /// its children before reaching a terminal state.
    pub(crate) fn complete_body(&self, result: Result<(), JobError>) {
        match result {
            Ok(()) => {}
            Err(JobError::Cancelled(cause)) => {
                self.cancel_with(cause, CancelCause::ParentCancelled);
            }
            Err(other) => {
                self.cancel_with(
                    CancelCause::Failure(other.into_fault()),
                    CancelCause::ParentCancelled,
                );
            }
        }

        {
            let mut core = self.core();
            core.body_done = true;
            if core.state == JobState::Active && !core.children.is_empty() {
                core.state = JobState::Completing;
                self.inner.state_tx.send_replace(JobState::Completing);
            }
        }
        self.maybe_finish();
    }

    /// Arms a lazily launched job with its body; dropped if the job was
    /// cancelled before ever starting.
    pub(crate) fn set_pending(&self, dispatcher: Dispatcher, fut: UnitFuture) {
        let mut core = self.core();
        if core.state == JobState::New {
            core.pending = Some(PendingLaunch { dispatcher, fut });
        }
    }

    /// Starts a lazily launched job (`New → Active`), submitting its body to
    /// the dispatcher it was created with.
    ///
    /// Returns `true` if this call performed the start. Eager jobs and jobs
    /// already past `New` return `false`.
    pub fn start(&self) -> bool {
        let pending = {
            let mut core = self.core();
            if core.state != JobState::New {
                return false;
            }
            core.state = JobState::Active;
            self.inner.state_tx.send_replace(JobState::Active);
            self.inner
                .bus
                .publish(Event::now(EventKind::JobLaunched).with_job(self.inner.id));
            core.pending.take()
        };

        match pending {
            Some(p) => {
                let unit = JobUnit::new(self.clone(), p.fut);
                let _ = p.dispatcher.submit(unit);
            }
            None => {
                // Nothing to run; treat the body as already finished.
                self.complete_body(Ok(()));
            }
        }
        true
    }

    /// Forces any still-`New` child to start.
    ///
    /// Called when a structured region seals: its completion must not wait
    /// on a lazy body that nothing would ever run.
    pub(crate) fn start_lazy_children(&self) {
        let children: Vec<Job> = self.core().children.values().cloned().collect();
        for child in children {
            child.start();
        }
    }

    /// Registers a completion observer, invoked exactly once with `None`
    /// (success or plain cancellation) or the terminal failure cause.
    ///
    /// If the job is already terminal the observer fires synchronously
    /// before this call returns.
    pub fn invoke_on_completion(&self, f: impl FnOnce(Option<&Fault>) + Send + 'static) {
        let fire_now = {
            let mut core = self.core();
            if core.state.is_terminal() {
                Some(core.cancel_cause.clone())
            } else {
                core.observers.push(Box::new(f));
                return;
            }
        };
        if let Some(cause) = fire_now {
            // Only the terminal failure cause is reported; a pure
            // cancellation looks like success to observers.
            f(cause.as_ref().and_then(CancelCause::fault));
        }
    }

    /// Suspends until the job is terminal.
    ///
    /// A lazily launched job is started first. If the job ended `Cancelled`
    /// due to a propagated failure, that failure is re-raised; a pure
    /// cancellation is swallowed — it is a control signal, not an error.
    pub async fn join(&self) -> Result<(), JobError> {
        self.start();
        self.wait_terminal().await;
        match self.outcome() {
            Some(Outcome::Cancelled(CancelCause::Failure(fault))) => Err(JobError::Failed(fault)),
            _ => Ok(()),
        }
    }

    /// Waits for the job to reach a terminal state, without interpreting
    /// the outcome.
    pub(crate) async fn wait_terminal(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        // The sender lives in `self.inner`, so this cannot observe a closed
        // channel before a terminal state.
        let _ = rx.wait_for(JobState::is_terminal).await;
    }

    /// Handles a child reaching a terminal state.
    fn on_child_terminal(&self, child: JobId, outcome: &Outcome) {
        let escalated = {
            let mut core = self.core();
            core.children.remove(&child);
            match outcome {
                Outcome::Cancelled(cause) if cause.escalates() => cause.fault().cloned(),
                _ => None,
            }
        };

        if let Some(fault) = escalated {
            match self.inner.kind {
                JobKind::Normal => {
                    self.inner.bus.publish(
                        Event::now(EventKind::FailureEscalated)
                            .with_job(child)
                            .with_reason(fault.message().to_string()),
                    );
                    self.cancel_with(
                        CancelCause::Failure(fault),
                        CancelCause::SiblingFailed { sibling: child },
                    );
                }
                JobKind::Supervisor => match &self.inner.handler {
                    Some(handler) => handler(child, &fault),
                    None => self.inner.bus.publish(
                        Event::now(EventKind::FailureIsolated)
                            .with_job(child)
                            .with_reason(fault.message().to_string()),
                    ),
                },
            }
        }
        self.maybe_finish();
    }

    /// Completes the job if its body has returned and every child is
    /// terminal; fires observers and notifies the parent.
    fn maybe_finish(&self) {
        let finished = {
            let mut core = self.core();
            if core.state.is_terminal() || !core.body_done || !core.children.is_empty() {
                None
            } else {
                let outcome = if core.state == JobState::Cancelling {
                    core.state = JobState::Cancelled;
                    Outcome::Cancelled(
                        core.cancel_cause.clone().unwrap_or_else(CancelCause::requested),
                    )
                } else {
                    core.state = JobState::Completed;
                    Outcome::Completed
                };
                self.inner.state_tx.send_replace(core.state);
                let (kind, reason) = match &outcome {
                    Outcome::Completed => (EventKind::JobCompleted, None),
                    Outcome::Cancelled(cause) => (EventKind::JobCancelled, Some(cause.as_label())),
                };
                let mut ev = Event::now(kind).with_job(self.inner.id);
                if let Some(r) = reason {
                    ev = ev.with_reason(r);
                }
                self.inner.bus.publish(ev);
                Some((outcome, std::mem::take(&mut core.observers)))
            }
        };

        if let Some((outcome, observers)) = finished {
            let fault = outcome.fault();
            for observer in observers {
                observer(fault);
            }
            if let Some(parent) = self.inner.parent.upgrade() {
                Job { inner: parent }.on_child_terminal(self.inner.id, &outcome);
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn root() -> Job {
        Job::root(JobKind::Normal, Bus::new(64), None)
    }

    #[tokio::test]
    async fn body_success_completes() {
        let job = root();
        assert!(job.is_active());
        job.complete_body(Ok(()));
        assert!(job.is_completed());
        assert!(job.join().await.is_ok());
    }

    #[tokio::test]
    async fn join_swallows_pure_cancellation() {
        let job = root();
        job.cancel(CancelCause::requested());
        assert_eq!(job.state(), JobState::Cancelling);
        job.complete_body(Err(JobError::Cancelled(CancelCause::requested())));
        assert_eq!(job.state(), JobState::Cancelled);
        assert!(job.join().await.is_ok());
    }

    #[tokio::test]
    async fn join_reraises_propagated_failure() {
        let job = root();
        job.complete_body(Err(JobError::fail("boom")));
        match job.join().await {
            Err(JobError::Failed(fault)) => assert_eq!(fault.message(), "boom"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_keeps_first_cause() {
        let job = root();
        job.cancel(CancelCause::Requested {
            reason: Some("first".into()),
        });
        job.cancel(CancelCause::Requested {
            reason: Some("second".into()),
        });
        match job.cancel_cause() {
            Some(CancelCause::Requested { reason }) => {
                assert_eq!(reason.as_deref(), Some("first"));
            }
            other => panic!("unexpected cause {other:?}"),
        }
        // Terminal states absorb: cancelling again after completion is a no-op.
        job.complete_body(Err(JobError::Cancelled(CancelCause::requested())));
        assert_eq!(job.state(), JobState::Cancelled);
        job.cancel(CancelCause::requested());
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn observer_fires_synchronously_when_already_terminal() {
        let job = root();
        job.complete_body(Ok(()));

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        job.invoke_on_completion(move |fault| {
            assert!(fault.is_none());
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn observer_receives_terminal_failure_cause() {
        let job = root();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        job.invoke_on_completion(move |fault| {
            assert_eq!(fault.map(Fault::message), Some("boom"));
            f.fetch_add(1, Ordering::SeqCst);
        });

        job.complete_body(Err(JobError::fail("boom")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parent_waits_for_children_before_completing() {
        let parent = root();
        let child = Job::child_of(&parent, JobKind::Normal, None, true);

        parent.complete_body(Ok(()));
        assert_eq!(parent.state(), JobState::Completing);

        child.complete_body(Ok(()));
        assert_eq!(child.state(), JobState::Completed);
        assert_eq!(parent.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn normal_parent_adopts_child_failure_and_cancels_siblings() {
        let parent = root();
        let failing = Job::child_of(&parent, JobKind::Normal, None, true);
        let sibling = Job::child_of(&parent, JobKind::Normal, None, true);

        failing.complete_body(Err(JobError::fail("boom")));

        assert!(parent.is_cancelled());
        assert!(sibling.is_cancelled());
        match sibling.cancel_cause() {
            Some(CancelCause::SiblingFailed { sibling: id }) => assert_eq!(id, failing.id()),
            other => panic!("unexpected cause {other:?}"),
        }

        sibling.complete_body(Err(JobError::Cancelled(CancelCause::ParentCancelled)));
        parent.complete_body(Ok(()));
        match parent.join().await {
            Err(JobError::Failed(fault)) => assert_eq!(fault.message(), "boom"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn supervisor_parent_isolates_child_failure() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let handler: UncaughtHandler = Arc::new(move |_id, fault| {
            assert_eq!(fault.message(), "boom");
            s.fetch_add(1, Ordering::SeqCst);
        });
        let parent = Job::root(JobKind::Supervisor, Bus::new(64), Some(handler));
        let failing = Job::child_of(&parent, JobKind::Normal, None, true);
        let sibling = Job::child_of(&parent, JobKind::Normal, None, true);

        failing.complete_body(Err(JobError::fail("boom")));

        assert!(parent.is_active());
        assert!(sibling.is_active());
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sibling.complete_body(Ok(()));
        parent.complete_body(Ok(()));
        assert!(parent.join().await.is_ok());
    }

    #[tokio::test]
    async fn child_created_under_cancelling_parent_is_cancelled() {
        let parent = root();
        parent.cancel(CancelCause::requested());
        let child = Job::child_of(&parent, JobKind::Normal, None, true);
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn silent_child_cancellation_does_not_escalate() {
        let parent = root();
        let child = Job::child_of(&parent, JobKind::Normal, None, true);

        child.cancel(CancelCause::requested());
        child.complete_body(Err(JobError::Cancelled(CancelCause::requested())));

        assert_eq!(child.state(), JobState::Cancelled);
        assert!(parent.is_active());
        parent.complete_body(Ok(()));
        assert!(parent.join().await.is_ok());
    }
}

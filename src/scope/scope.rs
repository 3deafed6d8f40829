//! # Scope: the capability handle passed to every job body.
//!
//! Bundles the body's own [`Job`], the inherited [`ContextMap`], and the
//! dispatcher children are submitted to. Everything a body can do — launch
//! children, open nested structured regions, suspend — goes through its
//! scope.
//!
//! ```text
//! scope.scope(|inner| ...)        inline structured region
//!      │                            returns only after every child is terminal
//!      ├─ inner.launch(f)         eager child on the inherited dispatcher
//!      ├─ inner.launch_lazy(f)    child stays New until start()/join()
//!      ├─ inner.async_compute(f)  child + value channel (Compute<T>)
//!      ├─ inner.delay(d)          suspension point, cancellation delivery
//!      └─ inner.uninterruptible(f) shielded region, signal deferred
//! ```
//!
//! ## Rules
//! - **Cancellation is cooperative**: it is delivered only at suspension
//!   points (`delay`, `checkpoint`, `yield_now`, `join`, `await_value`,
//!   `timeout`). Straight-line code is never interrupted.
//! - **Structured teardown**: a region opened with `scope`/`scope_with`/
//!   `timeout` never returns before every transitively launched child is
//!   terminal.
//! - **Shielding defers, never discards**: inside `uninterruptible` the
//!   suspension points ignore the cancel signal; the owning job still turns
//!   `Cancelling` immediately and reaches `Cancelled` once the region and
//!   body return.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::context::{ContextMap, Element};
use crate::dispatch::{Dispatcher, JobUnit, UnitFuture};
use crate::error::{CancelCause, Fault, JobError};
use crate::events::{Event, EventKind};
use crate::job::{Job, JobId, JobKind, Outcome, UncaughtHandler};

use super::Compute;

/// Options for [`Scope::scope_with`]: propagation discipline, context
/// additions, dispatcher override, and the uncaught-failure handler for
/// supervisor-rooted regions.
pub struct ScopeOptions {
    pub(crate) kind: JobKind,
    pub(crate) additions: ContextMap,
    pub(crate) dispatcher: Option<Dispatcher>,
    pub(crate) handler: Option<UncaughtHandler>,
}

impl ScopeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The region's root job becomes a supervisor: child failures are
    /// contained instead of cancelling siblings.
    #[must_use]
    pub fn supervisor(mut self) -> Self {
        self.kind = JobKind::Supervisor;
        self
    }

    /// Attaches one context element, shadowing any inherited element of the
    /// same type.
    #[must_use]
    pub fn with_element<E: Element>(mut self, element: Arc<E>) -> Self {
        self.additions = self.additions.attach(element);
        self
    }

    /// Composes a whole map of context additions (these shadow inherited
    /// entries on collision).
    #[must_use]
    pub fn with_context(mut self, additions: ContextMap) -> Self {
        self.additions = self.additions.compose(&additions);
        self
    }

    /// Children of the region are submitted to `dispatcher` instead of the
    /// inherited one.
    #[must_use]
    pub fn on_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Handler for failures a supervisor boundary would otherwise drop.
    /// Inherited by the whole region.
    #[must_use]
    pub fn on_uncaught(mut self, f: impl Fn(JobId, &Fault) + Send + Sync + 'static) -> Self {
        self.handler = Some(Arc::new(f));
        self
    }
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            kind: JobKind::Normal,
            additions: ContextMap::new(),
            dispatcher: None,
            handler: None,
        }
    }
}

/// Per-job capability handle: launch children, open nested regions, suspend.
///
/// Cheap to clone; clones share the same job.
#[derive(Clone)]
pub struct Scope {
    job: Job,
    cx: ContextMap,
    dispatcher: Dispatcher,
    /// Inside an `uninterruptible` region: suspension points ignore the
    /// cancel signal.
    shielded: bool,
}

impl Scope {
    pub(crate) fn new(job: Job, cx: ContextMap, dispatcher: Dispatcher) -> Self {
        Self {
            job,
            cx,
            dispatcher,
            shielded: false,
        }
    }

    /// The job this scope belongs to.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// The inherited context map.
    pub fn context(&self) -> &ContextMap {
        &self.cx
    }

    /// The dispatcher children are submitted to by default.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // === Launching children ===

    /// Launches an eager child on the inherited dispatcher.
    pub fn launch<F, Fut>(&self, f: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.launch_child(self.dispatcher.clone(), true, f)
    }

    /// Launches an eager child on an explicit dispatcher.
    pub fn launch_on<F, Fut>(&self, dispatcher: &Dispatcher, f: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.launch_child(dispatcher.clone(), true, f)
    }

    /// Creates a lazy child: it stays `New` (body retained, not submitted)
    /// until [`Job::start`] or [`Job::join`].
    pub fn launch_lazy<F, Fut>(&self, f: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.launch_child(self.dispatcher.clone(), false, f)
    }

    fn launch_child<F, Fut>(&self, dispatcher: Dispatcher, eager: bool, f: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let job = Job::child_of(&self.job, JobKind::Normal, None, eager);
        let child = Scope::new(job.clone(), self.cx.clone(), dispatcher.clone());
        let body = f(child);
        let owner = job.clone();
        let fut: UnitFuture = Box::pin(async move {
            let res = body.await;
            owner.complete_body(res);
        });

        if !eager {
            job.set_pending(dispatcher, fut);
            return job;
        }
        if job.is_cancelled() {
            // Created under a cancelling parent; the body never runs.
            let cause = job.cancel_cause().unwrap_or(CancelCause::ParentCancelled);
            job.complete_body(Err(JobError::Cancelled(cause)));
            return job;
        }
        if let Err(err) = dispatcher.submit(JobUnit::new(job.clone(), fut)) {
            job.bus().publish(
                Event::now(EventKind::DispatcherRejected)
                    .with_job(job.id())
                    .with_dispatcher(dispatcher.name())
                    .with_reason(err.as_label()),
            );
        }
        job
    }

    /// Launches a child that produces a value; the result is awaited through
    /// the returned [`Compute`] handle.
    pub fn async_compute<T, F, Fut>(&self, f: F) -> Compute<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        self.compute_child(self.dispatcher.clone(), f)
    }

    /// [`Scope::async_compute`] on an explicit dispatcher.
    pub fn async_compute_on<T, F, Fut>(&self, dispatcher: &Dispatcher, f: F) -> Compute<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        self.compute_child(dispatcher.clone(), f)
    }

    // The wrapping async block holds `f` until its first poll, so `f` needs
    // `Send + 'static` on top of what `launch_child` asks of the future.
    fn compute_child<T, F, Fut>(&self, dispatcher: Dispatcher, f: F) -> Compute<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = self.launch_child(dispatcher, true, move |scope| async move {
            let value = f(scope).await?;
            let _ = tx.send(value);
            Ok(())
        });
        Compute::new(job, rx)
    }

    // === Nested structured regions ===

    /// Opens an inline structured region: a fresh job whose body runs right
    /// here, returning only after every transitively launched child is
    /// terminal.
    ///
    /// The body's value comes back on success; a failure propagated from any
    /// child (or the body itself) is re-raised as `Err(Failed)`, after the
    /// rest of the region has been cancelled and torn down. The region's
    /// outcome is delivered here and only here — it does not additionally
    /// escalate through the job tree.
    pub async fn scope<T, F, Fut>(&self, f: F) -> Result<T, JobError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        self.scope_with(ScopeOptions::new(), f).await
    }

    /// [`Scope::scope`] with options: supervisor discipline, context
    /// additions, dispatcher override, uncaught-failure handler.
    pub async fn scope_with<T, F, Fut>(&self, opts: ScopeOptions, f: F) -> Result<T, JobError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let job = Job::scope_of(&self.job, opts.kind, opts.handler);
        let inner = Scope {
            job: job.clone(),
            cx: self.cx.compose(&opts.additions),
            dispatcher: opts.dispatcher.unwrap_or_else(|| self.dispatcher.clone()),
            shielded: self.shielded,
        };
        let res = f(inner).await;
        finish_scope(&job, res).await
    }

    /// Races an inline structured region against a timer.
    ///
    /// On expiry the region is cancelled with `TimedOut`, the body is driven
    /// until it observes the signal and every child is terminal, and the
    /// caller gets `Err(JobError::TimedOut)`. A body finishing first simply
    /// drops the timer.
    pub async fn timeout<T, F, Fut>(&self, after: Duration, f: F) -> Result<T, JobError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let job = Job::scope_of(&self.job, JobKind::Normal, None);
        let inner = Scope {
            job: job.clone(),
            cx: self.cx.clone(),
            dispatcher: self.dispatcher.clone(),
            // The timer must be able to interrupt even inside a shielded
            // region; it cancels its own job, not the enclosing one.
            shielded: false,
        };
        let body = f(inner);
        tokio::pin!(body);

        let raced = tokio::select! {
            res = body.as_mut() => Some(res),
            () = tokio::time::sleep(after) => None,
        };
        let res = match raced {
            Some(res) => res,
            None => {
                job.cancel(CancelCause::TimedOut { after });
                // Cooperative unwind: the body surfaces the cancellation at
                // its next suspension point.
                let _ = body.as_mut().await;
                Err(JobError::TimedOut { after })
            }
        };
        finish_scope(&job, res).await
    }

    /// Runs `f` with a shielded scope: the region's suspension points ignore
    /// the cancel signal until `f` returns. Cancellation is deferred, not
    /// discarded — the job still turns `Cancelling` and its terminal state
    /// waits for the region.
    pub async fn uninterruptible<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T>,
    {
        let shielded = Scope {
            shielded: true,
            ..self.clone()
        };
        f(shielded).await
    }

    // === Suspension points ===

    /// Suspends for `duration`, or until the owning job is cancelled —
    /// whichever comes first. Inside a shielded region the full duration
    /// always elapses.
    pub async fn delay(&self, duration: Duration) -> Result<(), JobError> {
        if self.shielded {
            tokio::time::sleep(duration).await;
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.job.cancelled_signal() => Err(self.cancelled()),
        }
    }

    /// Non-suspending cancellation check for compute loops without natural
    /// suspension points.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if !self.shielded && self.job.token().is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    /// Yields to the scheduler, then checks for cancellation.
    pub async fn yield_now(&self) -> Result<(), JobError> {
        tokio::task::yield_now().await;
        self.checkpoint()
    }

    /// A chained token can fire before this job adopts a local cause; the
    /// signal then necessarily came from above.
    fn cancelled(&self) -> JobError {
        JobError::Cancelled(self.job.cancel_cause().unwrap_or(CancelCause::ParentCancelled))
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("job", &self.job)
            .field("context", &self.cx)
            .field("dispatcher", &self.dispatcher.name())
            .field("shielded", &self.shielded)
            .finish()
    }
}

/// Seals a structured region: records the body's result on the region's
/// job, forces still-lazy children so completion cannot wait on a body that
/// would never run, waits for the whole subtree, and maps the terminal
/// outcome back to the caller.
pub(crate) async fn finish_scope<T>(job: &Job, res: Result<T, JobError>) -> Result<T, JobError> {
    let body_res = match &res {
        Ok(_) => Ok(()),
        Err(err) => Err(err.clone()),
    };
    job.start_lazy_children();
    job.complete_body(body_res);
    job.wait_terminal().await;

    match job.outcome() {
        Some(Outcome::Completed) => res,
        Some(Outcome::Cancelled(CancelCause::Failure(fault))) => Err(JobError::Failed(fault)),
        Some(Outcome::Cancelled(cause)) => match res {
            // The body already carries the more precise error.
            Err(err) => Err(err),
            Ok(_) => Err(JobError::Cancelled(cause)),
        },
        None => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::job::JobState;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn root_scope(kind: JobKind) -> (Job, Scope) {
        let job = Job::root(kind, Bus::new(256), None);
        let scope = Scope::new(job.clone(), ContextMap::new(), Dispatcher::pool("test", 4));
        (job, scope)
    }

    #[tokio::test]
    async fn scope_returns_only_after_children_terminal() {
        let (_root, s) = root_scope(JobKind::Normal);
        let done = Arc::new(AtomicBool::new(false));
        let child_slot = Arc::new(Mutex::new(None::<Job>));

        let d = done.clone();
        let slot = child_slot.clone();
        let res = s
            .scope(move |inner| async move {
                let child = inner.launch(move |_| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    d.store(true, Ordering::SeqCst);
                    Ok(())
                });
                slot.lock().unwrap().replace(child);
                // The body returns immediately; the region must still wait.
                Ok(())
            })
            .await;

        assert!(res.is_ok());
        assert!(done.load(Ordering::SeqCst));
        let child = child_slot.lock().unwrap().take().expect("child launched");
        assert_eq!(child.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn scope_waits_for_transitive_grandchildren() {
        let (_root, s) = root_scope(JobKind::Normal);
        let leaf_done = Arc::new(AtomicBool::new(false));
        let leaf_slot = Arc::new(Mutex::new(None::<Job>));

        let d = leaf_done.clone();
        let slot = leaf_slot.clone();
        let res = s
            .scope(move |inner| async move {
                inner.launch(move |child| async move {
                    let leaf = child.launch(move |_| async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        d.store(true, Ordering::SeqCst);
                        Ok(())
                    });
                    slot.lock().unwrap().replace(leaf);
                    // The intermediate body returns while its own child is
                    // still running.
                    Ok(())
                });
                Ok(())
            })
            .await;

        assert!(res.is_ok());
        assert!(leaf_done.load(Ordering::SeqCst));
        let leaf = leaf_slot.lock().unwrap().take().expect("grandchild launched");
        assert_eq!(leaf.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn failing_child_cancels_siblings_and_reraises() {
        let (_root, s) = root_scope(JobKind::Normal);
        let sibling_done = Arc::new(AtomicBool::new(false));

        let sd = sibling_done.clone();
        let res: Result<(), JobError> = s
            .scope(move |inner| async move {
                inner.launch(|scope| async move {
                    scope.delay(Duration::from_millis(5)).await?;
                    Err(JobError::fail("boom"))
                });
                let b = inner.launch(move |scope| async move {
                    scope.delay(Duration::from_millis(500)).await?;
                    sd.store(true, Ordering::SeqCst);
                    Ok(())
                });
                // B's cancellation is silent at join; the region's failure
                // is what reaches the caller.
                b.join().await?;
                Ok(())
            })
            .await;

        match res {
            Err(JobError::Failed(fault)) => assert_eq!(fault.message(), "boom"),
            other => panic!("expected the propagated failure, got {other:?}"),
        }
        assert!(!sibling_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn supervisor_scope_isolates_failure() {
        let (_root, s) = root_scope(JobKind::Normal);
        let caught = Arc::new(AtomicUsize::new(0));
        let sibling_done = Arc::new(AtomicBool::new(false));

        let c = caught.clone();
        let opts = ScopeOptions::new().supervisor().on_uncaught(move |_id, fault| {
            assert_eq!(fault.message(), "boom");
            c.fetch_add(1, Ordering::SeqCst);
        });

        let sd = sibling_done.clone();
        let res = s
            .scope_with(opts, move |inner| async move {
                inner.launch(|scope| async move {
                    scope.delay(Duration::from_millis(5)).await?;
                    Err(JobError::fail("boom"))
                });
                inner.launch(move |scope| async move {
                    scope.delay(Duration::from_millis(20)).await?;
                    sd.store(true, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            })
            .await;

        assert!(res.is_ok());
        assert!(sibling_done.load(Ordering::SeqCst));
        assert_eq!(caught.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn silent_cancellation_stays_in_its_subtree() {
        let (_root, s) = root_scope(JobKind::Normal);
        let sibling_done = Arc::new(AtomicBool::new(false));

        let sd = sibling_done.clone();
        let res = s
            .scope(move |inner| async move {
                let a = inner.launch(|scope| async move {
                    scope.job().cancel(CancelCause::requested());
                    scope.checkpoint()?;
                    Ok(())
                });
                let b = inner.launch(move |scope| async move {
                    scope.delay(Duration::from_millis(10)).await?;
                    sd.store(true, Ordering::SeqCst);
                    Ok(())
                });
                a.join().await?;
                b.join().await?;
                Ok(())
            })
            .await;

        assert!(res.is_ok());
        assert!(sibling_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_interrupts_delay() {
        let (_root, s) = root_scope(JobKind::Normal);
        let res = s
            .scope(|inner| async move {
                let child = inner.launch(|scope| async move {
                    scope.delay(Duration::from_secs(30)).await?;
                    Ok(())
                });
                tokio::time::sleep(Duration::from_millis(10)).await;
                child.cancel(CancelCause::requested());
                child.join().await?;
                assert_eq!(child.state(), JobState::Cancelled);
                Ok(())
            })
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_observes_cancellation() {
        let (_root, s) = root_scope(JobKind::Normal);
        let child = s.launch(|scope| async move {
            loop {
                scope.yield_now().await?;
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        child.cancel(CancelCause::requested());
        child.join().await.expect("silent cancellation");
        assert_eq!(child.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn uninterruptible_cleanup_runs_to_completion() {
        let (_root, s) = root_scope(JobKind::Normal);
        let cleaned = Arc::new(AtomicBool::new(false));

        let c = cleaned.clone();
        let child = s.launch(move |scope| async move {
            let work = scope.delay(Duration::from_secs(30)).await;
            if work.is_err() {
                scope
                    .uninterruptible(|shielded| async move {
                        let _ = shielded.delay(Duration::from_millis(50)).await;
                        c.store(true, Ordering::SeqCst);
                    })
                    .await;
            }
            work
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        child.cancel(CancelCause::requested());

        // Cleanup is still running: cancelling, not yet cancelled.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(child.state(), JobState::Cancelling);
        assert!(!cleaned.load(Ordering::SeqCst));

        child.join().await.expect("silent cancellation");
        assert_eq!(child.state(), JobState::Cancelled);
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_returns_value_when_body_wins() {
        let (_root, s) = root_scope(JobKind::Normal);
        let res = s
            .timeout(Duration::from_millis(200), |inner| async move {
                inner.delay(Duration::from_millis(5)).await?;
                Ok(42)
            })
            .await;
        assert_eq!(res.expect("body beat the timer"), 42);
    }

    #[tokio::test]
    async fn timeout_cancels_slow_body() {
        let (_root, s) = root_scope(JobKind::Normal);
        let res: Result<(), JobError> = s
            .timeout(Duration::from_millis(10), |inner| async move {
                inner.delay(Duration::from_secs(30)).await?;
                Ok(())
            })
            .await;
        match res {
            Err(JobError::TimedOut { after }) => assert_eq!(after, Duration::from_millis(10)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_tears_down_launched_children() {
        let (_root, s) = root_scope(JobKind::Normal);
        let late_work = Arc::new(AtomicBool::new(false));

        let lw = late_work.clone();
        let res: Result<(), JobError> = s
            .timeout(Duration::from_millis(10), move |inner| async move {
                inner.launch(move |scope| async move {
                    scope.delay(Duration::from_secs(30)).await?;
                    lw.store(true, Ordering::SeqCst);
                    Ok(())
                });
                inner.delay(Duration::from_secs(30)).await?;
                Ok(())
            })
            .await;

        assert!(matches!(res, Err(JobError::TimedOut { .. })));
        assert!(!late_work.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn compute_value_roundtrip() {
        let (_root, s) = root_scope(JobKind::Normal);
        let res = s
            .scope(|inner| async move {
                let half = inner.async_compute(|scope| async move {
                    scope.delay(Duration::from_millis(5)).await?;
                    Ok(21)
                });
                let v = half.await_value().await?;
                Ok(v * 2)
            })
            .await;
        assert_eq!(res.expect("computed"), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn compute_closure_moves_owned_state_across_threads() {
        let (_root, s) = root_scope(JobKind::Normal);
        let payload = String::from("owned");
        let c = s.async_compute(move |scope| async move {
            scope.yield_now().await?;
            Ok(payload.len())
        });
        assert_eq!(c.await_value().await.expect("computed"), 5);
    }

    #[tokio::test]
    async fn compute_failure_visible_under_supervisor() {
        let (_root, s) = root_scope(JobKind::Normal);
        let res: Result<(), JobError> = s
            .scope_with(ScopeOptions::new().supervisor(), |inner| async move {
                let c = inner.async_compute(|_| async move { Err::<u32, _>(JobError::fail("boom")) });
                match c.await_value().await {
                    Err(JobError::Failed(fault)) => {
                        assert_eq!(fault.message(), "boom");
                        Ok(())
                    }
                    other => panic!("direct handle must see the failure, got {other:?}"),
                }
            })
            .await;
        // The supervisor boundary kept the failure out of the region outcome.
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn lazy_child_stays_new_until_join() {
        let (_root, s) = root_scope(JobKind::Normal);
        let ran = Arc::new(AtomicBool::new(false));

        let r = ran.clone();
        let r2 = ran.clone();
        let res = s
            .scope(move |inner| async move {
                let lazy = inner.launch_lazy(move |_| async move {
                    r.store(true, Ordering::SeqCst);
                    Ok(())
                });
                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(lazy.state(), JobState::New);
                assert!(!r2.load(Ordering::SeqCst));
                lazy.join().await?;
                Ok(())
            })
            .await;

        assert!(res.is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn finishing_scope_forces_unstarted_lazy_children() {
        let (_root, s) = root_scope(JobKind::Normal);
        let ran = Arc::new(AtomicBool::new(false));

        let r = ran.clone();
        let res = s
            .scope(move |inner| async move {
                inner.launch_lazy(move |_| async move {
                    r.store(true, Ordering::SeqCst);
                    Ok(())
                });
                // Never started explicitly; sealing the region starts it.
                Ok(())
            })
            .await;

        assert!(res.is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn caught_scope_failure_leaves_caller_usable() {
        let (root, s) = root_scope(JobKind::Normal);

        let failed: Result<(), JobError> = s
            .scope(|inner| async move {
                inner.launch(|_| async move { Err(JobError::fail("boom")) });
                Ok(())
            })
            .await;
        assert!(matches!(failed, Err(JobError::Failed(_))));

        // The failure was delivered here, not escalated through the tree.
        assert!(root.is_active());
        let after = s.launch(|_| async move { Ok(()) });
        after.join().await.expect("caller still launches fine");
    }

    // === Pluggable context providers ===

    trait IdSource: Send + Sync {
        fn next_id(&self) -> String;
    }

    struct Ids(Arc<dyn IdSource>);

    struct UuidIds;

    impl IdSource for UuidIds {
        fn next_id(&self) -> String {
            uuid::Uuid::new_v4().to_string()
        }
    }

    struct SeqIds(AtomicU64);

    impl IdSource for SeqIds {
        fn next_id(&self) -> String {
            format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    async fn mint_pair(scope: &Scope) -> Result<(String, String), JobError> {
        let ids = scope.context().require::<Ids>()?;
        Ok((ids.0.next_id(), ids.0.next_id()))
    }

    #[tokio::test]
    async fn context_substitutes_id_provider() {
        let (_root, s) = root_scope(JobKind::Normal);

        let opts = ScopeOptions::new()
            .with_element(Arc::new(Ids(Arc::new(SeqIds(AtomicU64::new(0))))));
        let (a, b) = s
            .scope_with(opts, |inner| async move { mint_pair(&inner).await })
            .await
            .expect("deterministic source");
        assert_eq!((a.as_str(), b.as_str()), ("id-0", "id-1"));

        let opts = ScopeOptions::new().with_element(Arc::new(Ids(Arc::new(UuidIds))));
        let (a, b) = s
            .scope_with(opts, |inner| async move { mint_pair(&inner).await })
            .await
            .expect("uuid source");
        assert!(uuid::Uuid::parse_str(&a).is_ok());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn missing_required_element_fails_the_region() {
        let (_root, s) = root_scope(JobKind::Normal);
        let res = s
            .scope(|inner| async move { mint_pair(&inner).await })
            .await;
        match res {
            Err(JobError::Failed(fault)) => assert!(fault.message().contains("Ids")),
            other => panic!("expected a context failure, got {other:?}"),
        }
    }
}

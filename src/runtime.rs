//! # Runtime: explicit root of a job tree.
//!
//! Owns the shared infrastructure — the event [`Bus`], the subscriber
//! fan-out, and the default dispatcher — and opens root structured regions
//! with [`Runtime::run`]. Nothing here is process-global: two runtimes in
//! one process are fully independent, and every collaborator can be
//! injected.
//!
//! ```text
//! Runtime
//!   ├─ Bus ──► listener task ──► SubscriberSet ──► Subscribe impls
//!   ├─ Dispatcher (default worker pool)
//!   └─ run(f) ──► root Job ──► Scope ──► body
//! ```
//!
//! ## Rules
//! - `run` returns only after the root job's whole tree is terminal.
//! - The root body's value comes back on success; an escalated failure is
//!   re-raised as `Err(Failed)`.
//! - `shutdown` closes the default dispatcher and drains the subscriber
//!   queues; it does not cancel trees still running under other handles.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::context::ContextMap;
use crate::dispatch::Dispatcher;
use crate::error::JobError;
use crate::events::Bus;
use crate::job::Job;
use crate::scope::{finish_scope, Scope, ScopeOptions};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Root handle: shared bus, subscriber wiring, and the default dispatcher.
pub struct Runtime {
    bus: Bus,
    dispatcher: Dispatcher,
    listener: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl Runtime {
    /// Creates a runtime with no subscribers.
    ///
    /// Must be called within a tokio runtime (workers are spawned here).
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self::with_subscribers(cfg, Vec::new())
    }

    /// Creates a runtime and wires `subs` to the event bus through a
    /// [`SubscriberSet`] (per-subscriber bounded queues, panic isolation).
    pub fn with_subscribers(cfg: RuntimeConfig, subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        let dispatcher = if cfg.workers == 0 {
            Dispatcher::compute()
        } else {
            Dispatcher::pool("compute", cfg.workers)
        };

        let stop = CancellationToken::new();
        let listener = if subs.is_empty() {
            None
        } else {
            let set = SubscriberSet::new(subs, bus.clone());
            let mut rx = bus.subscribe();
            let halt = stop.clone();
            Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = halt.cancelled() => break,
                        res = rx.recv() => match res {
                            Ok(ev) => set.emit(&ev),
                            // Lagging loses events, never semantics.
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
                set.shutdown().await;
            }))
        };

        Self {
            bus,
            dispatcher,
            listener,
            stop,
        }
    }

    /// The event bus jobs under this runtime publish to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The default dispatcher for root regions.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Opens a root structured region with default options.
    ///
    /// Returns only after every transitively launched job is terminal; the
    /// body's value on success, the escalated failure otherwise.
    pub async fn run<T, F, Fut>(&self, f: F) -> Result<T, JobError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        self.run_with(ScopeOptions::new(), f).await
    }

    /// [`Runtime::run`] with options: supervisor discipline, initial context
    /// elements, dispatcher override, uncaught-failure handler.
    pub async fn run_with<T, F, Fut>(&self, opts: ScopeOptions, f: F) -> Result<T, JobError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let root = Job::root(opts.kind, self.bus.clone(), opts.handler);
        let dispatcher = opts.dispatcher.unwrap_or_else(|| self.dispatcher.clone());
        let cx = ContextMap::new().compose(&opts.additions);
        let scope = Scope::new(root.clone(), cx, dispatcher);
        let res = f(scope).await;
        finish_scope(&root, res).await
    }

    /// Graceful teardown: closes the default dispatcher (queued units still
    /// drain) and awaits the subscriber queues.
    pub async fn shutdown(self) {
        self.dispatcher.close();
        self.stop.cancel();
        if let Some(listener) = self.listener {
            let _ = listener.await;
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("dispatcher", &self.dispatcher.name())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Fault, JobError};
    use crate::events::{Event, EventKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn run_returns_the_body_value() {
        let rt = Runtime::new(RuntimeConfig::default());
        let res = rt.run(|_| async move { Ok(7) }).await;
        assert_eq!(res.expect("root succeeded"), 7);
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn run_reraises_an_escalated_child_failure() {
        let rt = Runtime::new(RuntimeConfig::default());
        let res: Result<(), JobError> = rt
            .run(|scope| async move {
                scope.launch(|_| async move { Err(JobError::fail("boom")) });
                Ok(())
            })
            .await;
        match res {
            Err(JobError::Failed(fault)) => assert_eq!(fault.message(), "boom"),
            other => panic!("expected the escalated failure, got {other:?}"),
        }
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn supervisor_root_contains_failures() {
        let caught = Arc::new(AtomicUsize::new(0));
        let c = caught.clone();
        let rt = Runtime::new(RuntimeConfig::default());
        let opts = ScopeOptions::new()
            .supervisor()
            .on_uncaught(move |_id, fault: &Fault| {
                assert_eq!(fault.message(), "boom");
                c.fetch_add(1, Ordering::SeqCst);
            });
        let res = rt
            .run_with(opts, |scope| async move {
                scope.launch(|_| async move { Err(JobError::fail("boom")) });
                scope.launch(|s| async move {
                    s.delay(Duration::from_millis(10)).await?;
                    Ok(())
                });
                Ok(())
            })
            .await;
        assert!(res.is_ok());
        assert_eq!(caught.load(Ordering::SeqCst), 1);
        rt.shutdown().await;
    }

    struct Recorder {
        completed: AtomicUsize,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            if event.kind == EventKind::JobCompleted {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn subscribers_observe_job_lifecycle() {
        let recorder = Arc::new(Recorder {
            completed: AtomicUsize::new(0),
        });
        let rt = Runtime::with_subscribers(RuntimeConfig::default(), vec![recorder.clone()]);

        let res = rt
            .run(|scope| async move {
                let child = scope.launch(|_| async move { Ok(()) });
                child.join().await?;
                Ok(())
            })
            .await;
        assert!(res.is_ok());

        rt.shutdown().await;
        // At least the launched child completed; the root completes too.
        assert!(recorder.completed.load(Ordering::SeqCst) >= 1);
    }
}

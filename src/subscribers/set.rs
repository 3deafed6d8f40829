//! # SubscriberSet: non-blocking fan-out over multiple subscribers.
//!
//! Distributes each [`Event`] to every subscriber **without awaiting** its
//! processing, and reports its own trouble through the same bus:
//! a dropped event publishes [`EventKind::SubscriberOverflow`], a panicking
//! subscriber publishes [`EventKind::SubscriberPanicked`].
//!
//! ## What it guarantees
//! - `emit(&Event)` returns immediately.
//! - Per-subscriber FIFO (queue order).
//! - Panics inside subscribers are caught, reported, and the worker keeps
//!   processing (isolation).
//!
//! ## What it does not guarantee
//! - No global ordering across different subscribers (use `Event::seq`).
//! - No retries on per-subscriber queue overflow; the event is dropped for
//!   that subscriber.
//!
//! ```text
//!    emit(&Event)
//!        │                        (Arc-clone per subscriber)
//!        ├────────────────► [queue S1] ─► worker S1 ─► on_event()
//!        ├────────────────► [queue S2] ─► worker S2 ─► on_event()
//!        └────────────────► [queue SN] ─► worker SN ─► on_event()
//!             │ try_send full/closed            │ panic caught
//!             ▼                                 ▼
//!        SubscriberOverflow ──► bus ◄── SubscriberPanicked
//! ```
//!
//! Subscriber-plumbing events that themselves fail to enqueue are dropped
//! silently — the overflow of an overflow report must not loop.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event, EventKind};

use super::Subscribe;

/// Per-subscriber channel with metadata.
struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Composite fan-out with per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker per subscriber; `bus` is
    /// where the set publishes its own overflow and panic reports.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);
            let s = Arc::clone(&sub);
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = s.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        worker_bus.publish(
                            Event::now(EventKind::SubscriberPanicked)
                                .with_dispatcher(s.name())
                                .with_reason(panic_message(panic_err.as_ref())),
                        );
                    }
                }
            });

            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Fans one event out to all subscribers (non-blocking).
    ///
    /// If a subscriber's queue is full or closed, the event is dropped for
    /// it and a [`EventKind::SubscriberOverflow`] is published — unless the
    /// dropped event is itself subscriber plumbing, which is never
    /// re-reported.
    pub fn emit(&self, event: &Event) {
        let plumbing = matches!(
            event.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        );
        let ev = Arc::new(event.clone());
        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "queue full",
                Err(mpsc::error::TrySendError::Closed(_)) => "worker closed",
            };
            if !plumbing {
                self.bus.publish(
                    Event::now(EventKind::SubscriberOverflow)
                        .with_dispatcher(channel.name)
                        .with_reason(reason),
                );
            }
        }
    }

    /// Graceful shutdown: close all queues and await worker completion.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

fn panic_message(panic_err: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic_err.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic_err.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Recorder {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, _event: &Event) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn events_reach_every_subscriber_in_order() {
        let a = Arc::new(Recorder {
            seen: AtomicUsize::new(0),
        });
        let b = Arc::new(Recorder {
            seen: AtomicUsize::new(0),
        });
        let set = SubscriberSet::new(vec![a.clone(), b.clone()], Bus::new(64));

        for _ in 0..5 {
            set.emit(&Event::now(EventKind::JobLaunched));
        }
        set.shutdown().await;

        assert_eq!(a.seen.load(Ordering::SeqCst), 5);
        assert_eq!(b.seen.load(Ordering::SeqCst), 5);
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _event: &Event) {
            panic!("subscriber blew up");
        }

        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_is_reported_on_the_bus() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Panicker)], bus);

        set.emit(&Event::now(EventKind::JobLaunched));
        set.shutdown().await;

        let ev = rx.recv().await.expect("panic report published");
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.dispatcher.as_deref(), Some("panicker"));
        assert_eq!(ev.reason.as_deref(), Some("subscriber blew up"));
    }

    struct Sleeper;

    #[async_trait]
    impl Subscribe for Sleeper {
        async fn on_event(&self, _event: &Event) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        fn name(&self) -> &'static str {
            "sleeper"
        }

        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn overflowing_queue_is_reported_on_the_bus() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Sleeper)], bus);

        // One event in flight, one queued; the rest must overflow.
        for _ in 0..5 {
            set.emit(&Event::now(EventKind::JobLaunched));
        }

        let ev = rx.recv().await.expect("overflow report published");
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.dispatcher.as_deref(), Some("sleeper"));
        assert_eq!(ev.reason.as_deref(), Some("queue full"));
    }
}

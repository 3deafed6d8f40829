//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] providing
//! non-blocking publishing from many sources (every job in the tree holds a
//! clone) to the runtime's single listener, which fans events out to user
//! subscribers.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks or awaits.
//! - **Bounded capacity**: a ring buffer of recent events shared by all
//!   receivers; slow receivers observe `RecvError::Lagged(n)`.
//! - **No persistence**: events published with no live receiver are dropped.
//!   Runtime semantics never depend on delivery.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally an `Arc`-backed sender); clones publish into
/// the same channel.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to ≥ 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers the event is dropped; the call still
    /// returns immediately.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates an independent receiver observing subsequent events only.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

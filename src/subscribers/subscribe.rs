//! # Core subscriber trait.
//!
//! `Subscribe` is the extension point for plugging custom event handlers
//! into the runtime. Each subscriber is driven by a dedicated worker loop fed
//! by a bounded queue owned by the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching) — they block neither the
//!   publishing job nor other subscribers.
//! - Each subscriber declares its preferred queue capacity via
//!   [`Subscribe::queue_capacity`]; on overflow, events for that subscriber
//!   are dropped.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should
/// avoid blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    ///
    /// On overflow, events for this subscriber are dropped.
    fn queue_capacity(&self) -> usize {
        1024
    }
}

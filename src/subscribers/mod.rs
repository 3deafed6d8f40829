//! Subscriber extension point and fan-out machinery.
//!
//! Implement [`Subscribe`] to observe runtime events; the
//! [`Runtime`](crate::Runtime) wires a [`SubscriberSet`] to the event bus so
//! slow subscribers never block jobs or each other.

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;

//! Runtime events and the broadcast bus carrying them.
//!
//! Jobs publish lifecycle events ([`Event`]/[`EventKind`]) to a shared
//! [`Bus`]; the [`Runtime`](crate::Runtime) subscribes once and fans events
//! out to user subscribers.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};

//! Structured scopes: the composition point tying jobs, dispatchers, and
//! context together.
//!
//! A [`Scope`] is handed to every job body; it is the capability to launch
//! children, open nested scopes, and reach the suspension points through
//! which cancellation is delivered.

mod compute;
#[allow(clippy::module_inception)]
mod scope;

pub use compute::Compute;
pub use scope::{Scope, ScopeOptions};

pub(crate) use scope::finish_scope;

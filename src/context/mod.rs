//! Typed, immutable context propagation.
//!
//! A [`ContextMap`] carries per-subtree configuration down the job tree:
//! every scope composes its parent's map with its own additions, and
//! descendants look elements up by type. See [`map`] for the data structure.

mod map;

pub use map::{ContextMap, Element};

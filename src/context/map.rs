//! # ContextMap: immutable typed map for per-subtree configuration.
//!
//! An association from a type (the key) to a shared element value. Scopes
//! extend the map functionally on entry; the map itself is never mutated in
//! place, so reads are race-free by construction.
//!
//! ## Rules
//! - **Functional extension**: [`ContextMap::attach`] and
//!   [`ContextMap::compose`] return a new map; existing maps are unaffected.
//! - **Nearest-enclosing lookup**: composing maps shadows colliding keys with
//!   the right-hand side, so a lookup sees the innermost attachment.
//! - **Elements are shared, not cloned**: composition copies the mapping of
//!   keys to `Arc`s, never the elements. An element with interior mutability
//!   (an atomic counter, say) is one object observed by the whole subtree
//!   that inherited its entry.
//!
//! ## Pluggable strategies
//! Attaching a trait object (wrapped in a concrete element type) at scope
//! entry lets production code and tests substitute implementations without
//! touching the logic under test — a deterministic id source in tests, a real
//! one in production. A caller that cannot proceed without an element asserts
//! with [`ContextMap::require`], which produces a descriptive
//! [`ContextError::Missing`] instead of a bare `None`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ContextError;

/// Marker for values that can live in a [`ContextMap`].
///
/// Blanket-implemented for every `Any + Send + Sync` type; the bound exists
/// to name the role in signatures.
pub trait Element: Any + Send + Sync {}

impl<T: Any + Send + Sync> Element for T {}

/// Immutable mapping from an element type to a shared element instance.
///
/// Cheap to clone (the entry table is behind an `Arc`); every extension
/// allocates a fresh table.
#[derive(Clone, Default)]
pub struct ContextMap {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ContextMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new map with `element` attached, shadowing any existing
    /// element of the same type.
    #[must_use]
    pub fn attach<E: Element>(&self, element: Arc<E>) -> Self {
        let mut entries: HashMap<_, _> = (*self.entries).clone();
        entries.insert(TypeId::of::<E>(), element as Arc<dyn Any + Send + Sync>);
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Returns a new map combining `self` and `rhs`; on key collision the
    /// right-hand side's entry shadows this map's.
    #[must_use]
    pub fn compose(&self, rhs: &ContextMap) -> Self {
        if rhs.entries.is_empty() {
            return self.clone();
        }
        if self.entries.is_empty() {
            return rhs.clone();
        }
        let mut entries: HashMap<_, _> = (*self.entries).clone();
        for (k, v) in rhs.entries.iter() {
            entries.insert(*k, Arc::clone(v));
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Looks up the nearest enclosing element of type `E`, or `None`.
    pub fn lookup<E: Element>(&self) -> Option<Arc<E>> {
        self.entries
            .get(&TypeId::of::<E>())
            .cloned()
            .and_then(|any| any.downcast::<E>().ok())
    }

    /// Looks up a mandatory element, failing fast with a descriptive error
    /// when it is absent.
    pub fn require<E: Element>(&self) -> Result<Arc<E>, ContextError> {
        self.lookup::<E>().ok_or(ContextError::Missing {
            key: std::any::type_name::<E>(),
        })
    }

    /// Number of attached elements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no elements are attached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ContextMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}

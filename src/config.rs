//! Runtime configuration.

/// Configuration for [`Runtime`](crate::Runtime).
///
/// All fields have working defaults; construct with struct-update syntax:
///
/// ```rust
/// use jobscope::RuntimeConfig;
///
/// let cfg = RuntimeConfig {
///     workers: 8,
///     ..RuntimeConfig::default()
/// };
/// assert_eq!(cfg.bus_capacity, 1024);
/// ```
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Worker count of the default dispatcher. `0` means one worker per
    /// available core.
    pub workers: usize,

    /// Capacity of the event bus ring buffer. Slow event listeners observe
    /// lag beyond this; job semantics are unaffected.
    pub bus_capacity: usize,
}

impl Default for RuntimeConfig {
    /// Defaults:
    /// - `workers`: `0` (one per available core)
    /// - `bus_capacity`: `1024`
    fn default() -> Self {
        Self {
            workers: 0,
            bus_capacity: 1024,
        }
    }
}

use serde::{Deserialize, Serialize};

/// Behavior flags for a cache.
///
/// A [`Registry`](crate::Registry) carries one of these as the default for all
/// its caches; individual registrations can override single flags. Everything
/// defaults to off, which yields plain read-through behavior: misses wait for
/// the computation, every request does its own work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Serve expired entries immediately and refresh them in the background
    /// instead of making the request wait for the recomputation.
    pub use_after_stale: bool,
    /// Collapse concurrent `get`s for the same key into a single lookup.
    pub collapse_gets: bool,
    /// Collapse concurrent `fetch`es for the same key into a single
    /// computation.
    pub collapse_fetches: bool,
}

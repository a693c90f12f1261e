use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;

/// An operation measured with a `started` / `success`|`error` / `finished`
/// event triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A store read.
    Read,
    /// A store write.
    Write,
    /// A full request resolution.
    Get,
    /// A recompute-and-persist pipeline.
    Fetch,
    /// A `get` that attached to one already in flight for the same key.
    CollapsedGet,
    /// A `fetch` that attached to one already in flight for the same key.
    CollapsedFetch,
}

impl Operation {
    /// The operation name as it appears in event and metric names.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Get => "get",
            Operation::Fetch => "fetch",
            Operation::CollapsedGet => "collapsed_get",
            Operation::CollapsedFetch => "collapsed_fetch",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The event-specific payload of a [`CacheEvent`].
///
/// `started` carries no timing; all other kinds carry the elapsed wall-clock
/// time since their operation began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// An operation is about to start.
    Started { operation: Operation },
    /// An operation completed with a value.
    Success { operation: Operation, elapsed: Duration },
    /// An operation completed with an error.
    Failed { operation: Operation, elapsed: Duration },
    /// An operation completed; emitted after [`Success`](Self::Success) or
    /// [`Failed`](Self::Failed), regardless of outcome.
    Finished { operation: Operation, elapsed: Duration },
    /// A `get` was resolved from a stored entry.
    Hit {
        /// Whether the entry was already expired when it was served.
        stale: bool,
        ttl: i64,
        /// Store-reported identifier of where the entry came from.
        source: String,
        elapsed: Duration,
    },
    /// A `get` found no servable entry and delegates to a fetch.
    Miss { elapsed: Duration },
    /// The backing store itself failed.
    Error { error: CacheError, elapsed: Duration },
}

impl EventKind {
    /// The event name, e.g. `read_started`, `collapsed_fetch_error`, `hit`.
    pub fn name(&self) -> String {
        match self {
            EventKind::Started { operation } => format!("{operation}_started"),
            EventKind::Success { operation, .. } => format!("{operation}_success"),
            EventKind::Failed { operation, .. } => format!("{operation}_error"),
            EventKind::Finished { operation, .. } => format!("{operation}_finished"),
            EventKind::Hit { .. } => "hit".into(),
            EventKind::Miss { .. } => "miss".into(),
            EventKind::Error { .. } => "error".into(),
        }
    }
}

/// A single instrumentation event.
///
/// Every event identifies the cache it belongs to, the derived (unprefixed)
/// cache key, and the request parameters that triggered the operation.
#[derive(Debug)]
pub struct CacheEvent<P> {
    pub cache_name: Arc<str>,
    pub cache_key: Arc<str>,
    pub parameters: Arc<P>,
    pub kind: EventKind,
}

// Manual Clone, as the derive would put a `Clone` bound on `P`.
// https://github.com/rust-lang/rust/issues/26925
impl<P> Clone for CacheEvent<P> {
    fn clone(&self) -> Self {
        Self {
            cache_name: Arc::clone(&self.cache_name),
            cache_key: Arc::clone(&self.cache_key),
            parameters: Arc::clone(&self.parameters),
            kind: self.kind.clone(),
        }
    }
}

/// Receives every instrumentation event emitted by a cache.
///
/// A sink is injected into a [`Registry`](crate::Registry) and shared by all
/// caches registered on it. Events are emitted synchronously on the request
/// path, so implementations must be cheap and must not block.
pub trait EventSink<P>: Send + Sync {
    fn emit(&self, event: CacheEvent<P>);
}

impl<P, S> EventSink<P> for Arc<S>
where
    S: EventSink<P> + ?Sized,
{
    fn emit(&self, event: CacheEvent<P>) {
        (**self).emit(event)
    }
}

/// A sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl<P> EventSink<P> for NullSink {
    fn emit(&self, _event: CacheEvent<P>) {}
}

/// Logs every event through [`tracing`].
///
/// Routine events go to TRACE; operation failures and store errors go to WARN.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl<P: fmt::Debug> EventSink<P> for TracingSink {
    fn emit(&self, event: CacheEvent<P>) {
        match &event.kind {
            EventKind::Error { error, .. } => {
                tracing::warn!(
                    cache = %event.cache_name,
                    key = %event.cache_key,
                    params = ?event.parameters,
                    "cache store error: {error}",
                );
            }
            EventKind::Failed { operation, elapsed } => {
                tracing::warn!(
                    cache = %event.cache_name,
                    key = %event.cache_key,
                    elapsed = ?elapsed,
                    "cache operation `{operation}` failed",
                );
            }
            kind => {
                tracing::trace!(
                    cache = %event.cache_name,
                    key = %event.cache_key,
                    "cache event `{}`",
                    kind.name(),
                );
            }
        }
    }
}

use thiserror::Error;

/// An error resolving a cache operation.
///
/// This enum is intentionally closed and cheap to clone: outcomes of collapsed
/// operations are broadcast to every attached waiter, so errors have to travel
/// through shared channels just like values do. Misses and expirations are not
/// errors at all; they drive the read decision internally and never show up
/// here. A `get` can only fail because producing a fresh value failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The compute function failed to produce a fresh value.
    ///
    /// The attached string contains the formatted error chain.
    #[error("compute failed: {0}")]
    Compute(String),
    /// A backing store read or write failed.
    ///
    /// On reads this is reported through the event surface and then treated as
    /// a miss; on writes the computed value is still served.
    #[error("store operation failed: {0}")]
    Store(String),
    /// An in-flight operation went away without delivering an outcome.
    ///
    /// This can only happen if the task driving the operation dies, e.g. due
    /// to a panic in the compute function.
    #[error("in-flight operation was dropped")]
    Dropped,
}

impl CacheError {
    pub(crate) fn compute(err: anyhow::Error) -> Self {
        Self::Compute(format!("{err:#}"))
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_the_full_anyhow_chain() {
        let err = anyhow::anyhow!("connection reset").context("redis get");
        assert_eq!(
            CacheError::store(err),
            CacheError::Store("redis get: connection reset".into())
        );
    }
}

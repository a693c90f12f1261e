use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A freshly computed value together with its declared lifetime.
///
/// This is what a [`Compute`](crate::Compute) implementation produces and what
/// gets handed to the store verbatim, so it carries serde derives as the
/// persisted wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshValue<V> {
    pub data: V,
    /// Declared remaining lifetime in seconds at the moment of computation.
    pub ttl: i64,
}

impl<V> FreshValue<V> {
    pub fn new(data: V, ttl: i64) -> Self {
        Self { data, ttl }
    }
}

/// An entry as reported back by the store.
///
/// The `ttl` is the remaining lifetime computed by the store at read time. It
/// is signed on purpose: a value `<= 0` means the entry is expired but still
/// physically present, which is what makes stale-serving possible at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry<V> {
    pub data: V,
    /// Remaining lifetime in seconds; `<= 0` means expired.
    pub ttl: i64,
    /// Store-reported identifier of where the entry was served from.
    pub source: String,
}

/// Where the value resolving a `get` came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Served from the backing store, carrying the store-reported identifier.
    Store(String),
    /// Freshly computed because no servable entry existed.
    Computed,
}

/// The resolution of a single `get` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue<V> {
    pub data: V,
    /// Remaining lifetime of the served entry, or the declared lifetime if the
    /// value was just computed.
    pub ttl: i64,
    pub source: ValueSource,
    /// Wall-clock time it took to resolve this request.
    pub time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_value_roundtrips_through_json() {
        let value = FreshValue::new(vec!["a".to_string(), "b".to_string()], 300);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(serde_json::from_str::<FreshValue<Vec<String>>>(&json).unwrap(), value);
    }
}

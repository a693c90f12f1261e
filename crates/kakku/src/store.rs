use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::{FreshValue, StoredEntry};

/// The contract a backing key-value store has to fulfill.
///
/// The store owns all expiry bookkeeping: `get` reports the remaining lifetime
/// of an entry as a signed number of seconds, where `<= 0` means the entry is
/// expired but still present. Whether and when expired entries are actually
/// evicted is the store's own policy; this layer only interprets the reported
/// lifetime.
///
/// Implementations can bubble up any error through [`anyhow`]; failures are
/// classified as store errors and handled by the read/write paths.
pub trait Store<V>: Send + Sync {
    /// Reads the entry stored under `key`.
    ///
    /// Absence of an entry is `Ok(None)`, never an error.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredEntry<V>>>>
    where
        V: 'a;

    /// Writes `value` under `key`, replacing any previous entry wholesale.
    fn set<'a>(&'a self, key: &'a str, value: FreshValue<V>) -> BoxFuture<'a, Result<()>>
    where
        V: 'a;
}

impl<V, S> Store<V> for Arc<S>
where
    S: Store<V> + ?Sized,
{
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredEntry<V>>>>
    where
        V: 'a,
    {
        (**self).get(key)
    }

    fn set<'a>(&'a self, key: &'a str, value: FreshValue<V>) -> BoxFuture<'a, Result<()>>
    where
        V: 'a,
    {
        (**self).set(key, value)
    }
}

/// An in-memory [`Store`] that round-trips values through JSON.
///
/// Entries are kept beyond their declared lifetime, so stale values stay
/// servable and the reported remaining lifetime simply goes negative. Values
/// are serialized on write and deserialized on read, which gives the same
/// deep-copy semantics as an out-of-process store.
///
/// Intended for tests and for small processes that do not need a real backend.
#[derive(Debug)]
pub struct MemoryStore {
    source: String,
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct MemoryEntry {
    payload: Vec<u8>,
    ttl: i64,
    stored_at: Instant,
}

impl MemoryStore {
    /// Creates an empty store reporting `"memory"` as its source.
    pub fn new() -> Self {
        Self::with_source("memory")
    }

    /// Creates an empty store reporting the given source identifier.
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The number of entries currently held, including expired ones.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Store<V> for MemoryStore
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredEntry<V>>>>
    where
        V: 'a,
    {
        async move {
            let entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get(key) else {
                return Ok(None);
            };

            let data =
                serde_json::from_slice(&entry.payload).context("corrupted cache entry payload")?;
            let age = entry.stored_at.elapsed().as_secs() as i64;
            Ok(Some(StoredEntry {
                data,
                ttl: entry.ttl - age,
                source: self.source.clone(),
            }))
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: FreshValue<V>) -> BoxFuture<'a, Result<()>>
    where
        V: 'a,
    {
        async move {
            let payload =
                serde_json::to_vec(&value.data).context("unserializable cache value")?;
            let entry = MemoryEntry {
                payload,
                ttl: value.ttl,
                stored_at: Instant::now(),
            };
            self.entries.lock().unwrap().insert(key.to_owned(), entry);
            Ok(())
        }
        .boxed()
    }
}

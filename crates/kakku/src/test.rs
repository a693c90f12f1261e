//! Helpers for testing caches and their instrumentation.
//!
//! This module is compiled for this crate's own tests and, via the `test`
//! feature, for downstream test suites.

use std::sync::Mutex;

use anyhow::{Result, anyhow};
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::event::{CacheEvent, EventSink};
use crate::store::Store;
use crate::types::{FreshValue, StoredEntry};

/// Initializes a pretty tracing subscriber for test output.
///
/// Keeps going if a subscriber is already installed, so tests can call this
/// unconditionally.
pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("kakku=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Records every event it receives, in emission order.
pub struct RecordingSink<P> {
    events: Mutex<Vec<CacheEvent<P>>>,
}

impl<P> Default for RecordingSink<P> {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl<P> RecordingSink<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events.
    pub fn events(&self) -> Vec<CacheEvent<P>> {
        self.events.lock().unwrap().clone()
    }

    /// The recorded event names.
    pub fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.kind.name()).collect()
    }

    /// How many events with the given name were recorded.
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind.name() == name).count()
    }
}

impl<P> EventSink<P> for RecordingSink<P>
where
    P: Send + Sync,
{
    fn emit(&self, event: CacheEvent<P>) {
        self.events.lock().unwrap().push(event);
    }
}

/// Wraps a store and fails operations on demand.
///
/// A scheduled failure applies to the next matching operation only; the store
/// behaves normally again afterwards.
pub struct FlakyStore<S> {
    inner: S,
    fail_get: Mutex<Option<String>>,
    fail_set: Mutex<Option<String>>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_get: Mutex::new(None),
            fail_set: Mutex::new(None),
        }
    }

    /// Makes the next read fail with the given message.
    pub fn fail_next_get(&self, message: impl Into<String>) {
        *self.fail_get.lock().unwrap() = Some(message.into());
    }

    /// Makes the next write fail with the given message.
    pub fn fail_next_set(&self, message: impl Into<String>) {
        *self.fail_set.lock().unwrap() = Some(message.into());
    }
}

impl<V, S> Store<V> for FlakyStore<S>
where
    S: Store<V>,
    V: Send,
{
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredEntry<V>>>>
    where
        V: 'a,
    {
        match self.fail_get.lock().unwrap().take() {
            Some(message) => future::ready(Err(anyhow!(message))).boxed(),
            None => self.inner.get(key),
        }
    }

    fn set<'a>(&'a self, key: &'a str, value: FreshValue<V>) -> BoxFuture<'a, Result<()>>
    where
        V: 'a,
    {
        match self.fail_set.lock().unwrap().take() {
            Some(message) => future::ready(Err(anyhow!(message))).boxed(),
            None => self.inner.set(key, value),
        }
    }
}

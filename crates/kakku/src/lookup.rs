use std::sync::Arc;
use std::time::Instant;

use crate::cache::Cache;
use crate::error::CacheError;
use crate::event::EventKind;
use crate::types::{CacheValue, StoredEntry, ValueSource};

/// Classification of a completed store read.
///
/// This is the single dispatch point of the read path: every variant maps to
/// exactly one resolution strategy.
#[derive(Debug)]
enum ReadState<V> {
    /// A servable entry with remaining lifetime.
    Fresh(StoredEntry<V>),
    /// An entry that is still present but past its lifetime (`ttl <= 0`).
    Stale(StoredEntry<V>),
    /// No entry under this key.
    Missing,
    /// The store failed to answer.
    Failed(CacheError),
}

fn classify<V>(outcome: Result<Option<StoredEntry<V>>, CacheError>) -> ReadState<V> {
    match outcome {
        Ok(Some(entry)) if entry.ttl > 0 => ReadState::Fresh(entry),
        Ok(Some(entry)) => ReadState::Stale(entry),
        Ok(None) => ReadState::Missing,
        Err(error) => ReadState::Failed(error),
    }
}

/// A single request being resolved against the store.
///
/// Reads the entry, classifies the outcome, and either serves it, delegates
/// to a fetch, or does both: serving the stale entry right away while a
/// detached fetch refreshes it.
pub(crate) struct Lookup<P, V> {
    cache: Cache<P, V>,
    key: Arc<str>,
    parameters: Arc<P>,
    started: Instant,
}

impl<P, V> Lookup<P, V>
where
    P: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Cache<P, V>, key: Arc<str>, parameters: Arc<P>) -> Self {
        Self {
            cache,
            key,
            parameters,
            started: Instant::now(),
        }
    }

    pub async fn run(self) -> Result<CacheValue<V>, CacheError> {
        let outcome = self.cache.read(&self.key, &self.parameters).await;

        match classify(outcome) {
            ReadState::Fresh(entry) => Ok(self.hit(entry, false)),
            ReadState::Stale(entry) => self.stale(entry).await,
            ReadState::Missing => self.miss().await,
            ReadState::Failed(error) => {
                self.emit(EventKind::Error {
                    error,
                    elapsed: self.started.elapsed(),
                });
                self.miss().await
            }
        }
    }

    /// Serves `entry` to the caller, emitting the `hit` event.
    fn hit(&self, entry: StoredEntry<V>, stale: bool) -> CacheValue<V> {
        let elapsed = self.started.elapsed();
        self.emit(EventKind::Hit {
            stale,
            ttl: entry.ttl,
            source: entry.source.clone(),
            elapsed,
        });

        CacheValue {
            data: entry.data,
            ttl: entry.ttl,
            source: ValueSource::Store(entry.source),
            time: elapsed,
        }
    }

    /// Emits the `miss` event and waits for a fresh value.
    async fn miss(self) -> Result<CacheValue<V>, CacheError> {
        self.emit(EventKind::Miss {
            elapsed: self.started.elapsed(),
        });

        let fresh = self.cache.fetch(&self.key, &self.parameters).await?;
        Ok(CacheValue {
            data: fresh.data,
            ttl: fresh.ttl,
            source: ValueSource::Computed,
            time: self.started.elapsed(),
        })
    }

    /// Applies the stale policy: serve the entry right away and refresh it in
    /// the background, or treat it as a miss and wait for the fresh value.
    async fn stale(self, entry: StoredEntry<V>) -> Result<CacheValue<V>, CacheError> {
        if !self.cache.policy().use_after_stale {
            return self.miss().await;
        }

        // The refresh never rejoins this request: its outcome, including
        // failure, is only visible through the fetch instrumentation.
        let refresh = self.cache.fetch(&self.key, &self.parameters);
        tokio::spawn(async move {
            refresh.await.ok();
        });

        Ok(self.hit(entry, true))
    }

    fn emit(&self, kind: EventKind) {
        self.cache.emit(&self.key, &self.parameters, kind);
    }
}

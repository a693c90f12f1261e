use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::collapse::{Attachment, OperationQueue};
use crate::compute::Compute;
use crate::config::CachePolicy;
use crate::error::CacheError;
use crate::event::{CacheEvent, EventKind, EventSink, Operation};
use crate::lookup::Lookup;
use crate::store::Store;
use crate::types::{CacheValue, FreshValue, StoredEntry};

/// One named cache: a compute function, a backing store, and the policy that
/// decides how reads, fetches and concurrent requests are orchestrated.
///
/// Created through [`Registry::register`](crate::Registry::register). Cheap to
/// clone; all clones share the same in-flight operation tracking, which is
/// what makes collapsing work across concurrent requests.
pub struct Cache<P, V> {
    inner: Arc<CacheInner<P, V>>,
}

// Manual Clone, as the derive would put bounds on `P` and `V`.
// https://github.com/rust-lang/rust/issues/26925
impl<P, V> Clone for Cache<P, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<P, V> {
    name: Arc<str>,
    prefix: Arc<str>,
    compute: Arc<dyn Compute<P, V>>,
    store: Arc<dyn Store<V>>,
    sink: Arc<dyn EventSink<P>>,
    policy: CachePolicy,
    /// In-flight request resolutions, keyed by derived cache key.
    gets: OperationQueue<CacheValue<V>>,
    /// In-flight compute-and-persist pipelines, keyed by derived cache key.
    fetches: OperationQueue<FreshValue<V>>,
}

impl<P, V> Cache<P, V>
where
    P: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        name: Arc<str>,
        prefix: Arc<str>,
        compute: Arc<dyn Compute<P, V>>,
        store: Arc<dyn Store<V>>,
        sink: Arc<dyn EventSink<P>>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                name,
                prefix,
                compute,
                store,
                sink,
                policy,
                gets: OperationQueue::default(),
                fetches: OperationQueue::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn policy(&self) -> CachePolicy {
        self.inner.policy
    }

    /// The store-facing key, `prefix:cacheName:derivedKey`.
    fn full_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.inner.prefix, self.inner.name, key)
    }

    pub(crate) fn emit(&self, key: &Arc<str>, parameters: &Arc<P>, kind: EventKind) {
        self.inner.sink.emit(CacheEvent {
            cache_name: Arc::clone(&self.inner.name),
            cache_key: Arc::clone(key),
            parameters: Arc::clone(parameters),
            kind,
        });
    }

    /// Runs `work` wrapped in the measurement triplet: `started` before it
    /// begins, then exactly one of `success`/`error`, then always `finished`
    /// carrying the elapsed wall-clock time.
    async fn measure<T>(
        &self,
        operation: Operation,
        key: Arc<str>,
        parameters: Arc<P>,
        work: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        let start = Instant::now();
        self.emit(&key, &parameters, EventKind::Started { operation });

        let outcome = work.await;
        let elapsed = start.elapsed();

        match &outcome {
            Ok(_) => self.emit(&key, &parameters, EventKind::Success { operation, elapsed }),
            Err(_) => self.emit(&key, &parameters, EventKind::Failed { operation, elapsed }),
        }
        self.emit(&key, &parameters, EventKind::Finished { operation, elapsed });

        outcome
    }

    /// Reads the entry for `key` from the backing store.
    pub async fn read(
        &self,
        key: &Arc<str>,
        parameters: &Arc<P>,
    ) -> Result<Option<StoredEntry<V>>, CacheError> {
        let store = Arc::clone(&self.inner.store);
        let full_key = self.full_key(key);

        self.measure(Operation::Read, Arc::clone(key), Arc::clone(parameters), async move {
            store.get(&full_key).await.map_err(CacheError::store)
        })
        .await
    }

    /// Persists a freshly computed value under `key`.
    ///
    /// A store failure is returned to the caller and additionally emitted as a
    /// generic `error` event on top of the `write_*` triplet.
    pub async fn write(
        &self,
        key: &Arc<str>,
        parameters: &Arc<P>,
        value: FreshValue<V>,
    ) -> Result<(), CacheError> {
        let store = Arc::clone(&self.inner.store);
        let full_key = self.full_key(key);

        let start = Instant::now();
        let outcome = self
            .measure(Operation::Write, Arc::clone(key), Arc::clone(parameters), async move {
                store.set(&full_key, value).await.map_err(CacheError::store)
            })
            .await;

        if let Err(error) = &outcome {
            self.emit(
                key,
                parameters,
                EventKind::Error {
                    error: error.clone(),
                    elapsed: start.elapsed(),
                },
            );
        }

        outcome
    }

    /// Recomputes the value for `key` and persists it.
    ///
    /// The pipeline is spawned eagerly and runs to completion even if the
    /// returned future is dropped. Concurrent fetches for the same key share
    /// one pipeline when the policy enables it; every caller gets its own
    /// `fetch_*`/`collapsed_fetch_*` triplet around the shared outcome.
    pub fn fetch(
        &self,
        key: &Arc<str>,
        parameters: &Arc<P>,
    ) -> BoxFuture<'static, Result<FreshValue<V>, CacheError>> {
        let producer = {
            let cache = self.clone();
            let key = Arc::clone(key);
            let parameters = Arc::clone(parameters);
            async move {
                let fresh = cache
                    .inner
                    .compute
                    .compute(Arc::clone(&parameters))
                    .await
                    .map_err(CacheError::compute)?;

                // A failed write already reported itself through `write_error`
                // and the generic `error` event; the computed value is still
                // good and gets served.
                cache.write(&key, &parameters, fresh.clone()).await.ok();

                Ok(fresh)
            }
        };

        let (outcome, attachment) =
            self.inner
                .fetches
                .run(self.inner.policy.collapse_fetches, key, producer);
        let operation = match attachment {
            Attachment::Owner => Operation::Fetch,
            Attachment::Collapsed => Operation::CollapsedFetch,
        };

        let cache = self.clone();
        let key = Arc::clone(key);
        let parameters = Arc::clone(parameters);
        async move { cache.measure(operation, key, parameters, outcome).await }.boxed()
    }

    /// Resolves a request: serve from the store, recompute, or serve stale
    /// while refreshing in the background, per this cache's policy.
    pub fn get(
        &self,
        key: &Arc<str>,
        parameters: &Arc<P>,
    ) -> BoxFuture<'static, Result<CacheValue<V>, CacheError>> {
        let producer = Lookup::new(self.clone(), Arc::clone(key), Arc::clone(parameters)).run();

        let (outcome, attachment) =
            self.inner.gets.run(self.inner.policy.collapse_gets, key, producer);
        let operation = match attachment {
            Attachment::Owner => Operation::Get,
            Attachment::Collapsed => Operation::CollapsedGet,
        };

        let cache = self.clone();
        let key = Arc::clone(key);
        let parameters = Arc::clone(parameters);
        async move { cache.measure(operation, key, parameters, outcome).await }.boxed()
    }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::cache::Cache;
use crate::compute::Compute;
use crate::config::CachePolicy;
use crate::error::CacheError;
use crate::event::{EventSink, NullSink};
use crate::key::KeyHasher;
use crate::store::Store;
use crate::types::CacheValue;

/// The key prefix used unless one is configured on the builder.
pub const DEFAULT_PREFIX: &str = "kakku";

/// A cache to be registered on a [`Registry`].
///
/// Only the name and the compute function are required; the store and the
/// policy flags fall back to the registry's defaults when left unset.
pub struct CacheDefinition<P, V> {
    name: String,
    compute: Arc<dyn Compute<P, V>>,
    store: Option<Arc<dyn Store<V>>>,
    use_after_stale: Option<bool>,
    collapse_gets: Option<bool>,
    collapse_fetches: Option<bool>,
}

impl<P, V> CacheDefinition<P, V> {
    pub fn new(name: impl Into<String>, compute: impl Compute<P, V> + 'static) -> Self {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
            store: None,
            use_after_stale: None,
            collapse_gets: None,
            collapse_fetches: None,
        }
    }

    /// Backs this cache by its own store instead of the registry default.
    pub fn store(mut self, store: impl Store<V> + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Serve expired entries right away and refresh them in the background.
    pub fn use_after_stale(mut self, enabled: bool) -> Self {
        self.use_after_stale = Some(enabled);
        self
    }

    /// Collapse concurrent `get`s for the same key into a single lookup.
    pub fn collapse_gets(mut self, enabled: bool) -> Self {
        self.collapse_gets = Some(enabled);
        self
    }

    /// Collapse concurrent `fetch`es for the same key into one computation.
    pub fn collapse_fetches(mut self, enabled: bool) -> Self {
        self.collapse_fetches = Some(enabled);
        self
    }
}

/// Configures and builds a [`Registry`].
///
/// The key hasher and the default store are required up front; the prefix,
/// the default policy and the event sink are optional.
pub struct RegistryBuilder<P, V> {
    prefix: String,
    defaults: CachePolicy,
    hasher: Arc<dyn KeyHasher<P>>,
    store: Arc<dyn Store<V>>,
    sink: Arc<dyn EventSink<P>>,
}

impl<P, V> RegistryBuilder<P, V>
where
    P: Send + Sync + 'static,
{
    pub fn new(hasher: impl KeyHasher<P> + 'static, store: impl Store<V> + 'static) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.into(),
            defaults: CachePolicy::default(),
            hasher: Arc::new(hasher),
            store: Arc::new(store),
            sink: Arc::new(NullSink),
        }
    }

    /// The first segment of every store-facing key.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The policy applied to caches that do not override it at registration.
    pub fn defaults(mut self, defaults: CachePolicy) -> Self {
        self.defaults = defaults;
        self
    }

    /// Receives every instrumentation event of every registered cache.
    pub fn event_sink(mut self, sink: impl EventSink<P> + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn build(self) -> Registry<P, V> {
        Registry {
            inner: Arc::new(RegistryInner {
                prefix: self.prefix.into(),
                defaults: self.defaults,
                hasher: self.hasher,
                store: self.store,
                sink: self.sink,
                caches: RwLock::new(HashMap::new()),
            }),
        }
    }
}

/// Routes requests to named caches.
///
/// Cheap to clone and shareable across tasks; all clones observe the same
/// registrations.
pub struct Registry<P, V> {
    inner: Arc<RegistryInner<P, V>>,
}

// Manual Clone, as the derive would put bounds on `P` and `V`.
// https://github.com/rust-lang/rust/issues/26925
impl<P, V> Clone for Registry<P, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RegistryInner<P, V> {
    prefix: Arc<str>,
    defaults: CachePolicy,
    hasher: Arc<dyn KeyHasher<P>>,
    store: Arc<dyn Store<V>>,
    sink: Arc<dyn EventSink<P>>,
    caches: RwLock<HashMap<String, Cache<P, V>>>,
}

impl<P, V> Registry<P, V>
where
    P: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder(
        hasher: impl KeyHasher<P> + 'static,
        store: impl Store<V> + 'static,
    ) -> RegistryBuilder<P, V> {
        RegistryBuilder::new(hasher, store)
    }

    /// Registers `definition`, resolving unset policy flags and the store
    /// handle from this registry's defaults.
    ///
    /// Registering a name again replaces the previous cache wholesale; in-
    /// flight requests against the old cache finish undisturbed.
    pub fn register(&self, definition: CacheDefinition<P, V>) {
        let policy = CachePolicy {
            use_after_stale: definition
                .use_after_stale
                .unwrap_or(self.inner.defaults.use_after_stale),
            collapse_gets: definition
                .collapse_gets
                .unwrap_or(self.inner.defaults.collapse_gets),
            collapse_fetches: definition
                .collapse_fetches
                .unwrap_or(self.inner.defaults.collapse_fetches),
        };
        let store = definition
            .store
            .unwrap_or_else(|| Arc::clone(&self.inner.store));

        let name = definition.name;
        let cache = Cache::new(
            name.as_str().into(),
            Arc::clone(&self.inner.prefix),
            definition.compute,
            store,
            Arc::clone(&self.inner.sink),
            policy,
        );

        self.inner.caches.write().unwrap().insert(name, cache);
    }

    /// The cache registered under `name`, for direct `read`/`write`/`fetch`
    /// access.
    pub fn cache(&self, name: &str) -> Option<Cache<P, V>> {
        self.inner.caches.read().unwrap().get(name).cloned()
    }

    /// Resolves a request against the cache registered under `name`, deriving
    /// the cache key from `parameters` via the registry's hasher.
    ///
    /// # Panics
    ///
    /// Panics if no cache is registered under `name`; requesting an unknown
    /// cache is a programming error, not a runtime condition.
    pub async fn get(&self, name: &str, parameters: P) -> Result<CacheValue<V>, CacheError> {
        let cache = self
            .cache(name)
            .unwrap_or_else(|| panic!("no cache registered under `{name}`"));

        let key: Arc<str> = self.inner.hasher.hash(&parameters).into();
        let parameters = Arc::new(parameters);

        cache.get(&key, &parameters).await
    }
}

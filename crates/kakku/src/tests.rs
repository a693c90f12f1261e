//! End-to-end behavior of registered caches, driven through the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;

use crate::test::{FlakyStore, RecordingSink, setup};
use crate::{
    CacheDefinition, CacheError, CachePolicy, CacheValue, EventKind, FreshValue, MemoryStore,
    Registry, Store, StoredEntry, ValueSource,
};

#[derive(Debug, Clone, PartialEq)]
struct Params {
    id: String,
    bar: String,
}

fn params() -> Params {
    Params {
        id: "foobar".into(),
        bar: "qoo".into(),
    }
}

/// One registered cache with an inspectable store, sink and compute counter.
///
/// The cache is named `cache_name`, keyed by `params.id` under the prefix
/// `prefix`, and computes for 10ms before producing `dog` with a ttl of 1000
/// (or the configured failure).
struct Harness {
    registry: Registry<Params, String>,
    store: Arc<FlakyStore<MemoryStore>>,
    sink: Arc<RecordingSink<Params>>,
    computations: Arc<AtomicUsize>,
}

impl Harness {
    fn new(policy: CachePolicy) -> Self {
        Self::with_compute(policy, Ok("dog"))
    }

    fn with_compute(policy: CachePolicy, outcome: Result<&'static str, &'static str>) -> Self {
        setup();

        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let sink = Arc::new(RecordingSink::new());
        let computations = Arc::new(AtomicUsize::new(0));

        let registry = Registry::builder(|params: &Params| params.id.clone(), Arc::clone(&store))
            .prefix("prefix")
            .event_sink(Arc::clone(&sink))
            .build();

        let counter = Arc::clone(&computations);
        registry.register(
            CacheDefinition::new("cache_name", move |_params: Arc<Params>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    match outcome {
                        Ok(data) => Ok(FreshValue::new(data.to_string(), 1000)),
                        Err(message) => Err(anyhow::anyhow!(message)),
                    }
                }
                .boxed()
            })
            .use_after_stale(policy.use_after_stale)
            .collapse_gets(policy.collapse_gets)
            .collapse_fetches(policy.collapse_fetches),
        );

        Self {
            registry,
            store,
            sink,
            computations,
        }
    }

    async fn get(&self) -> Result<CacheValue<String>, CacheError> {
        self.registry.get("cache_name", params()).await
    }

    async fn seed(&self, data: &str, ttl: i64) {
        self.store
            .set("prefix:cache_name:foobar", FreshValue::new(data.to_string(), ttl))
            .await
            .unwrap();
    }

    async fn stored(&self) -> Option<StoredEntry<String>> {
        self.store.get("prefix:cache_name:foobar").await.unwrap()
    }

    fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    fn hit(&self) -> Option<(bool, i64, String)> {
        self.sink.events().into_iter().find_map(|event| match event.kind {
            EventKind::Hit { stale, ttl, source, .. } => Some((stale, ttl, source)),
            _ => None,
        })
    }

    fn store_error(&self) -> Option<CacheError> {
        self.sink.events().into_iter().find_map(|event| match event.kind {
            EventKind::Error { error, .. } => Some(error),
            _ => None,
        })
    }
}

#[tokio::test]
async fn computes_and_populates_on_empty_cache() {
    let harness = Harness::new(CachePolicy::default());

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "dog");
    assert_eq!(value.ttl, 1000);
    assert_eq!(value.source, ValueSource::Computed);
    assert_eq!(harness.computations(), 1);

    let entry = harness.stored().await.unwrap();
    assert_eq!(entry.data, "dog");
    assert_eq!(entry.ttl, 1000);

    assert_eq!(harness.hit(), None);
    insta::assert_snapshot!(harness.sink.names().join("\n"), @r###"
    get_started
    read_started
    read_success
    read_finished
    miss
    fetch_started
    write_started
    write_success
    write_finished
    fetch_success
    fetch_finished
    get_success
    get_finished
    "###);
}

#[tokio::test]
async fn serves_fresh_entries_without_computing() {
    let harness = Harness::new(CachePolicy::default());
    harness.seed("foo", 1000).await;

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "foo");
    assert_eq!(value.ttl, 1000);
    assert_eq!(value.source, ValueSource::Store("memory".into()));
    assert_eq!(harness.computations(), 0);

    assert_eq!(harness.hit(), Some((false, 1000, "memory".into())));
    insta::assert_snapshot!(harness.sink.names().join("\n"), @r###"
    get_started
    read_started
    read_success
    read_finished
    hit
    get_success
    get_finished
    "###);
}

#[tokio::test]
async fn read_failure_falls_back_to_computing() {
    let harness = Harness::new(CachePolicy::default());
    harness.store.fail_next_get("store down");

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "dog");
    assert_eq!(value.source, ValueSource::Computed);

    assert_eq!(harness.computations(), 1);
    assert_eq!(harness.sink.count("read_error"), 1);
    assert_eq!(harness.sink.count("read_finished"), 1);
    assert_eq!(harness.sink.count("miss"), 1);
    assert_eq!(harness.store_error(), Some(CacheError::Store("store down".into())));

    // the failed read did not prevent repopulation
    assert_eq!(harness.stored().await.unwrap().data, "dog");
}

#[tokio::test]
async fn stale_entries_wait_for_the_fresh_value_by_default() {
    let harness = Harness::new(CachePolicy::default());
    harness.seed("foo", -1).await;

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "dog");
    assert_eq!(value.source, ValueSource::Computed);

    assert_eq!(harness.hit(), None);
    assert_eq!(harness.sink.count("miss"), 1);
    assert_eq!(harness.computations(), 1);

    // the write completed before the request resolved
    assert_eq!(harness.stored().await.unwrap().data, "dog");
}

#[tokio::test]
async fn zero_ttl_is_never_a_fresh_hit() {
    let harness = Harness::new(CachePolicy::default());
    harness.seed("foo", 0).await;

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "dog");
    assert_eq!(harness.hit(), None);
    assert_eq!(harness.sink.count("miss"), 1);
}

#[tokio::test]
async fn serves_stale_and_refreshes_in_the_background() {
    let harness = Harness::new(CachePolicy {
        use_after_stale: true,
        ..Default::default()
    });
    harness.seed("foo", -1).await;

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "foo");
    assert_eq!(value.ttl, -1);
    assert_eq!(value.source, ValueSource::Store("memory".into()));
    assert_eq!(harness.hit(), Some((true, -1, "memory".into())));
    assert_eq!(harness.sink.count("miss"), 0);

    // the request resolved without waiting for the refresh
    assert_eq!(harness.stored().await.unwrap().data, "foo");

    tokio::time::sleep(Duration::from_millis(50)).await;

    let entry = harness.stored().await.unwrap();
    assert_eq!(entry.data, "dog");
    assert_eq!(entry.ttl, 1000);
    assert_eq!(harness.computations(), 1);
    assert_eq!(harness.sink.count("fetch_success"), 1);
    assert_eq!(harness.sink.count("write_success"), 1);
    assert_eq!(harness.sink.count("miss"), 0);
}

#[tokio::test]
async fn stale_refresh_failures_never_reach_the_request() {
    let harness = Harness::with_compute(
        CachePolicy {
            use_after_stale: true,
            ..Default::default()
        },
        Err("testing"),
    );
    harness.seed("foo", -1).await;

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "foo");
    assert_eq!(harness.hit(), Some((true, -1, "memory".into())));

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.sink.count("fetch_error"), 1);
    assert_eq!(harness.sink.count("get_error"), 0);
    assert_eq!(harness.sink.count("get_success"), 1);

    // the stale entry was not overwritten
    assert_eq!(harness.stored().await.unwrap().data, "foo");
}

#[tokio::test]
async fn write_failure_still_serves_the_computed_value() {
    let harness = Harness::new(CachePolicy::default());
    harness.store.fail_next_set("disk full");

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "dog");
    assert_eq!(value.source, ValueSource::Computed);

    assert_eq!(harness.sink.count("write_error"), 1);
    assert_eq!(harness.sink.count("fetch_success"), 1);
    assert_eq!(harness.sink.count("get_success"), 1);
    assert_eq!(harness.store_error(), Some(CacheError::Store("disk full".into())));
    assert!(harness.stored().await.is_none());
}

#[tokio::test]
async fn compute_failures_propagate_to_the_caller() {
    let harness = Harness::with_compute(CachePolicy::default(), Err("testing"));

    let error = harness.get().await.unwrap_err();
    assert_eq!(error, CacheError::Compute("testing".into()));

    assert_eq!(harness.sink.count("miss"), 1);
    assert_eq!(harness.sink.count("fetch_error"), 1);
    assert_eq!(harness.sink.count("get_error"), 1);
    // no write was attempted, and compute failures are not store errors
    assert_eq!(harness.sink.count("write_started"), 0);
    assert_eq!(harness.store_error(), None);
}

#[tokio::test]
async fn uncollapsed_concurrent_gets_compute_independently() {
    let harness = Harness::new(CachePolicy::default());

    let (first, second) = futures::join!(harness.get(), harness.get());
    assert_eq!(first.unwrap().data, "dog");
    assert_eq!(second.unwrap().data, "dog");

    assert_eq!(harness.computations(), 2);
    assert_eq!(harness.sink.count("miss"), 2);
    assert_eq!(harness.sink.count("fetch_started"), 2);
    assert_eq!(harness.sink.count("collapsed_fetch_started"), 0);
    assert_eq!(harness.sink.count("collapsed_get_started"), 0);
    assert_eq!(harness.sink.count("write_success"), 2);
}

#[tokio::test]
async fn collapsed_fetches_compute_once_for_concurrent_gets() {
    let harness = Harness::new(CachePolicy {
        collapse_fetches: true,
        ..Default::default()
    });

    let (first, second) = futures::join!(harness.get(), harness.get());
    assert_eq!(first.unwrap().data, "dog");
    assert_eq!(second.unwrap().data, "dog");

    assert_eq!(harness.computations(), 1);
    // each request still runs its own state machine
    assert_eq!(harness.sink.count("miss"), 2);
    assert_eq!(harness.sink.count("get_success"), 2);
    // but only one fetch pipeline ran; the second caller attached to it
    assert_eq!(harness.sink.count("fetch_started"), 1);
    assert_eq!(harness.sink.count("collapsed_fetch_started"), 1);
    assert_eq!(harness.sink.count("collapsed_fetch_success"), 1);
    assert_eq!(harness.sink.count("write_success"), 1);
}

#[tokio::test]
async fn collapsed_gets_share_one_state_machine() {
    let harness = Harness::new(CachePolicy {
        collapse_gets: true,
        ..Default::default()
    });

    let (first, second) = futures::join!(harness.get(), harness.get());
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.data, "dog");

    assert_eq!(harness.computations(), 1);
    assert_eq!(harness.sink.count("read_started"), 1);
    assert_eq!(harness.sink.count("miss"), 1);
    assert_eq!(harness.sink.count("fetch_started"), 1);
    assert_eq!(harness.sink.count("get_started"), 1);
    assert_eq!(harness.sink.count("collapsed_get_started"), 1);
    assert_eq!(harness.sink.count("collapsed_get_success"), 1);
}

#[tokio::test]
async fn a_stampede_of_collapsed_gets_computes_once() {
    let harness = Harness::new(CachePolicy {
        collapse_gets: true,
        collapse_fetches: true,
        ..Default::default()
    });

    let results = futures::future::join_all((0..20).map(|_| harness.get())).await;
    for result in results {
        assert_eq!(result.unwrap().data, "dog");
    }

    assert_eq!(harness.computations(), 1);
    assert_eq!(harness.sink.count("get_started"), 1);
    assert_eq!(harness.sink.count("collapsed_get_started"), 19);
}

#[tokio::test]
async fn collapsed_failures_reach_every_caller() {
    let harness = Harness::with_compute(
        CachePolicy {
            collapse_gets: true,
            ..Default::default()
        },
        Err("testing"),
    );

    let (first, second) = futures::join!(harness.get(), harness.get());
    assert_eq!(first.unwrap_err(), CacheError::Compute("testing".into()));
    assert_eq!(second.unwrap_err(), CacheError::Compute("testing".into()));

    assert_eq!(harness.computations(), 1);
    assert_eq!(harness.sink.count("get_error"), 1);
    assert_eq!(harness.sink.count("collapsed_get_error"), 1);
}

#[tokio::test]
async fn roundtrips_writes_through_the_cache() {
    let harness = Harness::new(CachePolicy::default());
    let cache = harness.registry.cache("cache_name").unwrap();

    let key: Arc<str> = "foobar".into();
    let parameters = Arc::new(params());
    cache
        .write(&key, &parameters, FreshValue::new("foo".to_string(), 60))
        .await
        .unwrap();

    let value = harness.get().await.unwrap();
    assert_eq!(value.data, "foo");
    assert_eq!(value.ttl, 60);
    assert_eq!(value.source, ValueSource::Store("memory".into()));
    assert_eq!(harness.sink.count("write_success"), 1);
    assert_eq!(harness.computations(), 0);
}

#[tokio::test]
async fn events_carry_the_cache_identity() {
    let harness = Harness::new(CachePolicy::default());
    harness.get().await.unwrap();

    let events = harness.sink.events();
    assert!(!events.is_empty());
    for event in events {
        assert_eq!(&*event.cache_name, "cache_name");
        assert_eq!(&*event.cache_key, "foobar");
        assert_eq!(*event.parameters, params());
    }
}

#[tokio::test]
async fn the_default_prefix_is_kakku() {
    let store = Arc::new(MemoryStore::new());
    let registry: Registry<Params, String> =
        Registry::builder(|params: &Params| params.id.clone(), Arc::clone(&store)).build();

    registry.register(CacheDefinition::new("cache_name", |_params: Arc<Params>| {
        async move { anyhow::Ok(FreshValue::new("dog".to_string(), 5)) }.boxed()
    }));
    registry.get("cache_name", params()).await.unwrap();

    let entry: Option<StoredEntry<String>> = store.get("kakku:cache_name:foobar").await.unwrap();
    assert_eq!(entry.unwrap().data, "dog");
}

#[tokio::test]
async fn registry_defaults_apply_unless_overridden() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::new());
    let registry = Registry::builder(|params: &Params| params.id.clone(), Arc::clone(&store))
        .defaults(CachePolicy {
            collapse_fetches: true,
            ..Default::default()
        })
        .event_sink(Arc::clone(&sink))
        .build();

    let compute = |_params: Arc<Params>| {
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            anyhow::Ok(FreshValue::new("dog".to_string(), 1000))
        }
        .boxed()
    };
    registry.register(CacheDefinition::new("defaulted", compute));
    registry.register(CacheDefinition::new("overridden", compute).collapse_fetches(false));

    let _ = futures::join!(
        registry.get("defaulted", params()),
        registry.get("defaulted", params()),
    );
    let _ = futures::join!(
        registry.get("overridden", params()),
        registry.get("overridden", params()),
    );

    let collapsed: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|event| event.kind.name() == "collapsed_fetch_started")
        .map(|event| event.cache_name.to_string())
        .collect();
    assert_eq!(collapsed, vec!["defaulted".to_string()]);
}

#[tokio::test]
async fn reregistering_a_name_replaces_the_cache() {
    let store = Arc::new(MemoryStore::new());
    let registry: Registry<Params, String> =
        Registry::builder(|params: &Params| params.id.clone(), Arc::clone(&store)).build();

    registry.register(CacheDefinition::new("cache_name", |_params: Arc<Params>| {
        async move { anyhow::Ok(FreshValue::new("dog".to_string(), 5)) }.boxed()
    }));
    registry.register(CacheDefinition::new("cache_name", |_params: Arc<Params>| {
        async move { anyhow::Ok(FreshValue::new("cat".to_string(), 5)) }.boxed()
    }));

    let value = registry.get("cache_name", params()).await.unwrap();
    assert_eq!(value.data, "cat");
}

#[tokio::test]
#[should_panic(expected = "no cache registered under `missing`")]
async fn unknown_cache_names_are_fatal() {
    let registry: Registry<Params, String> =
        Registry::builder(|params: &Params| params.id.clone(), MemoryStore::new()).build();

    let _ = registry.get("missing", params()).await;
}

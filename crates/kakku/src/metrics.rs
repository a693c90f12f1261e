//! StatsD reporting for cache events.

use cadence::StatsdClient;
use cadence::prelude::*;

use crate::event::{CacheEvent, EventKind, EventSink};

/// Reports every cache event to statsd through [`cadence`].
///
/// Each event is counted under `caches.<event_name>`, tagged with the cache
/// name; `finished` events additionally record the operation duration as a
/// timer under `caches.<operation>`. The client is injected rather than
/// process-global, so separate registries can report independently.
#[derive(Debug)]
pub struct StatsdSink {
    client: StatsdClient,
}

impl StatsdSink {
    pub fn new(client: StatsdClient) -> Self {
        Self { client }
    }
}

impl<P> EventSink<P> for StatsdSink {
    fn emit(&self, event: CacheEvent<P>) {
        let cache = &*event.cache_name;
        self.client
            .count_with_tags(&format!("caches.{}", event.kind.name()), 1)
            .with_tag("cache", cache)
            .send();

        if let EventKind::Finished { operation, elapsed } = event.kind {
            self.client
                .time_with_tags(&format!("caches.{operation}"), elapsed)
                .with_tag("cache", cache)
                .send();
        }
    }
}

//! # Kakku caching orchestration
//!
//! Kakku is a read-through caching layer in front of a key-value store and a
//! compute function: it decides per request whether to serve a stored entry,
//! recompute it, or serve a stale entry while recomputing in the background,
//! and it deduplicates concurrent work for the same key. It does not store
//! anything itself; storage, eviction and expiry bookkeeping belong to the
//! [`Store`] implementation.
//!
//! ## Resolving a request
//!
//! A request enters through [`Registry::get`], which derives the cache key
//! from the request parameters via the registry's [`KeyHasher`] and routes to
//! the named [`Cache`]. The cache reads the entry under
//! `prefix:cacheName:key` and classifies the result:
//!
//! - A present entry with remaining lifetime is served as a hit.
//! - An absent entry is a miss: the request waits on a fetch, which invokes
//!   the [`Compute`] function and persists its result.
//! - A present but expired entry (the store reports its remaining lifetime as
//!   a signed number, `<= 0` meaning expired) is stale. Depending on the
//!   cache's [`CachePolicy`], it is either treated as a miss, or served
//!   immediately while a detached fetch refreshes the entry in the
//!   background.
//! - A failing store read is reported and then treated as a miss, so the
//!   caller still gets a value as long as computing one works.
//!
//! Failed writes never fail a request either: the freshly computed value is
//! served regardless. Only a failing compute function fails a `get`, see
//! [`CacheError`].
//!
//! ## Collapsing
//!
//! Concurrent operations for the same key can be collapsed per operation
//! class, separately for `get`s and `fetch`es. At most one producer runs per
//! key at any instant; callers arriving while one is in flight attach to its
//! outcome. Producers run as detached tasks to completion, so an abandoned
//! request never cancels work other callers may rely on, and a stampede of
//! requests for one hot key results in a single computation.
//!
//! ## Events
//!
//! Every cache reports its work to the [`EventSink`] injected into its
//! registry. Measured operations (`read`, `write`, `get`, `fetch`, and their
//! `collapsed_` variants for callers that attached to in-flight work) emit
//! `<op>_started`, then exactly one of `<op>_success`/`<op>_error`, then
//! always `<op>_finished`. Resolution outcomes emit `hit` (fresh or stale),
//! `miss`, and `error` for store failures. See [`EventKind`] for the typed
//! payloads, and [`StatsdSink`]/[`TracingSink`] for ready-made sinks.
//!
//! ## Example
//!
//! ```
//! use futures::FutureExt;
//! use kakku::{CacheDefinition, FreshValue, JsonSha256, MemoryStore, Registry};
//!
//! # #[derive(serde::Serialize)]
//! # struct UserQuery { id: u32 }
//! # async fn load_user(_q: &UserQuery) -> anyhow::Result<String> { Ok("ada".into()) }
//! # async fn example() -> Result<(), kakku::CacheError> {
//! let registry = Registry::builder(JsonSha256, MemoryStore::new()).build();
//!
//! registry.register(
//!     CacheDefinition::new("users", |params: std::sync::Arc<UserQuery>| {
//!         async move {
//!             let user = load_user(&params).await?;
//!             Ok(FreshValue::new(user, 300))
//!         }
//!         .boxed()
//!     })
//!     .use_after_stale(true)
//!     .collapse_fetches(true),
//! );
//!
//! let user = registry.get("users", UserQuery { id: 7 }).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod collapse;
mod compute;
mod config;
mod error;
mod event;
mod key;
mod lookup;
mod metrics;
mod registry;
mod store;
mod types;

#[cfg(any(test, feature = "test"))]
pub mod test;

#[cfg(test)]
mod tests;

pub use cache::Cache;
pub use compute::Compute;
pub use config::CachePolicy;
pub use error::CacheError;
pub use event::{CacheEvent, EventKind, EventSink, NullSink, Operation, TracingSink};
pub use key::{JsonSha256, KeyHasher};
pub use metrics::StatsdSink;
pub use registry::{CacheDefinition, DEFAULT_PREFIX, Registry, RegistryBuilder};
pub use store::{MemoryStore, Store};
pub use types::{CacheValue, FreshValue, StoredEntry, ValueSource};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};

use crate::error::CacheError;

type OperationChannel<T> = Shared<oneshot::Receiver<Result<T, CacheError>>>;
type InflightMap<T> = Arc<Mutex<HashMap<Arc<str>, OperationChannel<T>>>>;

/// How a caller got attached to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attachment {
    /// This caller spawned the producer itself.
    Owner,
    /// This caller attached to a producer already in flight for the same key.
    Collapsed,
}

/// Removes a key's in-flight entry when dropped.
///
/// The producer task drops this right before sending its outcome, so removal
/// and completion are observed atomically by arriving callers: whoever still
/// finds the entry will receive the outcome, whoever does not starts a fresh
/// operation. It also fires if the producer dies without completing.
struct RemovalToken<T> {
    key: Arc<str>,
    inflight: InflightMap<T>,
}

impl<T> Drop for RemovalToken<T> {
    fn drop(&mut self) {
        self.inflight.lock().unwrap().remove(&self.key);
    }
}

/// Tracks the in-flight operations of one class (`get` or `fetch`) per cache.
///
/// With collapsing enabled, at most one producer runs per key at any instant.
/// The map is mutated in exactly two places: an insert when the first caller
/// arrives, and the [`RemovalToken`] removal when the producer completes.
pub(crate) struct OperationQueue<T> {
    inflight: InflightMap<T>,
}

impl<T> Default for OperationQueue<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> OperationQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Runs `producer` under this queue's collapsing policy.
    ///
    /// The producer is spawned as a detached task and always runs to
    /// completion, even if every caller drops the returned future. With
    /// `collapse` set, a caller arriving while a producer for `key` is in
    /// flight attaches to its outcome instead of starting its own, and is
    /// tagged [`Attachment::Collapsed`]; outcomes are broadcast identically
    /// to every attached caller.
    pub fn run<F>(
        &self,
        collapse: bool,
        key: &Arc<str>,
        producer: F,
    ) -> (BoxFuture<'static, Result<T, CacheError>>, Attachment)
    where
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        if !collapse {
            let channel = spawn_operation(producer, None);
            return (wait(channel).boxed(), Attachment::Owner);
        }

        let mut inflight = self.inflight.lock().unwrap();

        if let Some(channel) = inflight.get(key) {
            return (wait(channel.clone()).boxed(), Attachment::Collapsed);
        }

        let token = RemovalToken {
            key: Arc::clone(key),
            inflight: Arc::clone(&self.inflight),
        };
        let channel = spawn_operation(producer, Some(token));
        let evicted = inflight.insert(Arc::clone(key), channel.clone());
        debug_assert!(evicted.is_none());

        (wait(channel).boxed(), Attachment::Owner)
    }
}

fn spawn_operation<T, F>(producer: F, token: Option<RemovalToken<T>>) -> OperationChannel<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T, CacheError>> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();

    tokio::spawn(async move {
        let outcome = producer.await;
        // Evict the map entry before delivering: an arrival from here on
        // starts a fresh operation instead of attaching to a finished one.
        drop(token);
        sender.send(outcome).ok();
    });

    receiver.shared()
}

async fn wait<T: Clone>(channel: OperationChannel<T>) -> Result<T, CacheError> {
    channel.await.unwrap_or(Err(CacheError::Dropped))
}

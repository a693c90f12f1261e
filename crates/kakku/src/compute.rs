use std::sync::Arc;

use futures::future::BoxFuture;

use crate::types::FreshValue;

/// Produces a fresh value for a set of request parameters.
///
/// Implementations are the origin behind a cache: they run on misses and on
/// refreshes, and the `ttl` they declare is handed to the store verbatim. Any
/// error fails the fetch and propagates to every request waiting on it.
///
/// Plain functions and closures returning boxed futures implement this
/// directly:
///
/// ```
/// use std::sync::Arc;
///
/// use futures::FutureExt;
/// use futures::future::BoxFuture;
/// use kakku::FreshValue;
///
/// fn shout(params: Arc<String>) -> BoxFuture<'static, anyhow::Result<FreshValue<String>>> {
///     async move { Ok(FreshValue::new(params.to_uppercase(), 300)) }.boxed()
/// }
/// # let _: &dyn kakku::Compute<String, String> = &shout;
/// ```
pub trait Compute<P, V>: Send + Sync {
    fn compute(&self, parameters: Arc<P>) -> BoxFuture<'static, anyhow::Result<FreshValue<V>>>;
}

impl<P, V, F> Compute<P, V> for F
where
    F: Fn(Arc<P>) -> BoxFuture<'static, anyhow::Result<FreshValue<V>>> + Send + Sync,
{
    fn compute(&self, parameters: Arc<P>) -> BoxFuture<'static, anyhow::Result<FreshValue<V>>> {
        self(parameters)
    }
}

impl<P, V, C> Compute<P, V> for Arc<C>
where
    C: Compute<P, V> + ?Sized,
{
    fn compute(&self, parameters: Arc<P>) -> BoxFuture<'static, anyhow::Result<FreshValue<V>>> {
        (**self).compute(parameters)
    }
}

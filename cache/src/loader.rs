use crate::error::BoxError;

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;

/// Computes values for a `LoadingCache`.
///
/// Returning `Ok(None)` means the key has no value; nothing is stored. An
/// `Err` fails the load for every caller waiting on the key.
///
/// Any `Fn(&K) -> Result<Option<V>, E>` closure is a loader.
pub trait CacheLoader<K, V>: Send + Sync + 'static {
  fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

  /// Loads several keys in one call.
  ///
  /// The default loads each key in turn and stops at the first error. Keys
  /// without a value may be left out of the result. Extra keys are stored
  /// where the cache has no entry for them.
  fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, BoxError>
  where
    K: Eq + Hash + Clone,
  {
    let mut loaded = HashMap::with_capacity(keys.len());
    for key in keys {
      if let Some(value) = self.load(key)? {
        loaded.insert(key.clone(), value);
      }
    }
    Ok(loaded)
  }

  /// Computes a replacement for a value being refreshed. Defaults to `load`.
  fn reload(&self, key: &K, _old: &V) -> Result<Option<V>, BoxError> {
    self.load(key)
  }
}

impl<K, V, F, E> CacheLoader<K, V> for F
where
  F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
  E: Into<BoxError>,
{
  fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
    self(key).map_err(Into::into)
  }
}

/// Computes values for an `AsyncLoadingCache`.
///
/// The returned futures run on the cache's task spawner and must not borrow
/// from the loader.
pub trait AsyncCacheLoader<K, V>: Send + Sync + 'static {
  fn load(&self, key: &K) -> BoxFuture<'static, Result<Option<V>, BoxError>>;

  /// Loads several keys in one call. The default runs every `load`
  /// concurrently and fails if any of them fails.
  fn load_all(&self, keys: &[K]) -> BoxFuture<'static, Result<HashMap<K, V>, BoxError>>
  where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
  {
    let loads: Vec<_> = keys
      .iter()
      .map(|key| {
        let owned = key.clone();
        let load = self.load(key);
        async move { load.await.map(|value| (owned, value)) }
      })
      .collect();

    async move {
      let loaded = future::try_join_all(loads).await?;
      Ok(
        loaded
          .into_iter()
          .filter_map(|(key, value)| value.map(|value| (key, value)))
          .collect(),
      )
    }
    .boxed()
  }

  /// Computes a replacement for a value being refreshed. Defaults to `load`.
  fn reload(&self, key: &K, _old: Arc<V>) -> BoxFuture<'static, Result<Option<V>, BoxError>> {
    self.load(key)
  }
}

impl<K, V, F, Fut, E> AsyncCacheLoader<K, V> for F
where
  F: Fn(&K) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
  E: Into<BoxError>,
{
  fn load(&self, key: &K) -> BoxFuture<'static, Result<Option<V>, BoxError>> {
    self(key).map(|result| result.map_err(Into::into)).boxed()
  }
}

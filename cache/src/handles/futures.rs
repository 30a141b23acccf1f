use crate::cell::Outcome;
use crate::entry::EntryView;
use crate::error::{BoxError, CacheError};
use crate::future::{BulkFuture, CacheFuture};
use crate::handles::{Cache, PolicyHandle};
use crate::iter::FutureIter;
use crate::map::AsyncMapView;
use crate::metrics::MetricsSnapshot;
use crate::runtime::TaskSpawner;
use crate::shared::{CacheShared, PendingMode};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use futures_util::FutureExt;

/// A thread-safe, asynchronous compute cache.
///
/// Every lookup returns a [`CacheFuture`] immediately. Computations run as
/// tasks on the cache's [`TaskSpawner`], at most one per key at a time, and
/// every caller asking for the same key shares the same future.
///
/// A key whose value is still being computed is present: `get_if_present`
/// returns its in-flight future. Writes never wait for a computation; they
/// replace it, and the computation's result goes only to its own callers.
pub struct AsyncCache<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for AsyncCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V, H> fmt::Debug for AsyncCache<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncCache")
      .field("entries", &self.shared.store.len())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> AsyncCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn from_shared(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  /// Returns the future for `key` if it has a value or one is being
  /// computed. Never starts a computation.
  pub fn get_if_present(&self, key: &K) -> Option<CacheFuture<V>> {
    let found = self.shared.store.get(key).and_then(|entry| match entry.view() {
      EntryView::Resolved(value) => {
        self.shared.on_read(key, entry.weight());
        Some(CacheFuture::ready(Outcome::Value(value)))
      }
      EntryView::Pending(cell) => Some(CacheFuture::new(cell)),
      EntryView::Removed => None,
    });
    match found {
      Some(_) => self.shared.record_hits(1),
      None => self.shared.record_misses(1),
    }
    found
  }

  /// Returns the future for `key`, spawning the future returned by `f` if
  /// the key is missing.
  ///
  /// `f` runs on the calling task only to create the future; the future
  /// itself runs on the spawner.
  pub fn get_with<F, Fut>(&self, key: &K, f: F) -> CacheFuture<V>
  where
    F: FnOnce(&K) -> Fut,
    Fut: Future<Output = V> + Send + 'static,
  {
    self
      .shared
      .get_or_spawn(key, |key| f(key).map(|value| Ok(Some(value))))
  }

  /// Like `get_with`, but the computation may fail or produce nothing, in
  /// which case the key is left absent.
  pub fn try_get_with<F, Fut, E>(&self, key: &K, f: F) -> CacheFuture<V>
  where
    F: FnOnce(&K) -> Fut,
    Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    self
      .shared
      .get_or_spawn(key, |key| f(key).map(|result| result.map_err(CacheError::load)))
  }

  /// Like `try_get_with`, but `f` also receives the cache's spawner, for
  /// computations that start tasks of their own.
  pub fn get_with_spawner<F, Fut, E>(&self, key: &K, f: F) -> CacheFuture<V>
  where
    F: FnOnce(&K, &Arc<dyn TaskSpawner>) -> Fut,
    Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    let Some(spawner) = self.shared.spawner.clone() else {
      return self.shared.fail(CacheError::Cancelled);
    };
    self.try_get_with(key, |key| f(key, &spawner))
  }

  /// Returns the values for `keys`, computing every missing one with a
  /// single future returned by `f`.
  ///
  /// `f` receives only the keys this call claimed. If its future fails, the
  /// result fails; keys that other callers were computing are left out of
  /// the result when their computation fails.
  pub fn get_all_with<I, F, Fut, E>(&self, keys: I, f: F) -> BulkFuture<K, V>
  where
    I: IntoIterator<Item = K>,
    F: FnOnce(&[K]) -> Fut,
    Fut: Future<Output = Result<HashMap<K, V>, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    self.shared.get_all_or_spawn(keys, |keys| {
      f(keys).map(|result| result.map_err(CacheError::load))
    })
  }

  /// Maps `key` to the value `future` produces.
  ///
  /// The key is present as soon as this returns; readers receive the
  /// returned future until it settles.
  pub fn put<Fut>(&self, key: K, future: Fut) -> CacheFuture<V>
  where
    Fut: Future<Output = V> + Send + 'static,
  {
    self
      .shared
      .put_future(key, future.map(|value| Ok(Some(value))))
  }

  /// Like `put`, but the future may fail or produce nothing, which removes
  /// the key again.
  pub fn try_put<Fut, E>(&self, key: K, future: Fut) -> CacheFuture<V>
  where
    Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    self
      .shared
      .put_future(key, future.map(|result| result.map_err(CacheError::load)))
  }

  /// Removes `key`, returning the value it held. A computation in progress
  /// for the key is discarded without waiting for it.
  pub fn invalidate(&self, key: &K) -> Option<Arc<V>> {
    self.shared.invalidate(key, PendingMode::Supersede)
  }

  pub fn invalidate_all(&self) {
    self.shared.invalidate_all();
  }

  /// The number of entries, including keys still being computed.
  pub fn estimated_size(&self) -> usize {
    self.shared.store.len()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  pub fn as_map(&self) -> AsyncMapView<K, V, H> {
    AsyncMapView::new(self.shared.clone())
  }

  /// Iterates over every entry, the ones still being computed included.
  pub fn iter(&self) -> FutureIter<K, V, H> {
    FutureIter::new(self.shared.clone())
  }

  /// Returns a blocking view of the same cache.
  ///
  /// The view treats keys still being computed as absent and waits for
  /// them where it has to.
  pub fn synchronous(&self) -> Cache<K, V, H> {
    Cache::from_shared(self.shared.clone())
  }

  pub fn clean_up(&self) {
    self.shared.clean_up();
  }

  pub fn policy(&self) -> PolicyHandle<K, V, H> {
    PolicyHandle::new(self.shared.clone())
  }
}

use crate::error::{BoxError, CacheError};
use crate::handles::PolicyHandle;
use crate::iter::Iter;
use crate::map::MapView;
use crate::metrics::MetricsSnapshot;
use crate::shared::{CacheShared, PendingMode};

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

#[cfg(feature = "bulk")]
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};

/// A thread-safe, synchronous compute cache.
///
/// Values are computed on demand, at most once per key at a time: callers
/// that miss the same key while it is being computed block until the single
/// computation finishes and share its outcome.
///
/// Keys whose value is still being computed are treated as absent by the
/// lookups that do not compute (`get_if_present`, `get_all_present`, `iter`).
/// Writes to such a key wait for the computation to settle first.
///
/// Cloning a `Cache` is cheap and yields a handle to the same cache.
pub struct Cache<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for Cache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V, H> fmt::Debug for Cache<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache")
      .field("entries", &self.shared.store.len())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn from_shared(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  /// Returns the value for `key` if it has one, without computing it.
  pub fn get_if_present(&self, key: &K) -> Option<Arc<V>> {
    self.shared.get_if_present(key, true)
  }

  /// Returns the value for `key`, computing it with `f` if it is missing.
  ///
  /// `f` runs on the calling thread with no lock held. Concurrent callers
  /// for the same key block until it finishes. If `f` panics, the panic
  /// propagates to this caller and waiting callers get
  /// `CacheError::Panicked`.
  ///
  /// `f` may use the cache, but calling back into the same key fails with
  /// `CacheError::RecursiveUpdate`. A cycle spanning several threads is not
  /// detected and deadlocks.
  pub fn get_with<F>(&self, key: &K, f: F) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K) -> V,
  {
    self
      .shared
      .get_or_compute(key, true, true, |key| Ok(Some(f(key))))?
      // A value-producing computation never settles empty.
      .ok_or(CacheError::Cancelled)
  }

  /// Like `get_with`, but `f` may fail or produce nothing.
  ///
  /// `Ok(None)` and errors leave the key absent. An error is returned to
  /// this caller and to every caller that was waiting on the computation.
  pub fn try_get_with<F, E>(&self, key: &K, f: F) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(&K) -> Result<Option<V>, E>,
    E: Into<BoxError>,
  {
    self
      .shared
      .get_or_compute(key, true, false, |key| f(key).map_err(CacheError::load))
  }

  /// Returns the values present for `keys`. Missing and pending keys are
  /// left out.
  #[cfg(not(feature = "bulk"))]
  pub fn get_all_present<I>(&self, keys: I) -> HashMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    let mut found = HashMap::new();
    for key in keys {
      if let Some(value) = self.shared.get_if_present(&key, true) {
        found.insert(key, value);
      }
    }
    found
  }

  /// Returns the values present for `keys`. Missing and pending keys are
  /// left out.
  ///
  /// Keys are grouped by shard and the shards are searched in parallel.
  #[cfg(feature = "bulk")]
  pub fn get_all_present<I>(&self, keys: I) -> HashMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    // Group keys by shard index to take each shard's lock once.
    let store = &self.shared.store;
    let mut keys_by_shard: Vec<Vec<K>> = vec![Vec::new(); store.num_shards()];
    let mut requested = 0;
    for key in keys {
      keys_by_shard[store.shard_index(&key)].push(key);
      requested += 1;
    }

    let found_by_shard: Vec<Vec<(K, Arc<V>, u64)>> = keys_by_shard
      .par_iter()
      .enumerate()
      .map(|(index, shard_keys)| {
        if shard_keys.is_empty() {
          return Vec::new();
        }
        let shard = store.shard_at(index).read();
        shard_keys
          .iter()
          .filter_map(|key| {
            let entry = shard.get(key)?;
            let value = entry.value()?;
            Some((key.clone(), value, entry.weight()))
          })
          .collect()
      })
      .collect();

    let mut found = HashMap::new();
    let mut hits = 0;
    for (key, value, weight) in found_by_shard.into_iter().flatten() {
      self.shared.on_read(&key, weight);
      found.insert(key, value);
      hits += 1;
    }
    self.shared.record_hits(hits);
    self.shared.record_misses(requested - hits);
    found
  }

  /// Returns the values for `keys`, computing every missing one with a
  /// single call to `f`.
  ///
  /// `f` receives only the keys this call claimed; keys already being
  /// computed by another caller are waited for instead. Keys `f` leaves out
  /// stay absent, and extra keys it returns are stored where the cache has
  /// no entry. An error fails every claimed key and is returned.
  pub fn get_all_with<I, F, E>(&self, keys: I, f: F) -> Result<HashMap<K, Arc<V>>, CacheError>
  where
    I: IntoIterator<Item = K>,
    F: FnOnce(&[K]) -> Result<HashMap<K, V>, E>,
    E: Into<BoxError>,
  {
    self
      .shared
      .get_all_or_compute(keys, |keys| f(keys).map_err(CacheError::load))
  }

  /// Stores `value` for `key`, returning the value it replaced.
  ///
  /// If the key is being computed, waits for that to finish and then
  /// overwrites its result.
  pub fn put(&self, key: K, value: V) -> Option<Arc<V>> {
    self.shared.put(&key, value)
  }

  pub fn put_all<I>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, V)>,
  {
    for (key, value) in entries {
      self.shared.put(&key, value);
    }
  }

  /// Removes `key`, returning the value it held.
  ///
  /// A computation in progress for the key is waited for, then removed.
  pub fn invalidate(&self, key: &K) -> Option<Arc<V>> {
    self.shared.invalidate(key, PendingMode::Wait)
  }

  pub fn invalidate_keys<I>(&self, keys: I)
  where
    I: IntoIterator,
    I::Item: Borrow<K>,
  {
    for key in keys {
      self.shared.invalidate(key.borrow(), PendingMode::Wait);
    }
  }

  /// Removes every entry. Computations in progress are discarded when they
  /// finish; their callers still receive the computed value.
  pub fn invalidate_all(&self) {
    self.shared.invalidate_all();
  }

  /// The number of entries, including keys still being computed.
  ///
  /// Evictions are applied lazily, so this is exact only right after
  /// `clean_up` with no concurrent writers.
  pub fn estimated_size(&self) -> usize {
    self.shared.store.len()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Returns a map-like view of this cache.
  pub fn as_map(&self) -> MapView<K, V, H> {
    MapView::new(self.shared.clone())
  }

  /// Iterates over the entries that have a value. See [`Iter`].
  pub fn iter(&self) -> Iter<K, V, H> {
    Iter::new(self.shared.clone())
  }

  /// Applies pending eviction bookkeeping and evicts down to capacity.
  pub fn clean_up(&self) {
    self.shared.clean_up();
  }

  pub fn policy(&self) -> PolicyHandle<K, V, H> {
    PolicyHandle::new(self.shared.clone())
  }
}

impl<'a, K, V, H> IntoIterator for &'a Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  type Item = (K, Arc<V>);
  type IntoIter = Iter<K, V, H>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

//! Map-like views of a cache.
//!
//! The views operate on the same entries as the cache handles. Lookups
//! through a view count as reads for eviction but are not recorded in the
//! hit and miss statistics.

use crate::cell::Outcome;
use crate::entry::EntryView;
use crate::error::CacheError;
use crate::future::CacheFuture;
use crate::iter::{FutureIter, Iter};
use crate::shared::{AbsentMode, CacheShared, PendingMode, Reentry};

use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use futures_util::FutureExt;

/// A concurrent map view of a [`Cache`](crate::Cache).
///
/// Keys still being computed are absent from the view's lookups. Writes and
/// compute operations on such a key wait for the computation to settle.
/// The `compute` family is atomic per key: the function runs at most once,
/// while other writers of the same key wait. Calling back into the same key
/// from inside the function fails with `CacheError::RecursiveUpdate`.
pub struct MapView<K, V, H> {
  shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> MapView<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self
      .shared
      .store
      .get(key)
      .is_some_and(|entry| entry.value().is_some())
  }

  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.shared.get_if_present(key, false)
  }

  /// Maps `key` to `value`, returning the previous value.
  pub fn insert(&self, key: K, value: V) -> Option<Arc<V>> {
    self.shared.put(&key, value)
  }

  /// Maps `key` to `value` unless it already has one. Returns the existing
  /// value, or `None` if `value` was stored.
  pub fn insert_if_absent(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.put_if_absent(&key, value)
  }

  pub fn remove(&self, key: &K) -> Option<Arc<V>> {
    self.shared.invalidate(key, PendingMode::Wait)
  }

  /// Replaces the value of `key` with what `f` returns for the current
  /// value, or removes the key when `f` returns `None`. Returns the new
  /// value.
  pub fn compute<F>(&self, key: &K, f: F) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(Option<&Arc<V>>) -> Option<V>,
  {
    self
      .shared
      .compute(key, AbsentMode::Compute, Reentry::Fail, f)
  }

  /// Returns the value of `key`, computing it with `f` if it has none.
  ///
  /// Concurrent callers for the same key wait for the single computation.
  /// When `f` returns `None` nothing is stored.
  pub fn compute_if_absent<F>(&self, key: &K, f: F) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(&K) -> Option<V>,
  {
    self
      .shared
      .get_or_compute(key, false, false, |key| Ok(f(key)))
  }

  /// Recomputes the value of `key` if it has one; `None` from `f` removes
  /// the key. Returns the new value.
  pub fn compute_if_present<F>(&self, key: &K, f: F) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(&Arc<V>) -> Option<V>,
  {
    self
      .shared
      .compute(key, AbsentMode::Skip, Reentry::Fail, |current| current.and_then(f))
  }

  /// The number of entries, including keys still being computed.
  pub fn len(&self) -> usize {
    self.shared.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn iter(&self) -> Iter<K, V, H> {
    Iter::new(self.shared.clone())
  }

  pub fn clear(&self) {
    self.shared.invalidate_all();
  }
}

impl<K, V, H> fmt::Debug for MapView<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapView")
      .field("len", &self.shared.store.len())
      .finish()
  }
}

/// A concurrent map view of an [`AsyncCache`](crate::AsyncCache), mapping
/// keys to futures.
///
/// Keys still being computed are present and map to their in-flight future.
pub struct AsyncMapView<K, V, H> {
  shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> AsyncMapView<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.shared.store.get(key).is_some()
  }

  pub fn get(&self, key: &K) -> Option<CacheFuture<V>> {
    let entry = self.shared.store.get(key)?;
    match entry.view() {
      EntryView::Resolved(value) => {
        self.shared.on_read(key, entry.weight());
        Some(CacheFuture::ready(Outcome::Value(value)))
      }
      EntryView::Pending(cell) => Some(CacheFuture::new(cell)),
      EntryView::Removed => None,
    }
  }

  /// Maps `key` to the value `future` produces, replacing any current
  /// entry at once.
  pub fn insert<Fut>(&self, key: K, future: Fut) -> CacheFuture<V>
  where
    Fut: Future<Output = V> + Send + 'static,
  {
    self
      .shared
      .put_future(key, future.map(|value| Ok(Some(value))))
  }

  /// Removes `key` without waiting for a computation in progress.
  pub fn remove(&self, key: &K) -> Option<Arc<V>> {
    self.shared.invalidate(key, PendingMode::Supersede)
  }

  pub fn len(&self) -> usize {
    self.shared.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn iter(&self) -> FutureIter<K, V, H> {
    FutureIter::new(self.shared.clone())
  }

  pub fn clear(&self) {
    self.shared.invalidate_all();
  }
}

impl<K, V, H> fmt::Debug for AsyncMapView<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncMapView")
      .field("len", &self.shared.store.len())
      .finish()
  }
}

use crate::error::CacheError;
use crate::future::{BulkFuture, BulkMember, CacheFuture};
use crate::handles::{AsyncCache, Cache};
use crate::loader::{AsyncCacheLoader, CacheLoader};
use crate::scope::ComputeScope;
use crate::shared::RefreshStart;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::sync::Arc;
use std::thread;

use futures_util::FutureExt;

/// A synchronous cache that computes missing values with a [`CacheLoader`].
///
/// Derefs to [`Cache`] for every operation that does not involve the loader.
pub struct LoadingCache<K, V, H = ahash::RandomState> {
  cache: Cache<K, V, H>,
  loader: Arc<dyn CacheLoader<K, V>>,
}

impl<K, V, H> Clone for LoadingCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      loader: self.loader.clone(),
    }
  }
}

impl<K, V, H> fmt::Debug for LoadingCache<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadingCache")
      .field("cache", &self.cache)
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Deref for LoadingCache<K, V, H> {
  type Target = Cache<K, V, H>;

  fn deref(&self) -> &Self::Target {
    &self.cache
  }
}

impl<K, V, H> LoadingCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(cache: Cache<K, V, H>, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
    Self { cache, loader }
  }

  /// Returns the value for `key`, loading it if it is missing.
  ///
  /// `Ok(None)` means the loader found no value; nothing is stored.
  pub fn get(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    let loader = &self.loader;
    self
      .cache
      .shared
      .get_or_compute(key, true, false, |key| loader.load(key).map_err(CacheError::load))
  }

  /// Returns the values for `keys`, loading every missing one with a single
  /// call to [`CacheLoader::load_all`].
  pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, Arc<V>>, CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    let loader = &self.loader;
    self
      .cache
      .shared
      .get_all_or_compute(keys, |keys| loader.load_all(keys).map_err(CacheError::load))
  }

  /// Reloads `key` on a background thread.
  ///
  /// Readers keep getting the current value until the reload succeeds. A
  /// failed reload keeps the current value and is only logged; a reload
  /// that finds no value removes the key. A missing key is loaded normally.
  /// If the key is already being loaded or reloaded, returns that
  /// computation's future instead of starting another.
  pub fn refresh(&self, key: &K) -> CacheFuture<V> {
    let loader = self.loader.clone();
    let (handle, task): (CacheFuture<V>, Box<dyn FnOnce() + Send>) =
      match self.cache.shared.begin_refresh(key) {
        RefreshStart::Joined(handle) => return handle,
        RefreshStart::Load(flight) => (
          flight.handle(),
          Box::new(move || {
            let result = {
              let _scope = ComputeScope::enter(flight.cell());
              loader.load(flight.key()).map_err(CacheError::load)
            };
            flight.complete(result);
          }),
        ),
        RefreshStart::Reload(flight) => (
          flight.handle(),
          Box::new(move || {
            let result = loader
              .reload(flight.key(), flight.old())
              .map_err(CacheError::load);
            flight.complete(result);
          }),
        ),
      };

    // On failure the task is dropped, which cancels the flight it owns.
    if let Err(error) = thread::Builder::new()
      .name("cache-refresh".into())
      .spawn(task)
    {
      tracing::warn!(%error, "failed to spawn refresh thread");
    }
    handle
  }

  /// Refreshes every key in `keys`. The result holds the keys that have a
  /// value once their refresh finishes.
  pub fn refresh_all<I>(&self, keys: I) -> BulkFuture<K, V>
  where
    I: IntoIterator<Item = K>,
  {
    let mut seen = HashSet::new();
    let members = keys
      .into_iter()
      .filter(|key| seen.insert(key.clone()))
      .map(|key| {
        let cell = self.refresh(&key).into_cell();
        BulkMember {
          key,
          cell,
          required: false,
        }
      })
      .collect();
    BulkFuture::join(HashMap::new(), members)
  }
}

/// An asynchronous cache that computes missing values with an
/// [`AsyncCacheLoader`].
///
/// Derefs to [`AsyncCache`] for every operation that does not involve the
/// loader.
pub struct AsyncLoadingCache<K, V, H = ahash::RandomState> {
  cache: AsyncCache<K, V, H>,
  loader: Arc<dyn AsyncCacheLoader<K, V>>,
}

impl<K, V, H> Clone for AsyncLoadingCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      loader: self.loader.clone(),
    }
  }
}

impl<K, V, H> fmt::Debug for AsyncLoadingCache<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncLoadingCache")
      .field("cache", &self.cache)
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Deref for AsyncLoadingCache<K, V, H> {
  type Target = AsyncCache<K, V, H>;

  fn deref(&self) -> &Self::Target {
    &self.cache
  }
}

impl<K, V, H> AsyncLoadingCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(cache: AsyncCache<K, V, H>, loader: Arc<dyn AsyncCacheLoader<K, V>>) -> Self {
    Self { cache, loader }
  }

  /// Returns the future for `key`, spawning a load if it is missing.
  pub fn get(&self, key: &K) -> CacheFuture<V> {
    let loader = &self.loader;
    self.cache.shared.get_or_spawn(key, |key| {
      loader
        .load(key)
        .map(|result| result.map_err(CacheError::load))
    })
  }

  /// Returns the values for `keys`, loading every missing one with a single
  /// call to [`AsyncCacheLoader::load_all`].
  pub fn get_all<I>(&self, keys: I) -> BulkFuture<K, V>
  where
    I: IntoIterator<Item = K>,
  {
    let loader = &self.loader;
    self.cache.shared.get_all_or_spawn(keys, |keys| {
      loader
        .load_all(keys)
        .map(|result| result.map_err(CacheError::load))
    })
  }

  /// Reloads `key` on the spawner. Same contract as
  /// [`LoadingCache::refresh`].
  pub fn refresh(&self, key: &K) -> CacheFuture<V> {
    let shared = &self.cache.shared;
    match shared.begin_refresh(key) {
      RefreshStart::Joined(handle) => handle,
      RefreshStart::Load(flight) => {
        let handle = flight.handle();
        let future = {
          let _scope = ComputeScope::enter(flight.cell());
          self.loader.load(flight.key())
        };
        shared.spawn(flight.run(future.map(|result| result.map_err(CacheError::load))));
        handle
      }
      RefreshStart::Reload(flight) => {
        let handle = flight.handle();
        let future = self.loader.reload(flight.key(), flight.old().clone());
        shared.spawn(flight.run(future.map(|result| result.map_err(CacheError::load))));
        handle
      }
    }
  }

  pub fn refresh_all<I>(&self, keys: I) -> BulkFuture<K, V>
  where
    I: IntoIterator<Item = K>,
  {
    let mut seen = HashSet::new();
    let members = keys
      .into_iter()
      .filter(|key| seen.insert(key.clone()))
      .map(|key| {
        let cell = self.refresh(&key).into_cell();
        BulkMember {
          key,
          cell,
          required: false,
        }
      })
      .collect();
    BulkFuture::join(HashMap::new(), members)
  }
}

pub mod maintenance_frequency;

use crate::error::BuildError;
use crate::handles::{AsyncCache, AsyncLoadingCache, Cache, LoadingCache};
use crate::listener::EvictionListener;
use crate::loader::{AsyncCacheLoader, CacheLoader};
use crate::metrics::{Metrics, StatsRecorder};
use crate::policy::lru::LruPolicy;
use crate::policy::null::NullPolicy;
use crate::policy::CachePolicy;
use crate::rng::FastRng;
use crate::runtime::TaskSpawner;
use crate::shared::{CacheShared, EventBuffers, Weigher};
use crate::store::ShardedStore;
use crate::task::janitor::Janitor;
use crate::task::notifier::Notifier;

use core::fmt;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

const DEFAULT_JANITOR_TICK: Duration = Duration::from_secs(1);

/// A builder for every kind of cache in this crate.
///
/// ```
/// use compute_cache::CacheBuilder;
///
/// let cache = CacheBuilder::<String, usize>::new()
///   .capacity(10_000)
///   .build()
///   .unwrap();
/// let len = cache.get_with(&"hello".to_string(), |key| key.len()).unwrap();
/// assert_eq!(*len, 5);
/// ```
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  capacity: u64,
  shards: usize,
  hasher: H,
  maintenance_frequency: u32,
  janitor_tick_interval: Option<Duration>,
  weigher: Option<Weigher<K, V>>,
  listener: Option<Arc<dyn EvictionListener<K, V>>>,
  cache_policy: Option<Arc<dyn CachePolicy<K>>>,
  stats_recorder: Option<Arc<dyn StatsRecorder>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
  _marker: PhantomData<fn(K) -> V>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("capacity", &self.capacity)
      .field("shards", &self.shards)
      .field("maintenance_frequency", &self.maintenance_frequency)
      .field("has_weigher", &self.weigher.is_some())
      .field("has_listener", &self.listener.is_some())
      .field("has_policy", &self.cache_policy.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
// This impl block has no restrictive bounds on K or V.
impl<K, V, H> CacheBuilder<K, V, H> {
  /// Sets the maximum total weight of the cache. Without a weigher every
  /// entry weighs 1, so this is the maximum number of entries.
  pub fn capacity(mut self, capacity: u64) -> Self {
    self.capacity = capacity;
    self
  }

  /// Sets the cache to be "unbounded". This is the default.
  pub fn unbounded(mut self) -> Self {
    self.capacity = u64::MAX;
    self
  }

  /// Sets the number of concurrent shards to use.
  pub fn shards(mut self, shards: usize) -> Self {
    // Zero is kept so that `build` can reject it.
    self.shards = match shards {
      0 => 0,
      n => n.next_power_of_two(),
    };
    self
  }

  /// Sets the function computing the weight of an entry. It is called once
  /// per stored value, outside any lock, and must be cheap.
  pub fn weigher<F>(mut self, weigher: F) -> Self
  where
    F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
  {
    self.weigher = Some(Arc::new(weigher));
    self
  }

  /// Sets the eviction listener for the cache.
  ///
  /// The listener runs on a dedicated thread and receives every value that
  /// leaves the cache, with the reason it left.
  pub fn eviction_listener<Listener>(mut self, listener: Listener) -> Self
  where
    Listener: EvictionListener<K, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Sets a custom eviction policy for the cache.
  ///
  /// By default, bounded caches use an `LruPolicy`.
  pub fn cache_policy<Policy>(mut self, policy: Policy) -> Self
  where
    Policy: CachePolicy<K> + 'static,
  {
    self.cache_policy = Some(Arc::new(policy));
    self
  }

  /// Forwards every statistics event to `recorder`, in addition to the
  /// built-in counters behind `metrics()`.
  pub fn stats_recorder<Recorder>(mut self, recorder: Recorder) -> Self
  where
    Recorder: StatsRecorder + 'static,
  {
    self.stats_recorder = Some(Arc::new(recorder));
    self
  }

  /// Sets the spawner that runs asynchronous computations.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Sets how often writes run maintenance themselves, as one in
  /// `frequency` writes on average. Rounded up to a power of two.
  ///
  /// See [`maintenance_frequency`] for presets.
  pub fn maintenance_frequency(mut self, frequency: u32) -> Self {
    self.maintenance_frequency = frequency.max(1).next_power_of_two();
    self
  }

  /// Sets the tick interval for the background cleanup task (janitor).
  /// (Primarily for testing purposes).
  #[doc(hidden)]
  pub fn janitor_tick_interval(mut self, duration: Duration) -> Self {
    self.janitor_tick_interval = Some(duration);
    self
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      capacity: u64::MAX,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: H::default(),
      maintenance_frequency: maintenance_frequency::RESPONSIVE,
      janitor_tick_interval: None,
      weigher: None,
      listener: None,
      cache_policy: None,
      stats_recorder: None,
      spawner: None,
      _marker: PhantomData,
    }
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(feature = "rapidhash")]
impl<K, V> CacheBuilder<K, V, rapidhash::RapidRandomState> {
  pub fn rapidhash() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
// This impl block contains the full set of trait bounds required to actually
// construct the cache.
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the hasher for the cache.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Builds a synchronous `Cache`.
  pub fn build(mut self) -> Result<Cache<K, V, H>, BuildError> {
    self.validate()?;
    let spawner = self.spawner.take();
    Ok(Cache::from_shared(self.build_shared_core(spawner)))
  }

  /// Builds a synchronous `LoadingCache` that computes values with `loader`.
  pub fn build_with_loader<L>(self, loader: L) -> Result<LoadingCache<K, V, H>, BuildError>
  where
    L: CacheLoader<K, V>,
  {
    let cache = self.build()?;
    Ok(LoadingCache::new(cache, Arc::new(loader)))
  }

  /// Builds an asynchronous `AsyncCache`.
  ///
  /// Uses the configured spawner, or the current Tokio runtime when the
  /// `tokio` feature is enabled.
  pub fn build_async(mut self) -> Result<AsyncCache<K, V, H>, BuildError> {
    self.validate()?;
    let spawner = self.async_spawner()?;
    Ok(AsyncCache::from_shared(self.build_shared_core(Some(spawner))))
  }

  /// Builds an `AsyncLoadingCache` that computes values with `loader`.
  pub fn build_async_with_loader<L>(
    self,
    loader: L,
  ) -> Result<AsyncLoadingCache<K, V, H>, BuildError>
  where
    L: AsyncCacheLoader<K, V>,
  {
    let cache = self.build_async()?;
    Ok(AsyncLoadingCache::new(cache, Arc::new(loader)))
  }

  fn async_spawner(&mut self) -> Result<Arc<dyn TaskSpawner>, BuildError> {
    if let Some(spawner) = self.spawner.take() {
      return Ok(spawner);
    }
    #[cfg(feature = "tokio")]
    {
      if let Some(spawner) = crate::runtime::TokioSpawner::try_current() {
        return Ok(Arc::new(spawner));
      }
    }
    Err(BuildError::SpawnerRequired)
  }

  /// Central logic to construct the shared core of the cache.
  fn build_shared_core(
    &mut self,
    spawner: Option<Arc<dyn TaskSpawner>>,
  ) -> Arc<CacheShared<K, V, H>> {
    let bounded = self.capacity != u64::MAX;

    // An unbounded cache without a custom policy has nobody to feed events to.
    let (policy, events): (Arc<dyn CachePolicy<K>>, _) = match self.cache_policy.take() {
      Some(policy) => (policy, Some(EventBuffers::new())),
      None if bounded => (Arc::new(LruPolicy::new()), Some(EventBuffers::new())),
      None => (Arc::new(NullPolicy), None),
    };

    let notifier = self.listener.take().map(Notifier::spawn);

    let shared = Arc::new(CacheShared {
      store: ShardedStore::new(self.shards, self.hasher.clone()),
      metrics: Metrics::new(),
      stats: self.stats_recorder.take(),
      policy,
      weigher: self.weigher.take(),
      bounded,
      capacity: AtomicU64::new(self.capacity),
      weighted_size: AtomicU64::new(0),
      events,
      maintenance_lock: Mutex::new(()),
      maintenance_frequency: self.maintenance_frequency,
      rng: FastRng::new(RandomState::new().hash_one(self.shards)),
      notifier,
      spawner,
      janitor: Mutex::new(None),
    });

    if bounded {
      let tick_interval = self.janitor_tick_interval.unwrap_or(DEFAULT_JANITOR_TICK);
      *shared.janitor.lock() = Some(Janitor::spawn(Arc::downgrade(&shared), tick_interval));
    }

    tracing::debug!(
      shards = self.shards,
      bounded,
      capacity = self.capacity,
      "cache built"
    );
    shared
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.capacity == 0 {
      return Err(BuildError::ZeroCapacity);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    Ok(())
  }
}

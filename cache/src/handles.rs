mod futures;
mod loading;
mod sync;

pub use futures::AsyncCache;
pub use loading::{AsyncLoadingCache, LoadingCache};
pub use sync::Cache;

use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Inspects and adjusts the size bound of a cache.
///
/// Must not be used from inside a mapping function, a loader or a listener.
pub struct PolicyHandle<K, V, H> {
  shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> PolicyHandle<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  /// Returns `true` if the cache evicts entries to stay within a capacity.
  pub fn is_bounded(&self) -> bool {
    self.shared.bounded
  }

  /// The maximum total weight, or `None` for an unbounded cache.
  pub fn capacity(&self) -> Option<u64> {
    self
      .shared
      .bounded
      .then(|| self.shared.capacity.load(Ordering::Relaxed))
  }

  /// Changes the maximum total weight and evicts down to it immediately.
  /// Has no effect on an unbounded cache.
  pub fn set_capacity(&self, capacity: u64) {
    if !self.shared.bounded {
      tracing::warn!("ignoring capacity change on an unbounded cache");
      return;
    }
    self.shared.capacity.store(capacity, Ordering::Relaxed);
    self.shared.clean_up();
  }

  /// The total weight of the resolved entries.
  pub fn weighted_size(&self) -> u64 {
    self.shared.weighted_size.load(Ordering::Relaxed)
  }
}

impl<K, V, H> fmt::Debug for PolicyHandle<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PolicyHandle")
      .field("bounded", &self.shared.bounded)
      .field("capacity", &self.shared.capacity.load(Ordering::Relaxed))
      .field("weighted_size", &self.shared.weighted_size.load(Ordering::Relaxed))
      .finish()
  }
}

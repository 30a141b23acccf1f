use std::fmt;
use std::sync::Arc;

/// Describes why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
  /// The eviction policy removed the entry to stay within capacity.
  Capacity,
  /// The entry was removed by `invalidate`, `remove` or a compute function
  /// that returned nothing.
  Invalidated,
  /// The value was overwritten by a put, a compute or a refresh.
  Replaced,
}

impl EvictionReason {
  /// Returns `true` if the cache removed the entry on its own.
  pub fn was_evicted(&self) -> bool {
    matches!(self, EvictionReason::Capacity)
  }
}

impl fmt::Display for EvictionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EvictionReason::Capacity => write!(f, "evicted due to capacity"),
      EvictionReason::Invalidated => write!(f, "manually invalidated"),
      EvictionReason::Replaced => write!(f, "value replaced"),
    }
  }
}

/// A listener that can be registered with the cache to receive notifications
/// when entries are removed or replaced.
///
/// `on_evict` is called on a dedicated background thread, so it never blocks
/// a cache operation and may safely call back into the cache.
pub trait EvictionListener<K, V>: Send + Sync {
  fn on_evict(&self, key: K, value: Arc<V>, reason: EvictionReason);
}

impl<K, V, F> EvictionListener<K, V> for F
where
  F: Fn(K, Arc<V>, EvictionReason) + Send + Sync,
{
  fn on_evict(&self, key: K, value: Arc<V>, reason: EvictionReason) {
    self(key, value, reason)
  }
}

pub mod fifo;
pub mod lru;
pub(crate) mod lru_list;
pub mod null;
#[cfg(feature = "random")]
pub mod random;

use crate::entry::CacheEntry;

use std::sync::Arc;

/// A buffered notification for the eviction policy.
///
/// Events are queued by cache operations and applied to the policy by the
/// single maintenance consumer, never from inside a per-key operation.
pub(crate) enum AccessEvent<K, V> {
  /// A lookup hit a resolved entry of the given weight.
  Read(K, u64),
  /// An entry became resolved, or its value was swapped.
  Write(K, Arc<CacheEntry<V>>),
  /// The resolved entry for the key was removed by an operation.
  Remove(K),
}

#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionDecision<K> {
  Admit,
  Reject,
  AdmitAndEvict(Vec<K>), // K is the key of the victim
}

/// A trait for implementing cache admission/eviction policies.
///
/// The policy tracks resolved entries by key and chooses victims when the
/// cache is over capacity. All calls come from the cache's maintenance pass,
/// one at a time, so a policy must never call back into the cache.
pub trait CachePolicy<K>: Send + Sync {
  /// Called when a resolved entry is read.
  fn on_access(&self, key: &K, weight: u64);

  /// Called when an entry is resolved, or its value replaced.
  ///
  /// `Reject` removes the new entry again. `AdmitAndEvict` keeps it and
  /// removes the listed victims.
  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K>;

  /// Called when a tracked entry is removed by an operation.
  fn on_remove(&self, key: &K);

  /// Called when the cache is over capacity.
  ///
  /// The policy must stop tracking and return victims whose combined weight
  /// is at least `weight_to_free`, or every key it has left.
  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64);

  /// Clears all state from the policy.
  fn clear(&self);
}

use crate::policy::{AdmissionDecision, CachePolicy};

/// The policy of unbounded caches. Tracks nothing and never evicts.
#[derive(Debug, Default)]
pub struct NullPolicy;

impl<K: Send + Sync> CachePolicy<K> for NullPolicy {
  fn on_access(&self, _key: &K, _weight: u64) {}

  fn on_admit(&self, _key: &K, _weight: u64) -> AdmissionDecision<K> {
    AdmissionDecision::Admit
  }

  fn on_remove(&self, _key: &K) {}

  fn evict(&self, _weight_to_free: u64) -> (Vec<K>, u64) {
    (Vec::new(), 0)
  }

  fn clear(&self) {}
}

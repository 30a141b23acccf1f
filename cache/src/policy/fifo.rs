use crate::policy::lru_list::LruList;
use crate::policy::{AdmissionDecision, CachePolicy};

use parking_lot::Mutex;
use std::hash::Hash;

/// An eviction policy that evicts entries in insertion order.
#[derive(Debug)]
pub struct FifoPolicy<K: Eq + Hash + Clone> {
  queue: Mutex<LruList<K>>,
}

impl<K: Eq + Hash + Clone> FifoPolicy<K> {
  pub fn new() -> Self {
    Self {
      queue: Mutex::new(LruList::new()),
    }
  }
}

impl<K: Eq + Hash + Clone> Default for FifoPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> CachePolicy<K> for FifoPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  /// Reads do not change the order.
  fn on_access(&self, _key: &K, _weight: u64) {}

  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K> {
    let mut queue = self.queue.lock();
    // A replaced value keeps its place in the queue.
    if !queue.set_weight(key, weight) {
      queue.push(key.clone(), weight);
    }
    AdmissionDecision::Admit
  }

  fn on_remove(&self, key: &K) {
    self.queue.lock().remove(key);
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64) {
    self.queue.lock().pop_weight(weight_to_free)
  }

  fn clear(&self) {
    self.queue.lock().clear();
  }
}

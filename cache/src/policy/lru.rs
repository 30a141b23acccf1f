use crate::policy::lru_list::LruList;
use crate::policy::{AdmissionDecision, CachePolicy};

use parking_lot::Mutex;
use std::hash::Hash;

/// An eviction policy that evicts the least recently used entries.
#[derive(Debug)]
pub struct LruPolicy<K: Eq + Hash + Clone> {
  list: Mutex<LruList<K>>,
}

impl<K: Eq + Hash + Clone> LruPolicy<K> {
  pub fn new() -> Self {
    Self {
      list: Mutex::new(LruList::new()),
    }
  }
}

impl<K: Eq + Hash + Clone> Default for LruPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> CachePolicy<K> for LruPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_access(&self, key: &K, _weight: u64) {
    self.list.lock().touch(key);
  }

  /// A newly resolved entry is the most recently used one.
  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K> {
    self.list.lock().push(key.clone(), weight);
    AdmissionDecision::Admit
  }

  fn on_remove(&self, key: &K) {
    self.list.lock().remove(key);
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64) {
    self.list.lock().pop_weight(weight_to_free)
  }

  fn clear(&self) {
    self.list.lock().clear();
  }
}

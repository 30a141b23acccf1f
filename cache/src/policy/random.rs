use crate::policy::{AdmissionDecision, CachePolicy};

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::hash::Hash;

/// An eviction policy that picks victims uniformly at random.
#[derive(Debug)]
pub struct RandomPolicy<K> {
  weights: Mutex<HashMap<K, u64>>,
}

impl<K> RandomPolicy<K> {
  pub fn new() -> Self {
    Self {
      weights: Mutex::new(HashMap::new()),
    }
  }
}

impl<K> Default for RandomPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> CachePolicy<K> for RandomPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_access(&self, _key: &K, _weight: u64) {}

  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K> {
    self.weights.lock().insert(key.clone(), weight);
    AdmissionDecision::Admit
  }

  fn on_remove(&self, key: &K) {
    self.weights.lock().remove(key);
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64) {
    let mut victims = Vec::new();
    let mut freed = 0;
    let mut weights = self.weights.lock();
    let mut rng = rand::rng();

    while freed < weight_to_free {
      let victim = match weights.keys().choose(&mut rng) {
        Some(key) => key.clone(),
        None => break,
      };
      if let Some(weight) = weights.remove(&victim) {
        freed += weight;
        victims.push(victim);
      }
    }

    (victims, freed)
  }

  fn clear(&self) {
    self.weights.lock().clear();
  }
}

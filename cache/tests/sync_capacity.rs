mod common;

use common::{build_test_cache, build_test_cache_with_cap, ShardControllingHasher};
use compute_cache::policy::fifo::FifoPolicy;
use compute_cache::policy::lru::LruPolicy;
use compute_cache::policy::random::RandomPolicy;
use compute_cache::policy::{AdmissionDecision, CachePolicy};
use compute_cache::{Cache, CacheBuilder};

use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_eviction_after_clean_up() {
  let cache = build_test_cache_with_cap(4, 2);
  cache.put(1, "A".to_string());
  cache.put(2, "B".to_string());
  cache.put(3, "C".to_string());

  cache.clean_up();

  assert_eq!(cache.estimated_size(), 2);
  assert!(cache.get_if_present(&3).is_some(), "the newest entry survives");
  let a_present = cache.get_if_present(&1).is_some();
  let b_present = cache.get_if_present(&2).is_some();
  assert!(a_present ^ b_present, "exactly one of A and B is evicted");
  assert_eq!(cache.metrics().evictions, 1);
  assert_eq!(cache.policy().weighted_size(), 2);
}

#[test]
fn test_janitor_evicts_without_explicit_clean_up() {
  let cache: Cache<i32, String, ShardControllingHasher> = CacheBuilder::new()
    .shards(4)
    .capacity(2)
    .hasher(ShardControllingHasher)
    .maintenance_frequency(1 << 30)
    .janitor_tick_interval(Duration::from_millis(10))
    .build()
    .unwrap();
  cache.put(1, "A".to_string());
  cache.put(2, "B".to_string());
  cache.put(3, "C".to_string());

  let deadline = Instant::now() + Duration::from_secs(2);
  while cache.estimated_size() > 2 && Instant::now() < deadline {
    thread::sleep(Duration::from_millis(10));
  }
  assert_eq!(cache.estimated_size(), 2);
  assert_eq!(cache.metrics().evictions, 1);
}

#[test]
fn test_lru_keeps_recently_read_entries() {
  let cache = build_test_cache_with_cap(4, 3);
  for i in 1..=3 {
    cache.put(i, i.to_string());
  }
  cache.clean_up();

  assert!(cache.get_if_present(&1).is_some());
  cache.clean_up();

  cache.put(4, "4".to_string());
  cache.clean_up();

  assert!(cache.get_if_present(&1).is_some());
  assert!(cache.get_if_present(&2).is_none(), "least recently used is evicted");
  assert!(cache.get_if_present(&3).is_some());
  assert!(cache.get_if_present(&4).is_some());
}

#[test]
fn test_weigher_bounds_total_weight() {
  let cache: Cache<i32, String> = CacheBuilder::new()
    .capacity(10)
    .weigher(|_key, value: &String| value.len() as u64)
    .build()
    .unwrap();

  cache.put(1, "aaaaaa".to_string());
  cache.put(2, "bbbbbb".to_string());
  cache.clean_up();

  assert!(cache.get_if_present(&1).is_none());
  assert_eq!(*cache.get_if_present(&2).unwrap(), "bbbbbb");
  assert_eq!(cache.policy().weighted_size(), 6);
  assert_eq!(cache.metrics().evicted_weight, 6);
}

#[test]
fn test_set_capacity_evicts_immediately() {
  let cache = build_test_cache_with_cap(4, 10);
  for i in 0..10 {
    cache.put(i, i.to_string());
  }
  cache.clean_up();
  assert_eq!(cache.estimated_size(), 10);

  let policy = cache.policy();
  assert!(policy.is_bounded());
  policy.set_capacity(5);
  assert_eq!(policy.capacity(), Some(5));
  assert_eq!(cache.estimated_size(), 5);
  assert_eq!(policy.weighted_size(), 5);
}

#[test]
fn test_unbounded_cache_never_evicts() {
  let cache = build_test_cache(4);
  for i in 0..1000 {
    cache.put(i, i.to_string());
  }
  cache.clean_up();
  assert_eq!(cache.estimated_size(), 1000);
  assert!(!cache.policy().is_bounded());
  assert_eq!(cache.policy().capacity(), None);
}

#[test]
fn test_fifo_policy_ignores_reads() {
  let cache: Cache<i32, String, ShardControllingHasher> = CacheBuilder::new()
    .capacity(2)
    .hasher(ShardControllingHasher)
    .cache_policy(FifoPolicy::new())
    .build()
    .unwrap();

  cache.put(1, "1".to_string());
  cache.put(2, "2".to_string());
  cache.clean_up();
  cache.get_if_present(&1);
  cache.put(3, "3".to_string());
  cache.clean_up();

  assert!(cache.get_if_present(&1).is_none(), "first in, first out");
  assert!(cache.get_if_present(&2).is_some());
  assert!(cache.get_if_present(&3).is_some());
}

#[test]
fn test_random_policy_respects_capacity() {
  let cache: Cache<i32, String> = CacheBuilder::new()
    .capacity(5)
    .cache_policy(RandomPolicy::new())
    .build()
    .unwrap();

  for i in 0..20 {
    cache.put(i, i.to_string());
  }
  cache.clean_up();
  assert_eq!(cache.estimated_size(), 5);
}

/// Admits only even keys.
struct EvenOnly(LruPolicy<i32>);

impl CachePolicy<i32> for EvenOnly {
  fn on_access(&self, key: &i32, weight: u64) {
    self.0.on_access(key, weight);
  }

  fn on_admit(&self, key: &i32, weight: u64) -> AdmissionDecision<i32> {
    if key % 2 == 0 {
      self.0.on_admit(key, weight)
    } else {
      AdmissionDecision::Reject
    }
  }

  fn on_remove(&self, key: &i32) {
    self.0.on_remove(key);
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<i32>, u64) {
    self.0.evict(weight_to_free)
  }

  fn clear(&self) {
    self.0.clear();
  }
}

#[test]
fn test_rejected_entries_are_removed() {
  let cache: Cache<i32, String> = CacheBuilder::new()
    .capacity(100)
    .cache_policy(EvenOnly(LruPolicy::new()))
    .build()
    .unwrap();

  for i in 0..6 {
    cache.put(i, i.to_string());
  }
  cache.clean_up();

  let mut keys: Vec<i32> = cache.iter().map(|(key, _)| key).collect();
  keys.sort();
  assert_eq!(keys, vec![0, 2, 4]);
  assert_eq!(cache.metrics().evictions, 3);
}

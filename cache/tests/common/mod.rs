#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};
use std::sync::mpsc;
use std::time::Duration;

use compute_cache::{AsyncCache, Cache, CacheBuilder, EvictionReason};

// A custom hasher that allows us to control which shard a key is assigned to.
// It simply uses the integer value of the key as its hash.
// For a 4-shard cache:
// - key 0 -> shard 0 (0 & 3 = 0)
// - key 1 -> shard 1 (1 & 3 = 1)
// - key 4 -> shard 0 (4 & 3 = 0)
#[derive(Clone, Default)]
pub struct ShardControllingHasher;
impl BuildHasher for ShardControllingHasher {
  type Hasher = TestHasher;
  fn build_hasher(&self) -> Self::Hasher {
    TestHasher(0)
  }
}
pub struct TestHasher(u64);
impl Hasher for TestHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_i32(&mut self, i: i32) {
    self.0 = i as u64;
  }
}

pub fn build_test_cache(shards: usize) -> Cache<i32, String, ShardControllingHasher> {
  CacheBuilder::new()
    .shards(shards)
    .hasher(ShardControllingHasher)
    .build()
    .unwrap()
}

// Helper to build a bounded cache for testing purposes.
pub fn build_test_cache_with_cap(
  shards: usize,
  capacity: u64,
) -> Cache<i32, String, ShardControllingHasher> {
  CacheBuilder::new()
    .shards(shards)
    .capacity(capacity)
    .hasher(ShardControllingHasher)
    .build()
    .unwrap()
}

pub fn build_test_async_cache(shards: usize) -> AsyncCache<i32, String, ShardControllingHasher> {
  CacheBuilder::new()
    .shards(shards)
    .hasher(ShardControllingHasher)
    .build_async()
    .unwrap()
}

/// Collects the listener notifications received within `timeout`.
pub fn drain_notifications<K, V>(
  receiver: &mpsc::Receiver<(K, V, EvictionReason)>,
  expected: usize,
  timeout: Duration,
) -> Vec<(K, V, EvictionReason)> {
  let mut received = Vec::new();
  while received.len() < expected {
    match receiver.recv_timeout(timeout) {
      Ok(notification) => received.push(notification),
      Err(_) => break,
    }
  }
  received
}

/// Installs a test subscriber so `RUST_LOG` shows the cache's tracing output.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

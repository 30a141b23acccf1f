use compute_cache::{
  policy::fifo::FifoPolicy, CacheBuilder, EvictionListener, EvictionReason,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// A simple listener that just prints removed entries.
struct MyListener;

impl EvictionListener<i32, String> for MyListener {
  fn on_evict(&self, key: i32, value: Arc<String>, reason: EvictionReason) {
    println!(
      "[Listener] Item removed! Key: {}, Value: '{}', Reason: {}",
      key, value, reason
    );
  }
}

fn main() {
  println!("--- Cache with Custom Policy (FIFO) and Eviction Listener ---");

  let cache = CacheBuilder::default()
    .capacity(3) // A small capacity to easily trigger evictions
    .shards(1)
    .cache_policy(FifoPolicy::new())
    .eviction_listener(MyListener)
    .build()
    .expect("Failed to build cache");

  cache.put(1, "one".to_string());
  cache.put(2, "two".to_string());
  cache.put(3, "three".to_string());
  println!("\nInserted keys 1, 2, 3. Cache is full.");

  // FIFO ignores reads, so this does not save key 1.
  println!("\nReading key 1...");
  cache.get_if_present(&1);

  println!("\nInserting key 4. This pushes the cache over capacity.");
  cache.put(4, "four".to_string());
  cache.clean_up();

  println!("\nReplacing key 3.");
  cache.put(3, "drei".to_string());

  // Give the listener thread a moment to print.
  thread::sleep(Duration::from_millis(100));

  assert!(cache.get_if_present(&1).is_none(), "Key 1 was inserted first");
  assert!(cache.get_if_present(&2).is_some());
  assert!(cache.get_if_present(&4).is_some());

  println!("\nWeighted size: {}", cache.policy().weighted_size());
  println!("\nCache metrics: {:#?}", cache.metrics());
}

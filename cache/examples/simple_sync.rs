use compute_cache::{Cache, CacheBuilder};

fn main() {
  // A cache bounded to 100 entries, evicting the least recently used.
  let cache: Cache<String, usize> = CacheBuilder::default()
    .capacity(100)
    .build()
    .expect("Failed to build cache");

  println!("Computing the length of 'hello' on a miss.");
  let value = cache
    .get_with(&"hello".to_string(), |key| {
      println!("  computing for '{}'", key);
      key.len()
    })
    .expect("computation failed");
  println!("Got {}", value);

  println!("\nAsking again. This is a hit, the function does not run.");
  let value = cache
    .get_with(&"hello".to_string(), |_| unreachable!())
    .expect("computation failed");
  println!("Got {}", value);

  println!("\nPutting ('world', 42) directly.");
  cache.put("world".to_string(), 42);
  println!("get_if_present(world) = {:?}", cache.get_if_present(&"world".to_string()));

  println!("\nInvalidating 'hello'.");
  cache.invalidate(&"hello".to_string());
  println!("get_if_present(hello) = {:?}", cache.get_if_present(&"hello".to_string()));

  println!("\nCache metrics: {:#?}", cache.metrics());
}

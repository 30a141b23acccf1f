use compute_cache::{AsyncLoadingCache, CacheBuilder};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::time::{sleep, Duration};

// A simulated database or slow external service.
async fn fetch_from_database(key: i32, load_count: Arc<AtomicUsize>) -> Option<String> {
  println!(
    "--- Database: Received request for key {}. Simulating slow query...",
    key
  );
  load_count.fetch_add(1, Ordering::SeqCst);
  sleep(Duration::from_millis(500)).await;
  let value = format!("value_for_{}", key);
  println!("--- Database: Responding with '{}' for key {}.", value, key);
  Some(value)
}

#[tokio::main]
async fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  let cache: AsyncLoadingCache<i32, String> = CacheBuilder::default()
    .capacity(10)
    .build_async_with_loader({
      let counter = load_counter.clone();
      move |key: &i32| {
        let fut = fetch_from_database(*key, counter.clone());
        async move { Ok::<_, std::io::Error>(fut.await) }
      }
    })
    .expect("Failed to build async cache");

  println!("--- Thundering Herd Demonstration ---");
  println!("Spawning 10 tasks to request the same key '42' at once.\n");

  let mut tasks = Vec::new();
  for i in 0..10 {
    let cache = cache.clone();
    tasks.push(tokio::spawn(async move {
      println!("[Task {}] Requesting key 42...", i);
      let value = cache.get(&42).await.unwrap().unwrap();
      println!("[Task {}] Received value: {}", i, value);
      assert_eq!(*value, "value_for_42");
    }));
  }

  for task in tasks {
    task.await.unwrap();
  }

  println!("\n--- Verification ---");
  println!(
    "Database function was called {} time(s).",
    load_counter.load(Ordering::SeqCst)
  );
  assert_eq!(load_counter.load(Ordering::SeqCst), 1);

  println!("\n--- Refresh ---");
  println!("Reloading key 42 in the background; readers keep the old value meanwhile.");
  let refresh = cache.refresh(&42);
  let current = cache.get(&42).await.unwrap().unwrap();
  println!("While refreshing: {}", current);
  let refreshed = refresh.await.unwrap().unwrap();
  println!("After refresh: {}", refreshed);
  assert_eq!(load_counter.load(Ordering::SeqCst), 2);

  println!("\n--- Bulk ---");
  let values = cache.get_all(vec![1, 2, 42]).await.unwrap();
  println!("Loaded {} values", values.len());

  println!("\nCache metrics: {:#?}", cache.metrics());
}

mod common;

use compute_cache::{BoxError, CacheBuilder, CacheError, CacheLoader};

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_sync_loader_basic() {
  // A counter to see how many times the loader is called.
  let load_count = Arc::new(AtomicUsize::new(0));

  let cache = CacheBuilder::default()
    .capacity(10)
    .build_with_loader({
      let load_count = load_count.clone();
      move |key: &i32| {
        load_count.fetch_add(1, Ordering::SeqCst);
        Ok::<_, io::Error>(Some(key * 10))
      }
    })
    .unwrap();

  // 1. First call on a missing key triggers the loader.
  let value = cache.get(&5).unwrap();
  assert_eq!(value.as_deref(), Some(&50));
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "Loader should be called once");
  assert_eq!(cache.metrics().misses, 1);
  assert_eq!(cache.metrics().inserts, 1);

  // 2. Second call is a hit and does not call the loader.
  let value = cache.get(&5).unwrap();
  assert_eq!(value.as_deref(), Some(&50));
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "Loader should NOT be called again");
  assert_eq!(cache.metrics().hits, 1);
}

#[test]
fn test_sync_loader_thundering_herd() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let num_threads = 20;

  let cache = CacheBuilder::default()
    .capacity(10)
    .build_with_loader({
      let load_count = load_count.clone();
      move |key: &i32| {
        // Simulate a slow database call or computation
        thread::sleep(Duration::from_millis(100));
        load_count.fetch_add(1, Ordering::SeqCst);
        Ok::<_, io::Error>(Some(key * 10))
      }
    })
    .unwrap();

  let barrier = Arc::new(Barrier::new(num_threads));
  let mut handles = vec![];

  for _ in 0..num_threads {
    let cache_clone = cache.clone();
    let barrier_clone = barrier.clone();
    handles.push(thread::spawn(move || {
      // All threads request the same missing key at once
      barrier_clone.wait();
      cache_clone.get(&42).unwrap()
    }));
  }

  for handle in handles {
    let value = handle.join().unwrap();
    assert_eq!(value.as_deref(), Some(&420));
  }

  assert_eq!(
    load_count.load(Ordering::SeqCst),
    1,
    "Loader should only be called once for a thundering herd"
  );
  assert_eq!(cache.metrics().load_successes, 1);
}

#[test]
fn test_waiters_share_the_failure() {
  let num_threads = 8;
  let barrier = Arc::new(Barrier::new(num_threads));
  let load_count = Arc::new(AtomicUsize::new(0));

  let cache = CacheBuilder::default()
    .build_with_loader({
      let load_count = load_count.clone();
      move |_: &i32| -> Result<Option<i32>, io::Error> {
        thread::sleep(Duration::from_millis(100));
        load_count.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::Other, "unavailable"))
      }
    })
    .unwrap();

  let handles: Vec<_> = (0..num_threads)
    .map(|_| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        cache.get(&1)
      })
    })
    .collect();

  let mut failures = 0;
  for handle in handles {
    if let Err(CacheError::Load(_)) = handle.join().unwrap() {
      failures += 1;
    }
  }
  // Threads arriving after the failure start a load of their own, which
  // also fails, so every caller sees an error.
  assert_eq!(failures, num_threads);
  assert!(load_count.load(Ordering::SeqCst) < num_threads);
  assert_eq!(cache.estimated_size(), 0, "a failed load must not leave an entry");
}

#[test]
fn test_recursive_get_of_same_key_fails() {
  let cache = CacheBuilder::<i32, i32>::default().build().unwrap();
  let inner = cache.clone();

  let result = cache.try_get_with(&1, |_| {
    let nested = inner.get_with(&1, |_| 0);
    assert!(matches!(nested, Err(CacheError::RecursiveUpdate)));
    Ok::<_, io::Error>(Some(1))
  });
  assert_eq!(result.unwrap().as_deref(), Some(&1));
}

#[test]
fn test_loader_may_load_other_keys() {
  let cache = CacheBuilder::<i32, i32>::default().build().unwrap();
  let inner = cache.clone();

  let value = cache
    .get_with(&10, |key| {
      let dependency = inner.get_with(&(key - 1), |k| k * 100).unwrap();
      *dependency + 1
    })
    .unwrap();
  assert_eq!(*value, 901);
  assert_eq!(cache.estimated_size(), 2);
}

#[test]
fn test_panic_releases_the_claim() {
  let cache = CacheBuilder::<i32, String>::default().build().unwrap();

  let result = panic::catch_unwind(AssertUnwindSafe(|| {
    cache.get_with(&1, |_| panic!("loader exploded"))
  }));
  assert!(result.is_err());
  assert!(cache.get_if_present(&1).is_none());
  assert_eq!(cache.estimated_size(), 0);

  let value = cache.get_with(&1, |_| "recovered".to_string()).unwrap();
  assert_eq!(*value, "recovered");
}

#[test]
fn test_waiter_observes_panic() {
  let cache = CacheBuilder::<i32, String>::default().build().unwrap();
  let barrier = Arc::new(Barrier::new(2));

  let owner = {
    let cache = cache.clone();
    let barrier = barrier.clone();
    thread::spawn(move || {
      let _ = cache.get_with(&1, |_| {
        barrier.wait();
        thread::sleep(Duration::from_millis(100));
        panic!("loader exploded");
      });
    })
  };

  barrier.wait();
  let waited = cache.try_get_with(&1, |_| Ok::<_, io::Error>(Some("late".to_string())));
  assert!(owner.join().is_err());
  match waited {
    Err(CacheError::Panicked) => {}
    other => panic!("expected the waiter to see the panic, got {:?}", other),
  }
}

struct Squares {
  bulk_calls: AtomicUsize,
}

impl CacheLoader<u64, u64> for Squares {
  fn load(&self, key: &u64) -> Result<Option<u64>, BoxError> {
    Ok(Some(key * key))
  }

  fn load_all(&self, keys: &[u64]) -> Result<HashMap<u64, u64>, BoxError> {
    self.bulk_calls.fetch_add(1, Ordering::SeqCst);
    Ok(keys.iter().map(|k| (*k, k * k)).collect())
  }
}

#[test]
fn test_loader_trait_implementation() {
  let cache = CacheBuilder::default()
    .build_with_loader(Squares {
      bulk_calls: AtomicUsize::new(0),
    })
    .unwrap();

  assert_eq!(cache.get(&3).unwrap().as_deref(), Some(&9));

  let values = cache.get_all(vec![2, 3, 4]).unwrap();
  assert_eq!(values.len(), 3);
  assert_eq!(*values[&4], 16);
  assert_eq!(cache.metrics().hits, 1, "key 3 was already loaded");
}

mod common;

use common::build_test_cache;
use compute_cache::{AsyncCache, BoxedTask, CacheBuilder, CacheError};

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_map_view_shares_entries_with_cache() {
  let cache = build_test_cache(4);
  let map = cache.as_map();

  assert!(map.is_empty());
  assert_eq!(map.insert(1, "one".to_string()), None);
  assert_eq!(*cache.get_if_present(&1).unwrap(), "one");

  cache.put(2, "two".to_string());
  assert!(map.contains_key(&2));
  assert_eq!(*map.get(&2).unwrap(), "two");
  assert_eq!(map.len(), 2);

  assert_eq!(*map.remove(&1).unwrap(), "one");
  assert!(!map.contains_key(&1));

  map.clear();
  assert!(map.is_empty());
  assert_eq!(cache.estimated_size(), 0);
}

#[test]
fn test_map_view_reads_are_not_counted() {
  let cache = build_test_cache(4);
  let map = cache.as_map();
  map.insert(1, "one".to_string());

  let _ = map.get(&1);
  let _ = map.get(&2);

  let metrics = cache.metrics();
  assert_eq!(metrics.hits, 0);
  assert_eq!(metrics.misses, 0);
}

#[test]
fn test_insert_if_absent_keeps_existing_value() {
  let cache = build_test_cache(4);
  let map = cache.as_map();

  assert_eq!(map.insert_if_absent(1, "first".to_string()).unwrap(), None);
  let existing = map.insert_if_absent(1, "second".to_string()).unwrap();
  assert_eq!(*existing.unwrap(), "first");
  assert_eq!(*map.get(&1).unwrap(), "first");
}

#[test]
fn test_compute_updates_and_removes() {
  let cache = build_test_cache(4);
  let map = cache.as_map();

  let value = map
    .compute(&1, |current| {
      assert!(current.is_none());
      Some("1".to_string())
    })
    .unwrap();
  assert_eq!(*value.unwrap(), "1");

  let value = map
    .compute(&1, |current| current.map(|value| format!("{}+1", value)))
    .unwrap();
  assert_eq!(*value.unwrap(), "1+1");

  let value = map.compute(&1, |_| None).unwrap();
  assert!(value.is_none());
  assert!(!map.contains_key(&1));
  assert_eq!(cache.metrics().invalidations, 1);
}

#[test]
fn test_compute_if_present_skips_missing_keys() {
  let cache = build_test_cache(4);
  let map = cache.as_map();
  let mut called = false;

  let value = map
    .compute_if_present(&1, |_| {
      called = true;
      Some("never".to_string())
    })
    .unwrap();
  assert!(value.is_none());
  assert!(!called);
  assert!(!map.contains_key(&1));

  map.insert(1, "a".to_string());
  let value = map
    .compute_if_present(&1, |current| Some(format!("{}b", current)))
    .unwrap();
  assert_eq!(*value.unwrap(), "ab");

  let value = map.compute_if_present(&1, |_| None).unwrap();
  assert!(value.is_none());
  assert!(map.is_empty());
}

#[test]
fn test_compute_if_absent_runs_once() {
  let cache = build_test_cache(4);
  let map = cache.as_map();

  let value = map.compute_if_absent(&1, |key| Some(key.to_string())).unwrap();
  assert_eq!(*value.unwrap(), "1");
  let value = map
    .compute_if_absent(&1, |_| panic!("value is already present"))
    .unwrap();
  assert_eq!(*value.unwrap(), "1");

  let value = map.compute_if_absent(&2, |_| None).unwrap();
  assert!(value.is_none());
  assert!(!map.contains_key(&2));
}

#[test]
fn test_recursive_compute_on_same_key_fails() {
  let cache = build_test_cache(4);
  let map = cache.as_map();

  let mut inner = None;
  let value = map
    .compute(&1, |_| {
      inner = Some(map.compute(&1, |_| Some("inner".to_string())));
      Some("outer".to_string())
    })
    .unwrap();

  assert_eq!(*value.unwrap(), "outer");
  assert!(matches!(inner, Some(Err(CacheError::RecursiveUpdate))));

  let mut inner = None;
  map
    .compute(&1, |_| {
      inner = Some(map.compute_if_present(&1, |_| Some("inner".to_string())));
      Some("again".to_string())
    })
    .unwrap();
  assert!(matches!(inner, Some(Err(CacheError::RecursiveUpdate))));
  assert_eq!(*map.get(&1).unwrap(), "again");
}

#[test]
fn test_recursive_compute_if_absent_fails() {
  let cache = build_test_cache(4);
  let map = cache.as_map();

  let mut inner = None;
  let value = map
    .compute_if_absent(&1, |key| {
      inner = Some(map.compute_if_absent(key, |_| Some("inner".to_string())));
      Some("outer".to_string())
    })
    .unwrap();
  assert_eq!(*value.unwrap(), "outer");
  assert!(matches!(inner, Some(Err(CacheError::RecursiveUpdate))));
}

#[test]
fn test_compute_on_other_key_inside_compute_succeeds() {
  let cache = build_test_cache(4);
  let map = cache.as_map();

  let value = map
    .compute(&1, |_| {
      let other = map.compute(&2, |_| Some("two".to_string())).unwrap();
      other.map(|value| format!("one after {}", value))
    })
    .unwrap();
  assert_eq!(*value.unwrap(), "one after two");
  assert_eq!(*map.get(&2).unwrap(), "two");
}

#[test]
fn test_concurrent_computes_are_serialized_per_key() {
  let cache = build_test_cache(4);
  cache.put(1, "0".to_string());
  let threads = 8;
  let rounds = 50;
  let barrier = Arc::new(Barrier::new(threads));
  let running = Arc::new(AtomicUsize::new(0));

  let handles: Vec<_> = (0..threads)
    .map(|_| {
      let map = cache.as_map();
      let barrier = barrier.clone();
      let running = running.clone();
      thread::spawn(move || {
        barrier.wait();
        for _ in 0..rounds {
          map
            .compute(&1, |current| {
              assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
              let next = current
                .map(|value| value.parse::<usize>().unwrap() + 1)
                .unwrap_or(0);
              thread::sleep(Duration::from_micros(10));
              running.fetch_sub(1, Ordering::SeqCst);
              Some(next.to_string())
            })
            .unwrap();
        }
      })
    })
    .collect();

  for handle in handles {
    handle.join().unwrap();
  }
  assert_eq!(
    *cache.get_if_present(&1).unwrap(),
    (threads * rounds).to_string()
  );
}

#[test]
fn test_compute_yields_to_invalidate_that_does_not_wait() {
  let cache: AsyncCache<i32, String> = CacheBuilder::new()
    .spawner(Arc::new(|_task: BoxedTask| {}))
    .build_async()
    .unwrap();
  let sync = cache.synchronous();
  sync.put(1, "v".to_string());

  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel::<()>();
  let computing = {
    let map = sync.as_map();
    thread::spawn(move || {
      map.compute(&1, move |current| {
        let current = current.map(|value| value.to_string());
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        current.map(|value| format!("{}!", value))
      })
    })
  };

  started_rx.recv().unwrap();
  assert_eq!(*cache.invalidate(&1).unwrap(), "v");
  release_tx.send(()).unwrap();

  // The invalidation lands after the compute, so the key stays absent.
  assert_eq!(computing.join().unwrap().unwrap(), None);
  assert!(sync.get_if_present(&1).is_none());
  assert!(sync.as_map().is_empty());
}

#[test]
fn test_compute_yields_to_invalidate_all() {
  let cache = build_test_cache(4);
  cache.put(1, "v".to_string());

  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel::<()>();
  let computing = {
    let map = cache.as_map();
    thread::spawn(move || {
      map.compute(&1, move |_| {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        Some("computed".to_string())
      })
    })
  };

  started_rx.recv().unwrap();
  cache.invalidate_all();
  release_tx.send(()).unwrap();

  assert_eq!(computing.join().unwrap().unwrap(), None);
  assert!(cache.get_if_present(&1).is_none());
  assert_eq!(cache.estimated_size(), 0);
}

#[test]
fn test_insert_if_absent_claims_key_after_failed_load() {
  let cache = build_test_cache(4);
  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel::<()>();

  let loading = {
    let cache = cache.clone();
    thread::spawn(move || {
      cache.try_get_with(&1, move |_| {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        Err::<Option<String>, _>(io::Error::other("backend down"))
      })
    })
  };
  started_rx.recv().unwrap();

  let inserting = {
    let map = cache.as_map();
    thread::spawn(move || map.insert_if_absent(1, "mine".to_string()))
  };
  thread::sleep(Duration::from_millis(50));
  release_tx.send(()).unwrap();

  assert!(matches!(loading.join().unwrap(), Err(CacheError::Load(_))));
  assert_eq!(inserting.join().unwrap().unwrap(), None);
  assert_eq!(*cache.get_if_present(&1).unwrap(), "mine");
}

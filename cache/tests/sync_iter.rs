mod common;

use common::build_test_cache;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

#[test]
fn test_iter_visits_every_resolved_entry_once() {
  let cache = build_test_cache(4);
  for i in 0..100 {
    cache.put(i, i.to_string());
  }

  let mut seen = HashSet::new();
  for (key, value) in &cache {
    assert_eq!(*value, key.to_string());
    assert!(seen.insert(key), "key {} yielded twice", key);
  }
  assert_eq!(seen.len(), 100);
  // Iteration is not a lookup.
  assert_eq!(cache.metrics().hits, 0);
}

#[test]
fn test_iter_skips_pending_entries() {
  let cache = build_test_cache(4);
  cache.put(1, "one".to_string());
  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel::<()>();

  let loader = {
    let cache = cache.clone();
    thread::spawn(move || {
      cache
        .get_with(&2, move |_| {
          started_tx.send(()).unwrap();
          release_rx.recv().unwrap();
          "two".to_string()
        })
        .unwrap()
    })
  };
  started_rx.recv().unwrap();

  let keys: Vec<i32> = cache.iter().map(|(key, _)| key).collect();
  assert_eq!(keys, vec![1]);
  assert_eq!(cache.estimated_size(), 2, "pending entries are counted");

  release_tx.send(()).unwrap();
  loader.join().unwrap();
  assert_eq!(cache.iter().count(), 2);
}

#[test]
fn test_iter_tolerates_concurrent_modification() {
  let cache = build_test_cache(4);
  for i in 0..40 {
    cache.put(i, i.to_string());
  }

  let mut iter = cache.iter();
  let first = iter.next().unwrap();

  // Remove everything else and replace one value mid-iteration.
  for i in 0..40 {
    if i != first.0 && i != 39 {
      cache.invalidate(&i);
    }
  }
  if first.0 != 39 {
    cache.put(39, "replaced".to_string());
  }

  let rest: Vec<_> = iter.collect();
  for (key, value) in &rest {
    assert_ne!(*key, first.0);
    assert_eq!(*key, 39, "removed entries are skipped");
    assert_eq!(**value, "replaced", "replaced entries show the current value");
  }
}

#[test]
fn test_iter_under_concurrent_writer() {
  let cache = build_test_cache(4);
  for i in 0..64 {
    cache.put(i, i.to_string());
  }

  let stop = Arc::new(AtomicBool::new(false));
  let writer = {
    let cache = cache.clone();
    let stop = stop.clone();
    thread::spawn(move || {
      let mut round = 0;
      while !stop.load(Ordering::Relaxed) {
        for i in 0..64 {
          if (i + round) % 3 == 0 {
            cache.invalidate(&i);
          } else {
            cache.put(i, i.to_string());
          }
        }
        round += 1;
      }
    })
  };

  for _ in 0..20 {
    let mut seen = HashSet::new();
    for (key, value) in cache.iter() {
      assert!((0..64).contains(&key));
      assert_eq!(*value, key.to_string());
      assert!(seen.insert(key), "key {} yielded twice in one pass", key);
    }
  }

  stop.store(true, Ordering::Relaxed);
  writer.join().unwrap();
}

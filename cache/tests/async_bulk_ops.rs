mod common;

use common::build_test_async_cache;
use compute_cache::CacheError;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

#[tokio::test]
async fn test_async_get_all_with_loads_only_missing_keys() {
  let cache = build_test_async_cache(4);
  cache.put(1, async { "one".to_string() }).await.unwrap();
  let requested = Arc::new(Mutex::new(Vec::new()));

  let values = {
    let requested = requested.clone();
    cache
      .get_all_with(vec![1, 2, 3], move |keys: &[i32]| {
        let mut keys = keys.to_vec();
        keys.sort();
        requested.lock().unwrap().extend(keys.iter().copied());
        async move {
          Ok::<_, io::Error>(
            keys
              .into_iter()
              .map(|key| (key, format!("loaded{}", key)))
              .collect::<HashMap<_, _>>(),
          )
        }
      })
      .await
      .unwrap()
  };

  assert_eq!(values.len(), 3);
  assert_eq!(*values[&1], "one");
  assert_eq!(*values[&3], "loaded3");
  assert_eq!(*requested.lock().unwrap(), vec![2, 3]);
  assert_eq!(cache.estimated_size(), 3);
}

#[tokio::test]
async fn test_async_get_all_with_joins_pending_keys() {
  let cache = build_test_async_cache(4);
  let (tx, rx) = oneshot::channel::<String>();
  let _pending = cache.get_with(&1, |_| async move { rx.await.unwrap() });

  let bulk = cache.get_all_with(vec![1, 2], |keys: &[i32]| {
    assert_eq!(keys, &[2]);
    async { Ok::<_, io::Error>(HashMap::from([(2, "two".to_string())])) }
  });
  assert!(!bulk.is_done());

  tx.send("one".to_string()).unwrap();
  let values = bulk.await.unwrap();
  assert_eq!(*values[&1], "one");
  assert_eq!(*values[&2], "two");
}

#[tokio::test]
async fn test_async_get_all_with_failure_fails_claimed_keys() {
  let cache = build_test_async_cache(4);

  let result = cache
    .get_all_with(vec![1, 2], |_| async {
      Err::<HashMap<i32, String>, _>(io::Error::other("bulk failed"))
    })
    .await;
  assert!(matches!(result, Err(CacheError::Load(_))));
  assert_eq!(cache.estimated_size(), 0);
  assert!(cache.get_if_present(&1).is_none());
}

#[tokio::test]
async fn test_async_get_all_with_stores_extra_keys() {
  let cache = build_test_async_cache(4);

  let values = cache
    .get_all_with(vec![1], |_| async {
      Ok::<_, io::Error>(HashMap::from([
        (1, "one".to_string()),
        (5, "five".to_string()),
      ]))
    })
    .await
    .unwrap();

  assert_eq!(values.len(), 1);
  let extra = cache.get_if_present(&5).unwrap().await.unwrap();
  assert_eq!(*extra.unwrap(), "five");
}

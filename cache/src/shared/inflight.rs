use super::CacheShared;
use crate::cell::{Outcome, ValueCell};
use crate::entry::{CacheEntry, EntryState};
use crate::error::CacheError;
use crate::future::CacheFuture;
use crate::policy::AccessEvent;

use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use futures_util::FutureExt;

/// Exclusive ownership of a pending entry.
///
/// Exactly one `InFlight` exists per pending entry. Completing it resolves
/// the entry; dropping it without completing releases the claim, failing
/// every waiter with `Panicked` (during unwinding) or `Cancelled`.
pub(crate) struct InFlight<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
  key: K,
  entry: Arc<CacheEntry<V>>,
  cell: Arc<ValueCell<V>>,
  started: Instant,
  record_load: bool,
  settled: bool,
}

impl<K, V, H> InFlight<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    shared: Arc<CacheShared<K, V, H>>,
    key: K,
    entry: Arc<CacheEntry<V>>,
    cell: Arc<ValueCell<V>>,
  ) -> Self {
    Self {
      shared,
      key,
      entry,
      cell,
      started: Instant::now(),
      record_load: true,
      settled: false,
    }
  }

  /// Completes without reporting a load to the statistics. Used for puts
  /// and compute functions, which are not loads.
  pub(crate) fn untracked(mut self) -> Self {
    self.record_load = false;
    self
  }

  pub(crate) fn key(&self) -> &K {
    &self.key
  }

  pub(crate) fn cell(&self) -> &Arc<ValueCell<V>> {
    &self.cell
  }

  pub(crate) fn handle(&self) -> CacheFuture<V> {
    CacheFuture::new(self.cell.clone())
  }

  /// Settles the entry with the computation's result.
  pub(crate) fn complete(mut self, result: Result<Option<V>, CacheError>) -> Outcome<V> {
    self.settled = true;
    self.settle(result)
  }

  /// Drives `future` to completion and settles the entry with its output.
  /// A panic inside the future fails the entry with `Panicked`.
  pub(crate) async fn run<Fut>(self, future: Fut)
  where
    Fut: Future<Output = Result<Option<V>, CacheError>> + Send,
  {
    let result = AssertUnwindSafe(future)
      .catch_unwind()
      .await
      .unwrap_or(Err(CacheError::Panicked));
    self.complete(result);
  }

  fn settle(&self, result: Result<Option<V>, CacheError>) -> Outcome<V> {
    let shared = &self.shared;
    let elapsed = self.started.elapsed();
    let mut installed = false;

    let outcome = match result {
      Ok(Some(value)) => {
        let value = Arc::new(value);
        let weight = shared.weigh(&self.key, &value);
        {
          let mut state = self.entry.state();
          if matches!(&*state, EntryState::Pending(cell) if Arc::ptr_eq(cell, &self.cell)) {
            *state = EntryState::Resolved {
              value: value.clone(),
              refresh: None,
            };
            self.entry.set_weight(weight);
            shared.weighted_size.fetch_add(weight, Ordering::Relaxed);
            installed = true;
          }
        }
        if self.record_load {
          shared.record_load_success(elapsed);
        }
        Outcome::Value(value)
      }
      Ok(None) => {
        self.discard();
        if self.record_load {
          shared.record_load_failure(elapsed);
        }
        Outcome::Empty
      }
      Err(error) => {
        tracing::debug!(%error, "computation failed, releasing the claim");
        self.discard();
        if self.record_load {
          shared.record_load_failure(elapsed);
        }
        Outcome::Failed(error)
      }
    };

    self.cell.complete(outcome.clone());

    if installed {
      shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
      shared.on_write(AccessEvent::Write(self.key.clone(), self.entry.clone()));
    }
    outcome
  }

  /// Rolls the entry back to absent if it still holds this computation.
  fn discard(&self) {
    let mut shard = self.shared.store.get_shard(&self.key).write();
    let mapped = shard
      .get(&self.key)
      .is_some_and(|current| Arc::ptr_eq(current, &self.entry));

    let mut state = self.entry.state();
    if matches!(&*state, EntryState::Pending(cell) if Arc::ptr_eq(cell, &self.cell)) {
      *state = EntryState::Removed;
      drop(state);
      if mapped {
        shard.remove(&self.key);
      }
    }
  }
}

impl<K, V, H> Drop for InFlight<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    self.settled = true;
    let error = if thread::panicking() {
      CacheError::Panicked
    } else {
      CacheError::Cancelled
    };
    self.settle(Err(error));
  }
}

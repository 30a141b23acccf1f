use super::{CacheShared, Claim, InFlight};
use crate::cell::{Outcome, ValueCell};
use crate::error::CacheError;
use crate::future::{BulkFuture, BulkMember};
use crate::scope::{self, ComputeScope};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;

/// The requested keys split by the state they were found in.
struct Partition<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  found: HashMap<K, Arc<V>>,
  waiting: Vec<(K, Arc<ValueCell<V>>)>,
  owned: Vec<InFlight<K, V, H>>,
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Deduplicates `keys` and claims every missing one.
  ///
  /// A key claimed concurrently by another caller lands in `waiting` and is
  /// never passed to this call's bulk function.
  fn partition(self: &Arc<Self>, keys: impl IntoIterator<Item = K>) -> Partition<K, V, H> {
    let mut seen = HashSet::new();
    let mut partition = Partition {
      found: HashMap::new(),
      waiting: Vec::new(),
      owned: Vec::new(),
    };
    let (mut hits, mut misses) = (0, 0);

    for key in keys {
      if !seen.insert(key.clone()) {
        continue;
      }
      match self.claim(&key) {
        Claim::Present(value, weight) => {
          hits += 1;
          self.on_read(&key, weight);
          partition.found.insert(key, value);
        }
        Claim::Waiting(cell) => {
          hits += 1;
          partition.waiting.push((key, cell));
        }
        Claim::Owner(flight) => {
          misses += 1;
          partition.owned.push(flight);
        }
      }
    }

    self.record_hits(hits);
    self.record_misses(misses);
    partition
  }

  /// Settles every owned key from one bulk result.
  ///
  /// Owned keys missing from the result are left absent. Extra keys are
  /// stored only where no entry exists. A failed bulk call fails every
  /// owned key with the same error.
  fn settle_bulk(
    self: &Arc<Self>,
    owned: Vec<InFlight<K, V, H>>,
    result: Result<HashMap<K, V>, CacheError>,
    started: Instant,
  ) -> Result<HashMap<K, Arc<V>>, CacheError> {
    let elapsed = started.elapsed();
    match result {
      Ok(mut loaded) => {
        let mut values = HashMap::with_capacity(owned.len());
        for flight in owned {
          let key = flight.key().clone();
          let value = loaded.remove(&key);
          if let Outcome::Value(value) = flight.untracked().complete(Ok(value)) {
            values.insert(key, value);
          }
        }
        for (key, value) in loaded {
          self.populate(key, value);
        }
        self.record_load_success(elapsed);
        Ok(values)
      }
      Err(error) => {
        tracing::debug!(%error, keys = owned.len(), "bulk computation failed");
        for flight in owned {
          flight.untracked().complete(Err(error.clone()));
        }
        self.record_load_failure(elapsed);
        Err(error)
      }
    }
  }

  /// Stores a value that was loaded without being requested.
  fn populate(self: &Arc<Self>, key: K, value: V) {
    if let Claim::Owner(flight) = self.claim(&key) {
      flight.untracked().complete(Ok(Some(value)));
    }
  }

  /// Blocking bulk get-or-compute. `f` is invoked once, with every key this
  /// call had to claim, or not at all.
  pub(crate) fn get_all_or_compute<F>(
    self: &Arc<Self>,
    keys: impl IntoIterator<Item = K>,
    f: F,
  ) -> Result<HashMap<K, Arc<V>>, CacheError>
  where
    F: FnOnce(&[K]) -> Result<HashMap<K, V>, CacheError>,
  {
    let Partition {
      mut found,
      waiting,
      owned,
    } = self.partition(keys);

    if !owned.is_empty() {
      let keys: Vec<K> = owned.iter().map(|flight| flight.key().clone()).collect();
      let started = Instant::now();
      let result = {
        let _scopes: Vec<ComputeScope> = owned
          .iter()
          .map(|flight| ComputeScope::enter(flight.cell()))
          .collect();
        f(&keys)
      };
      found.extend(self.settle_bulk(owned, result, started)?);
    }

    for (key, cell) in waiting {
      if scope::is_active(&cell) {
        return Err(CacheError::RecursiveUpdate);
      }
      if let Outcome::Value(value) = cell.wait() {
        found.insert(key, value);
      }
    }
    Ok(found)
  }

  /// Non-blocking bulk get-or-compute. The future returned by `f` runs on
  /// the spawner.
  pub(crate) fn get_all_or_spawn<F, Fut>(
    self: &Arc<Self>,
    keys: impl IntoIterator<Item = K>,
    f: F,
  ) -> BulkFuture<K, V>
  where
    F: FnOnce(&[K]) -> Fut,
    Fut: Future<Output = Result<HashMap<K, V>, CacheError>> + Send + 'static,
  {
    let Partition {
      found,
      waiting,
      owned,
    } = self.partition(keys);

    let mut members: Vec<BulkMember<K, V>> = waiting
      .into_iter()
      .map(|(key, cell)| BulkMember {
        key,
        cell,
        required: false,
      })
      .collect();

    if !owned.is_empty() {
      let keys: Vec<K> = owned.iter().map(|flight| flight.key().clone()).collect();
      let future = {
        let _scopes: Vec<ComputeScope> = owned
          .iter()
          .map(|flight| ComputeScope::enter(flight.cell()))
          .collect();
        f(&keys)
      };
      members.extend(owned.iter().map(|flight| BulkMember {
        key: flight.key().clone(),
        cell: flight.cell().clone(),
        required: true,
      }));

      let shared = self.clone();
      let started = Instant::now();
      self.spawn(async move {
        let result = AssertUnwindSafe(future)
          .catch_unwind()
          .await
          .unwrap_or(Err(CacheError::Panicked));
        let _ = shared.settle_bulk(owned, result, started);
      });
    }

    BulkFuture::join(found, members)
  }
}

use super::{CacheShared, Claim, InFlight};
use crate::cell::{Outcome, ValueCell};
use crate::entry::{CacheEntry, EntryState};
use crate::error::CacheError;
use crate::future::CacheFuture;
use crate::listener::EvictionReason;
use crate::policy::AccessEvent;

use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use futures_util::FutureExt;

/// What a refresh request has to do.
pub(crate) enum RefreshStart<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// A load or reload of the key is already running.
  Joined(CacheFuture<V>),
  /// The key was absent and is now claimed for a normal load.
  Load(InFlight<K, V, H>),
  /// The key has a value; a reload runs next to it.
  Reload(RefreshFlight<K, V, H>),
}

/// Ownership of a reload in progress.
///
/// The entry keeps serving `old` until the reload settles. Dropping the
/// flight without completing it fails the reload and keeps `old`.
pub(crate) struct RefreshFlight<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
  key: K,
  entry: Arc<CacheEntry<V>>,
  old: Arc<V>,
  cell: Arc<ValueCell<V>>,
  started: Instant,
  settled: bool,
}

impl<K, V, H> RefreshFlight<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn key(&self) -> &K {
    &self.key
  }

  pub(crate) fn old(&self) -> &Arc<V> {
    &self.old
  }

  pub(crate) fn handle(&self) -> CacheFuture<V> {
    CacheFuture::new(self.cell.clone())
  }

  pub(crate) fn complete(mut self, result: Result<Option<V>, CacheError>) -> Outcome<V> {
    self.settled = true;
    self.settle(result)
  }

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

  /// Clears the entry's refresh slot if it still holds this reload.
  fn release_slot(state: &mut EntryState<V>, cell: &Arc<ValueCell<V>>) {
    if let EntryState::Resolved { refresh, .. } = state {
      if refresh.as_ref().is_some_and(|current| Arc::ptr_eq(current, cell)) {
        *refresh = None;
      }
    }
  }

  fn settle(&self, result: Result<Option<V>, CacheError>) -> Outcome<V> {
    let shared = &self.shared;
    let elapsed = self.started.elapsed();

    let outcome = match result {
      Ok(Some(value)) => {
        let value = Arc::new(value);
        let weight = shared.weigh(&self.key, &value);
        let old_weight = {
          let mut state = self.entry.state();
          Self::release_slot(&mut state, &self.cell);
          match &mut *state {
            // Swap only if nothing replaced the value since the reload began.
            EntryState::Resolved { value: current, .. } if Arc::ptr_eq(current, &self.old) => {
              *current = value.clone();
              let old_weight = self.entry.weight();
              self.entry.set_weight(weight);
              shared.weighted_size.fetch_add(weight, Ordering::Relaxed);
              shared.weighted_size.fetch_sub(old_weight, Ordering::Relaxed);
              Some(old_weight)
            }
            _ => None,
          }
        };
        shared.record_load_success(elapsed);
        if let Some(old_weight) = old_weight {
          shared.record_removal(old_weight, EvictionReason::Replaced);
          shared.notify(self.key.clone(), self.old.clone(), EvictionReason::Replaced);
        }
        self.cell.complete(Outcome::Value(value.clone()));
        if old_weight.is_some() {
          shared.on_write(AccessEvent::Write(self.key.clone(), self.entry.clone()));
        }
        return Outcome::Value(value);
      }
      Ok(None) => {
        let unchanged = {
          let mut state = self.entry.state();
          Self::release_slot(&mut state, &self.cell);
          matches!(&*state, EntryState::Resolved { value, .. } if Arc::ptr_eq(value, &self.old))
        };
        shared.record_load_failure(elapsed);
        if unchanged {
          tracing::debug!("reload produced no value, removing the entry");
          let _ = shared.remove_entry(&self.key, &self.entry, EvictionReason::Invalidated);
        }
        Outcome::Empty
      }
      Err(error) => {
        Self::release_slot(&mut self.entry.state(), &self.cell);
        shared.record_load_failure(elapsed);
        tracing::warn!(%error, "refresh failed, keeping the previous value");
        Outcome::Failed(error)
      }
    };

    self.cell.complete(outcome.clone());
    outcome
  }
}

impl<K, V, H> Drop for RefreshFlight<K, V, H>
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

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Decides how to refresh `key`, registering a reload on its entry when
  /// one has to start. At most one reload per entry is in flight.
  pub(crate) fn begin_refresh(self: &Arc<Self>, key: &K) -> RefreshStart<K, V, H> {
    loop {
      let Some(entry) = self.store.get(key) else {
        match self.claim(key) {
          Claim::Owner(flight) => return RefreshStart::Load(flight),
          Claim::Present(..) | Claim::Waiting(_) => continue,
        }
      };

      let mut state = entry.state();
      match &mut *state {
        EntryState::Pending(cell) => return RefreshStart::Joined(CacheFuture::new(cell.clone())),
        EntryState::Resolved {
          refresh: Some(cell),
          ..
        } => return RefreshStart::Joined(CacheFuture::new(cell.clone())),
        EntryState::Resolved { value, refresh } => {
          let cell = Arc::new(ValueCell::new());
          *refresh = Some(cell.clone());
          let old = value.clone();
          drop(state);
          return RefreshStart::Reload(RefreshFlight {
            shared: self.clone(),
            key: key.clone(),
            entry,
            old,
            cell,
            started: Instant::now(),
            settled: false,
          });
        }
        EntryState::Removed => continue,
      }
    }
  }
}

use super::{CacheShared, Claim, InFlight};
use crate::cell::{Outcome, ValueCell};
use crate::entry::{CacheEntry, EntryState, EntryView};
use crate::error::CacheError;
use crate::future::CacheFuture;
use crate::listener::EvictionReason;
use crate::policy::AccessEvent;
use crate::scope::{self, ComputeScope};

use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// How a write treats a key whose value is still being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingMode {
  /// Block until the computation settles, then apply the write.
  Wait,
  /// Replace the pending entry immediately. Its waiters still receive the
  /// computed value, but it is not stored.
  Supersede,
}

/// How a compute-style write issued from inside the same key's computation
/// is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reentry {
  Fail,
  /// Replace the running computation's entry.
  Overwrite,
}

/// Whether a compute function runs for a key with no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbsentMode {
  Compute,
  Skip,
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Blocking get-or-compute.
  ///
  /// The owner of a missing key runs `f` with no lock held. Other callers
  /// block on the owner's cell and observe its outcome. With `retry_empty`,
  /// a caller whose awaited computation produced nothing tries to claim the
  /// key again instead of returning `None`.
  pub(crate) fn get_or_compute<F>(
    self: &Arc<Self>,
    key: &K,
    record_stats: bool,
    retry_empty: bool,
    f: F,
  ) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(&K) -> Result<Option<V>, CacheError>,
  {
    let mut f = Some(f);
    loop {
      match self.claim(key) {
        Claim::Present(value, weight) => {
          if record_stats {
            self.record_hits(1);
          }
          self.on_read(key, weight);
          return Ok(Some(value));
        }
        Claim::Waiting(cell) => {
          if scope::is_active(&cell) {
            return Err(CacheError::RecursiveUpdate);
          }
          if record_stats {
            self.record_hits(1);
          }
          match cell.wait() {
            Outcome::Value(value) => return Ok(Some(value)),
            Outcome::Empty if retry_empty => continue,
            Outcome::Empty => return Ok(None),
            Outcome::Failed(error) => return Err(error),
          }
        }
        Claim::Owner(flight) => {
          if record_stats {
            self.record_misses(1);
          }
          let Some(compute) = f.take() else {
            return Err(CacheError::Cancelled);
          };
          let result = {
            let _scope = ComputeScope::enter(flight.cell());
            compute(key)
          };
          return flight.complete(result).into_result();
        }
      }
    }
  }

  /// Non-blocking get-or-compute. The future returned by `f` runs on the
  /// spawner; every caller receives a handle to the same cell.
  pub(crate) fn get_or_spawn<F, Fut>(self: &Arc<Self>, key: &K, f: F) -> CacheFuture<V>
  where
    F: FnOnce(&K) -> Fut,
    Fut: Future<Output = Result<Option<V>, CacheError>> + Send + 'static,
  {
    match self.claim(key) {
      Claim::Present(value, weight) => {
        self.record_hits(1);
        self.on_read(key, weight);
        CacheFuture::ready(Outcome::Value(value))
      }
      Claim::Waiting(cell) => {
        self.record_hits(1);
        CacheFuture::new(cell)
      }
      Claim::Owner(flight) => {
        self.record_misses(1);
        let future = {
          let _scope = ComputeScope::enter(flight.cell());
          f(key)
        };
        let handle = flight.handle();
        self.spawn(flight.run(future));
        handle
      }
    }
  }

  /// Atomically recomputes the value for `key`.
  ///
  /// `f` sees the current value (or `None`) and returns the new one; `None`
  /// removes the mapping. `f` runs at most once, with no shard lock held,
  /// while other compute-style writers of the same key wait. Returns the
  /// value left in the cache.
  ///
  /// A compute issued from inside the key's own computation fails with
  /// `RecursiveUpdate`, unless `reentry` is `Overwrite`.
  pub(crate) fn compute<F>(
    self: &Arc<Self>,
    key: &K,
    absent: AbsentMode,
    reentry: Reentry,
    f: F,
  ) -> Result<Option<Arc<V>>, CacheError>
  where
    F: FnOnce(Option<&Arc<V>>) -> Option<V>,
  {
    let mut f = Some(f);
    loop {
      let Some(entry) = self.store.get(key) else {
        if absent == AbsentMode::Skip {
          return Ok(None);
        }
        match self.claim(key) {
          Claim::Owner(flight) => {
            let Some(compute) = f.take() else {
              return Err(CacheError::Cancelled);
            };
            let computed = {
              let _scope = ComputeScope::enter(flight.cell());
              compute(None)
            };
            return flight.untracked().complete(Ok(computed)).into_result();
          }
          Claim::Present(..) | Claim::Waiting(_) => continue,
        }
      };

      let resolved = match entry.view() {
        EntryView::Removed => continue,
        EntryView::Pending(cell) => {
          if !scope::is_active(&cell) {
            let _ = cell.wait();
            continue;
          }
          if reentry == Reentry::Fail {
            return Err(CacheError::RecursiveUpdate);
          }
          false
        }
        EntryView::Resolved(_) => true,
      };

      let reentrant = resolved && scope::is_active(&entry);
      if reentrant && reentry == Reentry::Fail {
        return Err(CacheError::RecursiveUpdate);
      }
      let _guard = (resolved && !reentrant).then(|| entry.lock_for_update());

      let previous = if resolved {
        match entry.value() {
          Some(value) => Some(value),
          None => continue,
        }
      } else {
        None
      };

      let Some(compute) = f.take() else {
        return Err(CacheError::Cancelled);
      };
      let computed = {
        let _scope = ComputeScope::enter(&entry);
        compute(previous.as_ref())
      };

      // A write that skipped the update lock may have changed the key while
      // `f` ran. The compute then counts as ordered before that write.
      return Ok(match computed {
        Some(value) => match self.install(key, Arc::new(value), &entry, previous.as_ref()) {
          Some((stored, _)) => Some(stored),
          None => self.current_value(key),
        },
        None => match self.remove_entry(key, &entry, EvictionReason::Invalidated) {
          Some(_) => None,
          None => self.current_value(key),
        },
      });
    }
  }

  /// Maps `key` to a fresh resolved entry in place of `expected`.
  ///
  /// Nothing is stored unless `expected` is still mapped in the state the
  /// caller saw: resolved when `previous` is set, pending otherwise. A
  /// refresh swapping the value in place does not count as a change.
  /// Returns the new value and the value it replaced.
  pub(crate) fn install(
    &self,
    key: &K,
    value: Arc<V>,
    expected: &Arc<CacheEntry<V>>,
    previous: Option<&Arc<V>>,
  ) -> Option<(Arc<V>, Option<Arc<V>>)> {
    let weight = self.weigh(key, &value);
    let entry = Arc::new(CacheEntry::resolved(value.clone(), weight));

    let replaced = {
      let mut shard = self.store.get_shard(key).write();
      let current = shard.get(key).filter(|current| Arc::ptr_eq(current, expected))?;
      let mut state = current.state();
      let unchanged = match &*state {
        EntryState::Resolved { .. } => previous.is_some(),
        EntryState::Pending(_) => previous.is_none(),
        EntryState::Removed => false,
      };
      if !unchanged {
        return None;
      }
      let prior = std::mem::replace(&mut *state, EntryState::Removed);
      let previous_weight = current.weight();
      drop(state);

      self.weighted_size.fetch_add(weight, Ordering::Relaxed);
      shard.insert(key.clone(), entry.clone());
      match prior {
        EntryState::Resolved { value, .. } => {
          self.weighted_size.fetch_sub(previous_weight, Ordering::Relaxed);
          Some((value, previous_weight))
        }
        EntryState::Pending(_) | EntryState::Removed => None,
      }
    };

    self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
    let replaced = replaced.map(|(old, old_weight)| {
      self.record_removal(old_weight, EvictionReason::Replaced);
      self.notify(key.clone(), old.clone(), EvictionReason::Replaced);
      old
    });
    self.on_write(AccessEvent::Write(key.clone(), entry));
    Some((value, replaced))
  }

  /// The resolved value mapped for `key`, without recording a read.
  fn current_value(&self, key: &K) -> Option<Arc<V>> {
    self.store.get(key).and_then(|entry| entry.value())
  }

  /// Stores `value` for `key`, returning the value it replaced.
  ///
  /// Waits for a pending computation of the key to settle first, unless
  /// called from inside that computation.
  pub(crate) fn put(self: &Arc<Self>, key: &K, value: V) -> Option<Arc<V>> {
    let mut replaced = None;
    let stored = self.compute(key, AbsentMode::Compute, Reentry::Overwrite, |current| {
      replaced = current.cloned();
      Some(value)
    });
    if let Err(error) = stored {
      tracing::warn!(%error, "put was not applied");
    }
    replaced
  }

  /// Stores `value` only if `key` has no value. Returns the existing value
  /// if there was one.
  ///
  /// A computation in progress for the key is waited for. If it ends
  /// without a value, the key is claimed again and `value` is stored.
  pub(crate) fn put_if_absent(
    self: &Arc<Self>,
    key: &K,
    value: V,
  ) -> Result<Option<Arc<V>>, CacheError> {
    let mut value = Some(value);
    loop {
      match self.claim(key) {
        Claim::Present(current, weight) => {
          self.on_read(key, weight);
          return Ok(Some(current));
        }
        Claim::Waiting(cell) => {
          if scope::is_active(&cell) {
            return Err(CacheError::RecursiveUpdate);
          }
          if let Outcome::Value(current) = cell.wait() {
            return Ok(Some(current));
          }
        }
        Claim::Owner(flight) => {
          let Some(value) = value.take() else {
            return Err(CacheError::Cancelled);
          };
          return flight
            .untracked()
            .complete(Ok(Some(value)))
            .into_result()
            .map(|_| None);
        }
      }
    }
  }

  /// Maps `key` to a pending entry settled by `future`.
  ///
  /// Any existing entry, pending or resolved, is replaced at once.
  pub(crate) fn put_future<Fut>(self: &Arc<Self>, key: K, future: Fut) -> CacheFuture<V>
  where
    Fut: Future<Output = Result<Option<V>, CacheError>> + Send + 'static,
  {
    let cell = Arc::new(ValueCell::new());
    let entry = Arc::new(CacheEntry::pending(cell.clone()));

    let replaced = {
      let mut shard = self.store.get_shard(&key).write();
      shard.insert(key.clone(), entry.clone()).and_then(|previous| {
        let prior = std::mem::replace(&mut *previous.state(), EntryState::Removed);
        match prior {
          EntryState::Resolved { value, .. } => {
            let previous_weight = previous.weight();
            self.weighted_size.fetch_sub(previous_weight, Ordering::Relaxed);
            Some((value, previous_weight))
          }
          EntryState::Pending(_) | EntryState::Removed => None,
        }
      })
    };

    if let Some((old, old_weight)) = replaced {
      self.record_removal(old_weight, EvictionReason::Replaced);
      self.notify(key.clone(), old, EvictionReason::Replaced);
      self.on_write(AccessEvent::Remove(key.clone()));
    }

    let flight = InFlight::new(self.clone(), key, entry, cell).untracked();
    let handle = flight.handle();
    self.spawn(flight.run(future));
    handle
  }

  /// Removes the mapping for `key`, returning the value it held.
  pub(crate) fn invalidate(&self, key: &K, pending: PendingMode) -> Option<Arc<V>> {
    loop {
      let entry = self.store.get(key)?;
      match entry.view() {
        EntryView::Removed => continue,
        EntryView::Pending(cell) => {
          if pending == PendingMode::Wait && !scope::is_active(&cell) {
            let _ = cell.wait();
            continue;
          }
          match self.remove_entry(key, &entry, EvictionReason::Invalidated) {
            Some(_) => return None,
            None => continue,
          }
        }
        EntryView::Resolved(_) => {
          let locked = pending == PendingMode::Wait && !scope::is_active(&entry);
          let _guard = locked.then(|| entry.lock_for_update());
          match self.remove_entry(key, &entry, EvictionReason::Invalidated) {
            Some(previous) => return previous,
            None => continue,
          }
        }
      }
    }
  }

  /// Removes every entry, pending ones included.
  pub(crate) fn invalidate_all(&self) {
    let mut removed = Vec::new();
    {
      let _maintenance = self.maintenance_lock.lock();
      for shard in self.store.iter_shards() {
        let mut shard = shard.write();
        for (key, entry) in shard.drain() {
          let prior = std::mem::replace(&mut *entry.state(), EntryState::Removed);
          if let EntryState::Resolved { value, .. } = prior {
            let weight = entry.weight();
            self.weighted_size.fetch_sub(weight, Ordering::Relaxed);
            removed.push((key, value, weight));
          }
        }
      }
      // Queued events refer to removed entries and are skipped when drained.
      self.policy.clear();
    }

    tracing::debug!(count = removed.len(), "invalidated all entries");
    for (key, value, weight) in removed {
      self.record_removal(weight, EvictionReason::Invalidated);
      self.notify(key, value, EvictionReason::Invalidated);
    }
  }
}

use crate::policy::{AccessEvent, AdmissionDecision};
use crate::shared::CacheShared;

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The max number of events of each kind to apply during cooperative
/// maintenance (e.g., on a write). Kept small so the caller stays fast.
pub(crate) const COOPERATIVE_MAINTENANCE_DRAIN_LIMIT: usize = 64;

/// The max number of events of each kind to apply during a janitor run.
/// This can be larger as it runs on a background thread.
const JANITOR_MAINTENANCE_DRAIN_LIMIT: usize = 1024;

/// The background thread that periodically drains the policy buffers and
/// enforces the capacity bound.
pub(crate) struct Janitor {
  stop_flag: Arc<AtomicBool>,
  _handle: Option<JoinHandle<()>>,
}

impl Janitor {
  /// Spawns a new janitor thread.
  ///
  /// The thread only holds a weak reference, so it never keeps the cache
  /// alive and exits on its own once the cache is dropped.
  pub(crate) fn spawn<K, V, H>(shared: Weak<CacheShared<K, V, H>>, tick_interval: Duration) -> Self
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();

    let handle = thread::Builder::new()
      .name("cache-janitor".into())
      .spawn(move || {
        while !stop_clone.load(Ordering::Relaxed) {
          thread::sleep(tick_interval);
          let Some(shared) = shared.upgrade() else {
            break;
          };
          if stop_clone.load(Ordering::Relaxed) {
            break;
          }
          let guard = shared.maintenance_lock.try_lock();
          if guard.is_some() {
            perform_maintenance(&shared, Some(JANITOR_MAINTENANCE_DRAIN_LIMIT));
          }
          drop(guard);
        }
        tracing::trace!("janitor thread exiting");
      })
      .map_err(|error| tracing::warn!(%error, "failed to spawn janitor thread"))
      .ok();

    Self {
      stop_flag,
      _handle: handle,
    }
  }

  /// Signals the janitor thread to stop. Does not join: the last reference
  /// to the cache may be released by the janitor itself.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Relaxed);
  }
}

/// Applies buffered access events to the policy, then evicts until the
/// cache is within capacity.
///
/// The caller must hold `maintenance_lock`. With `drain_limit` of `None`
/// every event buffered at the start of the pass is applied.
pub(crate) fn perform_maintenance<K, V, H>(
  shared: &CacheShared<K, V, H>,
  drain_limit: Option<usize>,
) where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  let Some(events) = &shared.events else {
    return;
  };
  let policy = &shared.policy;

  // 1. Reads only reorder the policy, so losing some is fine.
  let budget = drain_limit.unwrap_or_else(|| events.read_rx.len());
  for event in events.read_rx.try_iter().take(budget) {
    if let AccessEvent::Read(key, weight) = event {
      policy.on_access(&key, weight);
    }
  }

  // 2. Writes and removes are validated against the map: an event that
  // arrives after the entry changed again is stale.
  let budget = drain_limit.unwrap_or_else(|| events.write_rx.len());
  for event in events.write_rx.try_iter().take(budget) {
    match event {
      AccessEvent::Write(key, entry) => {
        if entry.value().is_none() {
          continue;
        }
        match policy.on_admit(&key, entry.weight()) {
          AdmissionDecision::Admit => {}
          AdmissionDecision::Reject => shared.evict_entry(&key, &entry),
          AdmissionDecision::AdmitAndEvict(victims) => {
            for victim in &victims {
              shared.evict_key(victim);
            }
          }
        }
      }
      AccessEvent::Remove(key) => {
        if !shared.is_resolved(&key) {
          policy.on_remove(&key);
        }
      }
      AccessEvent::Read(key, weight) => policy.on_access(&key, weight),
    }
  }

  // 3. Evict down to capacity.
  if !shared.bounded {
    return;
  }
  loop {
    let capacity = shared.capacity.load(Ordering::Relaxed);
    let current = shared.weighted_size.load(Ordering::Relaxed);
    if current <= capacity {
      break;
    }
    let (victims, freed) = policy.evict(current - capacity);
    if victims.is_empty() {
      break;
    }
    tracing::trace!(
      victims = victims.len(),
      freed,
      "evicting entries over capacity"
    );
    for victim in &victims {
      shared.evict_key(victim);
    }
  }
}

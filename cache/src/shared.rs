mod bulk;
mod inflight;
mod refresh;
mod write;

pub(crate) use inflight::InFlight;
pub(crate) use refresh::RefreshStart;
pub(crate) use write::{AbsentMode, PendingMode, Reentry};

use crate::cell::ValueCell;
use crate::entry::{CacheEntry, EntryState, EntryView};
use crate::error::CacheError;
use crate::listener::EvictionReason;
use crate::metrics::{Metrics, StatsRecorder};
use crate::policy::{AccessEvent, CachePolicy};
use crate::rng::FastRng;
use crate::runtime::TaskSpawner;
use crate::store::ShardedStore;
use crate::task::janitor::{self, Janitor, COOPERATIVE_MAINTENANCE_DRAIN_LIMIT};
use crate::task::notifier::Notifier;

use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// Capacity of the lossy buffer of read events.
pub(crate) const READ_BUFFER_CAPACITY: usize = 512;
/// Capacity of the lossless buffer of write and remove events.
pub(crate) const WRITE_BUFFER_CAPACITY: usize = 1024;
/// Buffered reads that make the next read try to run maintenance.
const READ_FLUSH_THRESHOLD: usize = READ_BUFFER_CAPACITY / 2;
/// Buffered writes that make the next write try to run maintenance.
const WRITE_FLUSH_THRESHOLD: usize = WRITE_BUFFER_CAPACITY / 4;

/// The queues between cache operations and the eviction policy.
pub(crate) struct EventBuffers<K, V> {
  read_tx: Sender<AccessEvent<K, V>>,
  pub(crate) read_rx: Receiver<AccessEvent<K, V>>,
  write_tx: Sender<AccessEvent<K, V>>,
  pub(crate) write_rx: Receiver<AccessEvent<K, V>>,
}

impl<K, V> EventBuffers<K, V> {
  pub(crate) fn new() -> Self {
    let (read_tx, read_rx) = crossbeam_channel::bounded(READ_BUFFER_CAPACITY);
    let (write_tx, write_rx) = crossbeam_channel::bounded(WRITE_BUFFER_CAPACITY);
    Self {
      read_tx,
      read_rx,
      write_tx,
      write_rx,
    }
  }
}

/// The result of trying to claim a key for computation.
pub(crate) enum Claim<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// The key has a value. Carries the entry weight for the read event.
  Present(Arc<V>, u64),
  /// Another computation owns the key.
  Waiting(Arc<ValueCell<V>>),
  /// The caller owns the key and must complete the computation.
  Owner(InFlight<K, V, H>),
}

/// An entry taken out of the map, with the state it had.
pub(crate) struct Detached<V> {
  prior: EntryState<V>,
  weight: u64,
}

/// The shared core behind every cache handle.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) metrics: Metrics,
  pub(crate) stats: Option<Arc<dyn StatsRecorder>>,
  pub(crate) policy: Arc<dyn CachePolicy<K>>,
  pub(crate) weigher: Option<Weigher<K, V>>,
  pub(crate) bounded: bool,
  pub(crate) capacity: AtomicU64,
  pub(crate) weighted_size: AtomicU64,
  pub(crate) events: Option<EventBuffers<K, V>>,
  pub(crate) maintenance_lock: Mutex<()>,
  pub(crate) maintenance_frequency: u32,
  pub(crate) rng: FastRng,
  pub(crate) notifier: Option<Notifier<K, V>>,
  pub(crate) spawner: Option<Arc<dyn TaskSpawner>>,
  pub(crate) janitor: Mutex<Option<Janitor>>,
}

impl<K, V, H> Drop for CacheShared<K, V, H> {
  fn drop(&mut self) {
    if let Some(janitor) = self.janitor.get_mut().take() {
      janitor.stop();
    }
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  // --- Statistics ---

  pub(crate) fn record_hits(&self, count: u64) {
    self.metrics.record_hits(count);
    if let Some(stats) = &self.stats {
      stats.record_hits(count);
    }
  }

  pub(crate) fn record_misses(&self, count: u64) {
    self.metrics.record_misses(count);
    if let Some(stats) = &self.stats {
      stats.record_misses(count);
    }
  }

  pub(crate) fn record_load_success(&self, elapsed: Duration) {
    self.metrics.record_load_success(elapsed);
    if let Some(stats) = &self.stats {
      stats.record_load_success(elapsed);
    }
  }

  pub(crate) fn record_load_failure(&self, elapsed: Duration) {
    self.metrics.record_load_failure(elapsed);
    if let Some(stats) = &self.stats {
      stats.record_load_failure(elapsed);
    }
  }

  fn record_removal(&self, weight: u64, reason: EvictionReason) {
    self.metrics.record_eviction(weight, reason);
    if let Some(stats) = &self.stats {
      stats.record_eviction(weight, reason);
    }
  }

  // --- Policy events and maintenance ---

  #[inline]
  pub(crate) fn weigh(&self, key: &K, value: &V) -> u64 {
    match &self.weigher {
      Some(weigher) => weigher(key, value),
      None => 1,
    }
  }

  /// Records a read of a resolved entry. Dropped if the buffer is full.
  pub(crate) fn on_read(&self, key: &K, weight: u64) {
    let Some(events) = &self.events else {
      return;
    };
    let _ = events.read_tx.try_send(AccessEvent::Read(key.clone(), weight));
    if events.read_rx.len() >= READ_FLUSH_THRESHOLD {
      self.try_maintenance(COOPERATIVE_MAINTENANCE_DRAIN_LIMIT);
    }
  }

  /// Queues a write or remove event. Never drops it: a full buffer is
  /// drained by the caller before retrying.
  ///
  /// Must not be called while holding a shard or entry lock.
  pub(crate) fn on_write(&self, event: AccessEvent<K, V>) {
    let Some(events) = &self.events else {
      return;
    };
    let mut event = event;
    loop {
      match events.write_tx.try_send(event) {
        Ok(()) => break,
        Err(TrySendError::Full(returned)) => {
          event = returned;
          self.try_maintenance(COOPERATIVE_MAINTENANCE_DRAIN_LIMIT);
          thread::yield_now();
        }
        Err(TrySendError::Disconnected(_)) => return,
      }
    }

    if events.write_rx.len() >= WRITE_FLUSH_THRESHOLD
      || self.rng.should_run(self.maintenance_frequency)
    {
      self.try_maintenance(COOPERATIVE_MAINTENANCE_DRAIN_LIMIT);
    }
  }

  /// Runs a bounded maintenance pass unless one is already running.
  pub(crate) fn try_maintenance(&self, drain_limit: usize) {
    if let Some(_guard) = self.maintenance_lock.try_lock() {
      janitor::perform_maintenance(self, Some(drain_limit));
    }
  }

  /// Applies every queued event and enforces the capacity bound.
  pub(crate) fn clean_up(&self) {
    let _guard = self.maintenance_lock.lock();
    janitor::perform_maintenance(self, None);
  }

  pub(crate) fn notify(&self, key: K, value: Arc<V>, reason: EvictionReason) {
    if let Some(notifier) = &self.notifier {
      notifier.notify(key, value, reason);
    }
  }

  /// Hands a task to the configured spawner.
  ///
  /// Without a spawner the task is dropped, which cancels any computation
  /// it owns.
  pub(crate) fn spawn<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match &self.spawner {
      Some(spawner) => spawner.spawn(Box::pin(task)),
      None => tracing::warn!("no task spawner configured, dropping background task"),
    }
  }

  // --- Lookups ---

  /// Returns the resolved value for `key`, recording a hit or a miss.
  pub(crate) fn get_if_present(&self, key: &K, record_stats: bool) -> Option<Arc<V>> {
    let found = self
      .store
      .get(key)
      .and_then(|entry| entry.value().map(|value| (value, entry.weight())));

    match found {
      Some((value, weight)) => {
        if record_stats {
          self.record_hits(1);
        }
        self.on_read(key, weight);
        Some(value)
      }
      None => {
        if record_stats {
          self.record_misses(1);
        }
        None
      }
    }
  }

  /// Returns the entry for `key`, installing a pending one if absent.
  ///
  /// The double check under the shard's write lock makes the claim atomic:
  /// at most one caller becomes the owner of a missing key.
  pub(crate) fn claim(self: &Arc<Self>, key: &K) -> Claim<K, V, H> {
    if let Some(entry) = self.store.get(key) {
      match entry.view() {
        EntryView::Resolved(value) => return Claim::Present(value, entry.weight()),
        EntryView::Pending(cell) => return Claim::Waiting(cell),
        EntryView::Removed => {}
      }
    }

    let mut shard = self.store.get_shard(key).write();
    if let Some(entry) = shard.get(key) {
      match entry.view() {
        EntryView::Resolved(value) => return Claim::Present(value, entry.weight()),
        EntryView::Pending(cell) => return Claim::Waiting(cell),
        EntryView::Removed => {}
      }
    }

    let cell = Arc::new(ValueCell::new());
    let entry = Arc::new(CacheEntry::pending(cell.clone()));
    shard.insert(key.clone(), entry.clone());
    drop(shard);

    Claim::Owner(InFlight::new(self.clone(), key.clone(), entry, cell))
  }

  // --- Removal ---

  /// Takes `entry` out of the map if it is still the one mapped for `key`.
  ///
  /// With `only_resolved`, pending entries are left in place.
  pub(crate) fn detach(
    &self,
    key: &K,
    entry: &Arc<CacheEntry<V>>,
    only_resolved: bool,
  ) -> Option<Detached<V>> {
    let mut shard = self.store.get_shard(key).write();
    match shard.get(key) {
      Some(current) if Arc::ptr_eq(current, entry) => {}
      _ => return None,
    }

    let mut state = entry.state();
    if only_resolved && !matches!(&*state, EntryState::Resolved { .. }) {
      return None;
    }
    let prior = std::mem::replace(&mut *state, EntryState::Removed);
    let weight = entry.weight();
    if matches!(prior, EntryState::Resolved { .. }) {
      self.weighted_size.fetch_sub(weight, Ordering::Relaxed);
    }
    drop(state);
    shard.remove(key);

    Some(Detached { prior, weight })
  }

  /// Reports a detached entry to the statistics, the listener and, when
  /// `emit_event` is set, the policy. Returns the value it held.
  pub(crate) fn finish_removal(
    &self,
    key: &K,
    detached: Detached<V>,
    reason: EvictionReason,
    emit_event: bool,
  ) -> Option<Arc<V>> {
    match detached.prior {
      EntryState::Resolved { value, .. } => {
        self.record_removal(detached.weight, reason);
        self.notify(key.clone(), value.clone(), reason);
        if emit_event {
          self.on_write(AccessEvent::Remove(key.clone()));
        }
        Some(value)
      }
      EntryState::Pending(_) | EntryState::Removed => None,
    }
  }

  /// Removes `entry` if it is still mapped for `key`.
  ///
  /// Returns `None` if the entry was no longer mapped, otherwise the value
  /// it held, if it was resolved.
  pub(crate) fn remove_entry(
    &self,
    key: &K,
    entry: &Arc<CacheEntry<V>>,
    reason: EvictionReason,
  ) -> Option<Option<Arc<V>>> {
    let detached = self.detach(key, entry, false)?;
    Some(self.finish_removal(key, detached, reason, true))
  }

  /// Removes the resolved entry for `key` on behalf of the eviction policy.
  ///
  /// The policy has already forgotten the key, so no event is queued.
  pub(crate) fn evict_key(&self, key: &K) {
    let Some(entry) = self.store.get(key) else {
      return;
    };
    if let Some(detached) = self.detach(key, &entry, true) {
      tracing::trace!(weight = detached.weight, "evicting entry to stay within capacity");
      self.finish_removal(key, detached, EvictionReason::Capacity, false);
    }
  }

  /// Evicts exactly `entry`, used when the policy rejects a new entry.
  pub(crate) fn evict_entry(&self, key: &K, entry: &Arc<CacheEntry<V>>) {
    if let Some(detached) = self.detach(key, entry, true) {
      self.finish_removal(key, detached, EvictionReason::Capacity, false);
    }
  }

  /// Returns `true` if `key` currently maps to a resolved entry.
  pub(crate) fn is_resolved(&self, key: &K) -> bool {
    self
      .store
      .get(key)
      .is_some_and(|entry| matches!(&*entry.state(), EntryState::Resolved { .. }))
  }

  pub(crate) fn fail(&self, error: CacheError) -> crate::future::CacheFuture<V> {
    crate::future::CacheFuture::ready(crate::cell::Outcome::Failed(error))
  }
}

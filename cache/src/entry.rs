use crate::cell::ValueCell;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

/// The value holder of an entry.
pub(crate) enum EntryState<V> {
  /// A computation has claimed the key and has not finished yet.
  Pending(Arc<ValueCell<V>>),
  /// The entry holds a value. `refresh` is set while a reload is in flight.
  Resolved {
    value: Arc<V>,
    refresh: Option<Arc<ValueCell<V>>>,
  },
  /// The entry has left the map and will never be reinserted.
  Removed,
}

/// A cheap copy of an entry's state, taken under its lock.
pub(crate) enum EntryView<V> {
  Pending(Arc<ValueCell<V>>),
  Resolved(Arc<V>),
  Removed,
}

/// The atomic unit of storage.
///
/// State transitions happen under `state`. Moving an entry to `Removed`
/// additionally requires the lock of the shard that maps it, so a removed
/// entry is never observed in the map under that lock. Compute-style updates
/// to a resolved entry are serialized through `update_lock`, which is never
/// acquired while a shard lock is held.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  state: Mutex<EntryState<V>>,
  weight: AtomicU64,
  update_lock: Mutex<()>,
}

impl<V> std::fmt::Debug for EntryState<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EntryState::Pending(_) => write!(f, "Pending"),
      EntryState::Resolved { refresh, .. } => f
        .debug_struct("Resolved")
        .field("refreshing", &refresh.is_some())
        .finish(),
      EntryState::Removed => write!(f, "Removed"),
    }
  }
}

impl<V> CacheEntry<V> {
  pub(crate) fn pending(cell: Arc<ValueCell<V>>) -> Self {
    Self {
      state: Mutex::new(EntryState::Pending(cell)),
      weight: AtomicU64::new(0),
      update_lock: Mutex::new(()),
    }
  }

  pub(crate) fn resolved(value: Arc<V>, weight: u64) -> Self {
    Self {
      state: Mutex::new(EntryState::Resolved {
        value,
        refresh: None,
      }),
      weight: AtomicU64::new(weight),
      update_lock: Mutex::new(()),
    }
  }

  #[inline]
  pub(crate) fn state(&self) -> MutexGuard<'_, EntryState<V>> {
    self.state.lock()
  }

  #[inline]
  pub(crate) fn view(&self) -> EntryView<V> {
    match &*self.state.lock() {
      EntryState::Pending(cell) => EntryView::Pending(cell.clone()),
      EntryState::Resolved { value, .. } => EntryView::Resolved(value.clone()),
      EntryState::Removed => EntryView::Removed,
    }
  }

  /// Returns the value if the entry is resolved.
  #[inline]
  pub(crate) fn value(&self) -> Option<Arc<V>> {
    match &*self.state.lock() {
      EntryState::Resolved { value, .. } => Some(value.clone()),
      _ => None,
    }
  }

  #[inline]
  pub(crate) fn weight(&self) -> u64 {
    self.weight.load(Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn set_weight(&self, weight: u64) {
    self.weight.store(weight, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn lock_for_update(&self) -> MutexGuard<'_, ()> {
    self.update_lock.lock()
  }
}

//! Contains types for iterating over a cache's contents.

use crate::cell::Outcome;
use crate::entry::{CacheEntry, EntryView};
use crate::future::CacheFuture;
use crate::shared::CacheShared;

use std::collections::VecDeque;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// Walks the shards in order, snapshotting one shard's entries at a time.
///
/// The snapshot holds the entry handles, not the values, so a value is read
/// when it is yielded rather than when its shard was scanned.
struct ShardCursor<K, V, H> {
  shared: Arc<CacheShared<K, V, H>>,
  shard_index: usize,
  buffer: VecDeque<(K, Arc<CacheEntry<V>>)>,
}

impl<K, V, H> ShardCursor<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self {
      shared,
      shard_index: 0,
      buffer: VecDeque::new(),
    }
  }

  fn next_view(&mut self) -> Option<(K, EntryView<V>)> {
    loop {
      if let Some((key, entry)) = self.buffer.pop_front() {
        let view = match entry.view() {
          // Removed since the snapshot: the key may have been re-mapped.
          EntryView::Removed => match self.shared.store.get(&key) {
            Some(current) => current.view(),
            None => continue,
          },
          view => view,
        };
        return Some((key, view));
      }

      if self.shard_index >= self.shared.store.num_shards() {
        return None;
      }
      let shard = self.shared.store.shard_at(self.shard_index).read();
      self.buffer.extend(
        shard
          .iter()
          .map(|(key, entry)| (key.clone(), entry.clone())),
      );
      drop(shard);
      self.shard_index += 1;
    }
  }
}

/// A weakly consistent iterator over the resolved entries of a cache.
///
/// It never fails because of concurrent modification and yields each key at
/// most once. An entry removed after its shard was scanned is skipped; an
/// entry replaced after that is yielded with its current value. Entries
/// still being computed are not yielded.
///
/// Iteration does not count as a read: it records no statistics and does not
/// affect eviction order.
pub struct Iter<K, V, H> {
  cursor: ShardCursor<K, V, H>,
}

impl<K, V, H> Iter<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self {
      cursor: ShardCursor::new(shared),
    }
  }
}

impl<K, V, H> Iterator for Iter<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  type Item = (K, Arc<V>);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      match self.cursor.next_view()? {
        (key, EntryView::Resolved(value)) => return Some((key, value)),
        _ => continue,
      }
    }
  }
}

impl<K, V, H> fmt::Debug for Iter<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Iter")
      .field("shard_index", &self.cursor.shard_index)
      .finish_non_exhaustive()
  }
}

/// A weakly consistent iterator over every entry of an asynchronous cache,
/// including the ones still being computed.
///
/// Resolved entries are yielded as completed futures.
pub struct FutureIter<K, V, H> {
  cursor: ShardCursor<K, V, H>,
}

impl<K, V, H> FutureIter<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self {
      cursor: ShardCursor::new(shared),
    }
  }
}

impl<K, V, H> Iterator for FutureIter<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  type Item = (K, CacheFuture<V>);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      match self.cursor.next_view()? {
        (key, EntryView::Resolved(value)) => {
          return Some((key, CacheFuture::ready(Outcome::Value(value))))
        }
        (key, EntryView::Pending(cell)) => return Some((key, CacheFuture::new(cell))),
        (_, EntryView::Removed) => continue,
      }
    }
  }
}

impl<K, V, H> fmt::Debug for FutureIter<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FutureIter")
      .field("shard_index", &self.cursor.shard_index)
      .finish_non_exhaustive()
  }
}

use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

pub(crate) type ShardMap<K, V, H> = HashMap<K, Arc<CacheEntry<V>>, H>;
pub(crate) type Shard<K, V, H> = RwLock<ShardMap<K, V, H>>;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// A store partitioned into independently locked shards.
///
/// Shard locks guard only the structure of the map. They are held for
/// lookups and insert/remove, never while user code runs.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Shard<K, V, H>>]>,
  hasher: H,
  mask: usize,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a store with `num_shards` shards, which must be a power of two.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let shard_map = HashMap::with_hasher(hasher.clone());
      shards.push(CachePadded::new(RwLock::new(shard_map)));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
      mask: num_shards - 1,
    }
  }

  #[inline]
  pub(crate) fn shard_index(&self, key: &K) -> usize {
    hash_key(&self.hasher, key) as usize & self.mask
  }

  /// Returns the lock guarding the shard for a given key.
  #[inline]
  pub(crate) fn get_shard(&self, key: &K) -> &Shard<K, V, H> {
    &self.shards[self.shard_index(key)]
  }

  #[inline]
  pub(crate) fn shard_at(&self, index: usize) -> &Shard<K, V, H> {
    &self.shards[index]
  }

  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }

  /// Returns a handle to the entry currently mapped for `key`.
  #[inline]
  pub(crate) fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.get_shard(key).read().get(key).cloned()
  }

  /// Returns an iterator over all the shard locks.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Shard<K, V, H>> {
    self.shards.iter().map(|padded_lock| &**padded_lock)
  }

  /// The number of mapped entries, pending ones included.
  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }
}

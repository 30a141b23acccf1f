use std::collections::HashMap;
use std::hash::Hash;

use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K> {
  key: K,
  weight: u64,
  newer: Option<Index>,
  older: Option<Index>,
}

/// A weighted recency list backed by an arena.
///
/// `newest` is the most recently pushed or touched key, `oldest` the next
/// candidate for eviction. All operations are O(1).
#[derive(Debug)]
pub(crate) struct LruList<K: Eq + Hash + Clone> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index>,
  newest: Option<Index>,
  oldest: Option<Index>,
  total_weight: u64,
}

impl<K: Eq + Hash + Clone> LruList<K> {
  pub(crate) fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::new(),
      newest: None,
      oldest: None,
      total_weight: 0,
    }
  }

  fn detach(&mut self, index: Index) {
    let (newer, older) = match self.nodes.get(index) {
      Some(node) => (node.newer, node.older),
      None => return,
    };
    match newer {
      Some(i) => self.nodes[i].older = older,
      None => self.newest = older,
    }
    match older {
      Some(i) => self.nodes[i].newer = newer,
      None => self.oldest = newer,
    }
  }

  fn attach_newest(&mut self, index: Index) {
    let previous = self.newest;
    self.nodes[index].older = previous;
    self.nodes[index].newer = None;
    match previous {
      Some(i) => self.nodes[i].newer = Some(index),
      None => self.oldest = Some(index),
    }
    self.newest = Some(index);
  }

  #[cfg(test)]
  pub(crate) fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.lookup.len()
  }

  #[cfg(test)]
  pub(crate) fn total_weight(&self) -> u64 {
    self.total_weight
  }

  /// Inserts `key` as the newest entry, or updates its weight and makes it
  /// the newest if already present.
  pub(crate) fn push(&mut self, key: K, weight: u64) {
    if let Some(&index) = self.lookup.get(&key) {
      let node = &mut self.nodes[index];
      self.total_weight = self.total_weight.saturating_sub(node.weight) + weight;
      node.weight = weight;
      self.touch(&key);
      return;
    }
    let index = self.nodes.insert(Node {
      key: key.clone(),
      weight,
      newer: None,
      older: None,
    });
    self.lookup.insert(key, index);
    self.total_weight += weight;
    self.attach_newest(index);
  }

  /// Updates the weight of a tracked key without changing its position.
  pub(crate) fn set_weight(&mut self, key: &K, weight: u64) -> bool {
    match self.lookup.get(key) {
      Some(&index) => {
        let node = &mut self.nodes[index];
        self.total_weight = self.total_weight.saturating_sub(node.weight) + weight;
        node.weight = weight;
        true
      }
      None => false,
    }
  }

  /// Marks `key` as the most recently used. Unknown keys are ignored.
  pub(crate) fn touch(&mut self, key: &K) {
    if let Some(&index) = self.lookup.get(key) {
      if self.newest != Some(index) {
        self.detach(index);
        self.attach_newest(index);
      }
    }
  }

  pub(crate) fn pop_oldest(&mut self) -> Option<(K, u64)> {
    let index = self.oldest?;
    let key = self.nodes.get(index)?.key.clone();
    let weight = self.remove(&key)?;
    Some((key, weight))
  }

  pub(crate) fn remove(&mut self, key: &K) -> Option<u64> {
    let index = self.lookup.remove(key)?;
    self.detach(index);
    let node = self.nodes.remove(index)?;
    self.total_weight = self.total_weight.saturating_sub(node.weight);
    Some(node.weight)
  }

  /// Pops the oldest entries until at least `weight_to_free` is released.
  pub(crate) fn pop_weight(&mut self, weight_to_free: u64) -> (Vec<K>, u64) {
    let mut victims = Vec::new();
    let mut freed = 0;
    while freed < weight_to_free {
      match self.pop_oldest() {
        Some((key, weight)) => {
          freed += weight;
          victims.push(key);
        }
        None => break,
      }
    }
    (victims, freed)
  }

  pub(crate) fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.newest = None;
    self.oldest = None;
    self.total_weight = 0;
  }

  /// Keys from newest to oldest.
  #[cfg(test)]
  pub(crate) fn keys(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.newest;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].older;
    }
    keys
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn push_orders_newest_first() {
    let mut list = LruList::new();
    list.push(10, 5);
    list.push(20, 2);
    assert_eq!(list.keys(), vec![20, 10], "newest item should be at the front");
    assert_eq!(list.total_weight(), 7);
    assert_eq!(list.len(), 2);
  }

  #[test]
  fn repush_updates_weight_and_recency() {
    let mut list = LruList::new();
    list.push(1, 10);
    list.push(2, 20);
    list.push(1, 5);
    assert_eq!(list.keys(), vec![1, 2]);
    assert_eq!(list.total_weight(), 25, "weight should be (30 - 10) + 5");
  }

  #[test]
  fn touch_moves_to_front_and_ignores_unknown() {
    let mut list = LruList::new();
    list.push(1, 1);
    list.push(2, 1);
    list.push(3, 1);
    list.touch(&1);
    list.touch(&99);
    assert_eq!(list.keys(), vec![1, 3, 2]);
  }

  #[test]
  fn pop_oldest_and_remove() {
    let mut list = LruList::new();
    list.push(1, 1);
    list.push(2, 2);
    list.push(3, 3);

    assert_eq!(list.pop_oldest(), Some((1, 1)));
    assert_eq!(list.remove(&3), Some(3));
    assert_eq!(list.remove(&3), None);
    assert_eq!(list.keys(), vec![2]);
    assert_eq!(list.total_weight(), 2);

    assert_eq!(list.pop_oldest(), Some((2, 2)));
    assert_eq!(list.pop_oldest(), None);
    assert!(list.keys().is_empty());
  }

  #[test]
  fn pop_weight_frees_at_least_requested() {
    let mut list = LruList::new();
    list.push(1, 1);
    list.push(2, 2);
    list.push(3, 3);

    let (victims, freed) = list.pop_weight(2);
    assert_eq!(victims, vec![1, 2]);
    assert_eq!(freed, 3);
    assert_eq!(list.keys(), vec![3]);

    list.clear();
    assert_eq!(list.pop_weight(10), (Vec::new(), 0));
    assert!(!list.contains(&3));
  }
}

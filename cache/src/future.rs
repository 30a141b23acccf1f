use crate::cell::{Outcome, ValueCell};
use crate::error::CacheError;
use crate::scope;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

/// A handle to a value that is being, or has been, computed by the cache.
///
/// Every handle for the same computation resolves to the same outcome. The
/// handle can be awaited, or waited on from a synchronous context.
pub struct CacheFuture<V> {
  cell: Arc<ValueCell<V>>,
}

impl<V> Clone for CacheFuture<V> {
  fn clone(&self) -> Self {
    Self {
      cell: self.cell.clone(),
    }
  }
}

impl<V> fmt::Debug for CacheFuture<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheFuture")
      .field("done", &self.cell.is_done())
      .finish()
  }
}

impl<V> CacheFuture<V> {
  pub(crate) fn new(cell: Arc<ValueCell<V>>) -> Self {
    Self { cell }
  }

  pub(crate) fn ready(outcome: Outcome<V>) -> Self {
    Self {
      cell: Arc::new(ValueCell::resolved(outcome)),
    }
  }

  pub(crate) fn into_cell(self) -> Arc<ValueCell<V>> {
    self.cell
  }

  /// Returns `true` once the computation has produced an outcome.
  pub fn is_done(&self) -> bool {
    self.cell.is_done()
  }

  /// Returns the outcome without blocking, or `None` while still running.
  pub fn try_get(&self) -> Option<Result<Option<Arc<V>>, CacheError>> {
    self.cell.try_outcome().map(Outcome::into_result)
  }

  /// Blocks the current thread until the computation finishes.
  ///
  /// Fails with `RecursiveUpdate` if called from inside the very
  /// computation this handle is waiting for.
  pub fn wait(&self) -> Result<Option<Arc<V>>, CacheError> {
    if !self.cell.is_done() && scope::is_active(&self.cell) {
      return Err(CacheError::RecursiveUpdate);
    }
    self.cell.wait().into_result()
  }
}

impl<V> Future for CacheFuture<V> {
  type Output = Result<Option<Arc<V>>, CacheError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.cell.poll_outcome(cx).map(Outcome::into_result)
  }
}

/// One member of a bulk result: the key and the cell it resolves through.
pub(crate) struct BulkMember<K, V> {
  pub(crate) key: K,
  pub(crate) cell: Arc<ValueCell<V>>,
  /// A failure of a required member fails the whole result.
  pub(crate) required: bool,
}

struct JoinState<K, V> {
  remaining: usize,
  values: HashMap<K, Arc<V>>,
  error: Option<CacheError>,
}

/// A handle to the combined result of a bulk lookup.
///
/// Resolves to the requested keys that have values. Keys whose computation
/// failed, or produced nothing, are left out.
pub struct BulkFuture<K, V> {
  cell: Arc<ValueCell<HashMap<K, Arc<V>>>>,
}

impl<K, V> Clone for BulkFuture<K, V> {
  fn clone(&self) -> Self {
    Self {
      cell: self.cell.clone(),
    }
  }
}

impl<K, V> fmt::Debug for BulkFuture<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BulkFuture")
      .field("done", &self.cell.is_done())
      .finish()
  }
}

impl<K, V> BulkFuture<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Joins the present values with the outcomes of the given members.
  ///
  /// Resolution is driven by continuations on the member cells, so nothing
  /// blocks or polls while members are still in flight.
  pub(crate) fn join(present: HashMap<K, Arc<V>>, members: Vec<BulkMember<K, V>>) -> Self {
    let cell = Arc::new(ValueCell::new());
    if members.is_empty() {
      cell.complete(Outcome::Value(Arc::new(present)));
      return Self { cell };
    }

    let state = Arc::new(Mutex::new(JoinState {
      remaining: members.len(),
      values: present,
      error: None,
    }));

    for member in members {
      let state = state.clone();
      let result = cell.clone();
      let BulkMember {
        key,
        cell: member_cell,
        required,
      } = member;

      member_cell.on_complete(move |outcome| {
        let finished = {
          let mut state = state.lock();
          match outcome {
            Outcome::Value(value) => {
              state.values.insert(key, value.clone());
            }
            Outcome::Empty => {}
            Outcome::Failed(error) => {
              if required && state.error.is_none() {
                state.error = Some(error.clone());
              }
            }
          }
          state.remaining -= 1;
          if state.remaining == 0 {
            Some(match state.error.take() {
              Some(error) => Outcome::Failed(error),
              None => Outcome::Value(Arc::new(std::mem::take(&mut state.values))),
            })
          } else {
            None
          }
        };
        if let Some(outcome) = finished {
          result.complete(outcome);
        }
      });
    }

    Self { cell }
  }

  /// Returns `true` once every member has finished.
  pub fn is_done(&self) -> bool {
    self.cell.is_done()
  }

  /// Blocks the current thread until every member has finished.
  pub fn wait(&self) -> Result<HashMap<K, Arc<V>>, CacheError> {
    Self::unwrap_outcome(self.cell.wait())
  }

  fn unwrap_outcome(outcome: Outcome<HashMap<K, Arc<V>>>) -> Result<HashMap<K, Arc<V>>, CacheError> {
    match outcome {
      Outcome::Value(map) => Ok(Arc::unwrap_or_clone(map)),
      Outcome::Empty => Ok(HashMap::new()),
      Outcome::Failed(error) => Err(error),
    }
  }
}

impl<K, V> Future for BulkFuture<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  type Output = Result<HashMap<K, Arc<V>>, CacheError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.cell.poll_outcome(cx).map(Self::unwrap_outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn join_omits_optional_failures() {
    let a = Arc::new(ValueCell::new());
    let b = Arc::new(ValueCell::new());
    let mut present = HashMap::new();
    present.insert(0, Arc::new("zero"));

    let joined = BulkFuture::join(
      present,
      vec![
        BulkMember { key: 1, cell: a.clone(), required: false },
        BulkMember { key: 2, cell: b.clone(), required: false },
      ],
    );
    assert!(!joined.is_done());

    a.complete(Outcome::Value(Arc::new("one")));
    b.complete(Outcome::Failed(CacheError::Cancelled));

    let map = joined.wait().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(**map.get(&1).unwrap(), "one");
    assert!(!map.contains_key(&2));
  }

  #[test]
  fn join_fails_on_required_failure() {
    let a = Arc::new(ValueCell::<u32>::new());
    let joined = BulkFuture::join(
      HashMap::new(),
      vec![BulkMember { key: 1, cell: a.clone(), required: true }],
    );
    a.complete(Outcome::Failed(CacheError::Panicked));
    assert!(matches!(joined.wait(), Err(CacheError::Panicked)));
  }

  #[test]
  fn future_resolves_when_polled() {
    let cell = Arc::new(ValueCell::new());
    let fut = CacheFuture::new(cell.clone());
    let waiter = std::thread::spawn(move || futures_executor::block_on(fut));
    cell.complete(Outcome::Value(Arc::new(7)));
    assert_eq!(*waiter.join().unwrap().unwrap().unwrap(), 7);
  }
}

use crate::error::CacheError;

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

use parking_lot::Mutex;

/// The terminal outcome of a single computation.
pub(crate) enum Outcome<T> {
  Value(Arc<T>),
  /// The computation finished without producing a value.
  Empty,
  Failed(CacheError),
}

impl<T> Clone for Outcome<T> {
  fn clone(&self) -> Self {
    match self {
      Outcome::Value(value) => Outcome::Value(value.clone()),
      Outcome::Empty => Outcome::Empty,
      Outcome::Failed(error) => Outcome::Failed(error.clone()),
    }
  }
}

impl<T> Outcome<T> {
  pub(crate) fn into_result(self) -> Result<Option<Arc<T>>, CacheError> {
    match self {
      Outcome::Value(value) => Ok(Some(value)),
      Outcome::Empty => Ok(None),
      Outcome::Failed(error) => Err(error),
    }
  }

  #[cfg(test)]
  pub(crate) fn value(&self) -> Option<&Arc<T>> {
    match self {
      Outcome::Value(value) => Some(value),
      _ => None,
    }
  }
}

/// Represents a waiter in the queue for a `ValueCell`.
enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

struct Inner<T> {
  outcome: Option<Outcome<T>>,
  waiters: VecDeque<Waiter>,
  continuations: Vec<Continuation<T>>,
}

/// A write-once slot holding the outcome of one computation.
///
/// Blocked threads, polled tasks and registered continuations all observe the
/// same outcome. Only the first call to `complete` has any effect.
pub(crate) struct ValueCell<T> {
  inner: Mutex<Inner<T>>,
}

impl<T> ValueCell<T> {
  /// Creates an unresolved cell.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        outcome: None,
        waiters: VecDeque::new(),
        continuations: Vec::new(),
      }),
    }
  }

  /// Creates a cell that is already resolved.
  pub(crate) fn resolved(outcome: Outcome<T>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        outcome: Some(outcome),
        waiters: VecDeque::new(),
        continuations: Vec::new(),
      }),
    }
  }

  /// Resolves the cell, waking every waiter and running every continuation.
  ///
  /// Returns `false` if the cell had already been resolved, in which case
  /// `outcome` is discarded.
  pub(crate) fn complete(&self, outcome: Outcome<T>) -> bool {
    let (waiters, continuations) = {
      let mut inner = self.inner.lock();
      if inner.outcome.is_some() {
        return false;
      }
      inner.outcome = Some(outcome.clone());
      (
        std::mem::take(&mut inner.waiters),
        std::mem::take(&mut inner.continuations),
      )
    };

    for waiter in waiters {
      waiter.wake();
    }
    for continuation in continuations {
      continuation(&outcome);
    }
    true
  }

  pub(crate) fn is_done(&self) -> bool {
    self.inner.lock().outcome.is_some()
  }

  pub(crate) fn try_outcome(&self) -> Option<Outcome<T>> {
    self.inner.lock().outcome.clone()
  }

  /// Blocks the current thread until the cell is resolved.
  pub(crate) fn wait(&self) -> Outcome<T> {
    loop {
      {
        let mut inner = self.inner.lock();
        if let Some(outcome) = &inner.outcome {
          return outcome.clone();
        }
        let me = thread::current();
        let queued = inner
          .waiters
          .iter()
          .any(|w| matches!(w, Waiter::Sync(t) if t.id() == me.id()));
        if !queued {
          inner.waiters.push_back(Waiter::Sync(me));
        }
      }
      // Spurious wakeups are handled by re-checking the outcome.
      thread::park();
    }
  }

  /// Polls for the outcome, registering the task's waker if still unresolved.
  pub(crate) fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Outcome<T>> {
    let mut inner = self.inner.lock();
    if let Some(outcome) = &inner.outcome {
      return Poll::Ready(outcome.clone());
    }
    let waker = cx.waker();
    let registered = inner
      .waiters
      .iter()
      .any(|w| matches!(w, Waiter::Async(existing) if existing.will_wake(waker)));
    if !registered {
      inner.waiters.push_back(Waiter::Async(waker.clone()));
    }
    Poll::Pending
  }

  /// Registers a continuation to run exactly once with the outcome.
  ///
  /// If the cell is already resolved the continuation runs immediately on
  /// the calling thread; otherwise it runs on the thread that resolves it,
  /// after the cell's lock has been released.
  pub(crate) fn on_complete<F>(&self, continuation: F)
  where
    F: FnOnce(&Outcome<T>) + Send + 'static,
  {
    let outcome = {
      let mut inner = self.inner.lock();
      match &inner.outcome {
        Some(outcome) => outcome.clone(),
        None => {
          inner.continuations.push(Box::new(continuation));
          return;
        }
      }
    };
    continuation(&outcome);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Barrier;
  use std::time::Duration;

  #[test]
  fn first_completion_wins() {
    let cell = ValueCell::new();
    assert!(cell.complete(Outcome::Value(Arc::new(1))));
    assert!(!cell.complete(Outcome::Value(Arc::new(2))));
    assert!(!cell.complete(Outcome::Empty));

    match cell.try_outcome() {
      Some(Outcome::Value(v)) => assert_eq!(*v, 1),
      _ => panic!("expected the first value to stick"),
    }
  }

  #[test]
  fn blocked_threads_observe_same_value() {
    let cell = Arc::new(ValueCell::<String>::new());
    let barrier = Arc::new(Barrier::new(9));
    let mut handles = Vec::new();

    for _ in 0..8 {
      let cell = cell.clone();
      let barrier = barrier.clone();
      handles.push(thread::spawn(move || {
        barrier.wait();
        cell.wait().value().cloned()
      }));
    }

    barrier.wait();
    thread::sleep(Duration::from_millis(20));
    cell.complete(Outcome::Value(Arc::new("done".to_string())));

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = results[0].clone().expect("value");
    for result in results {
      assert!(Arc::ptr_eq(&first, &result.expect("value")));
    }
  }

  #[test]
  fn continuations_run_once_before_and_after_completion() {
    let cell = ValueCell::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    cell.on_complete(move |outcome| {
      assert!(matches!(outcome, Outcome::Failed(CacheError::Cancelled)));
      c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    cell.complete(Outcome::Failed(CacheError::Cancelled));
    cell.complete(Outcome::Empty);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let c = calls.clone();
    cell.on_complete(move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 2, "late continuation runs inline");
  }
}

use std::{future::Future, pin::Pin};

/// A type-erased background task: an async load, an async put or a refresh.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs the background tasks of an [`AsyncCache`](crate::AsyncCache).
///
/// A task that is dropped without being polled to completion fails the
/// computation it drives with `CacheError::Cancelled`.
pub trait TaskSpawner: Send + Sync + 'static {
  fn spawn(&self, task: BoxedTask);
}

/// Any `Fn(BoxedTask)` closure is a spawner, e.g. one that forwards to an
/// executor the cache does not know about.
impl<F> TaskSpawner for F
where
  F: Fn(BoxedTask) + Send + Sync + 'static,
{
  fn spawn(&self, task: BoxedTask) {
    self(task)
  }
}

/// Spawns cache tasks onto a Tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Uses the runtime of the current context.
  ///
  /// Panics outside of a Tokio runtime; see [`TokioSpawner::try_current`].
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, task: BoxedTask) {
    self.0.spawn(task);
  }
}

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// The boxed error type accepted from user-supplied mapping functions and loaders.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The cache was configured with a capacity of zero, which is not allowed
  /// for a bounded cache. Use `unbounded()` for an unbounded cache.
  #[error("bounded cache capacity cannot be zero")]
  ZeroCapacity,
  /// The cache was configured with zero shards, which is not allowed.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// An asynchronous cache was requested, but no `TaskSpawner` was configured
  /// and no Tokio runtime is available to default to.
  #[error("an async cache requires a task spawner or a running tokio runtime")]
  SpawnerRequired,
}

/// Errors observed while resolving a value through the cache.
///
/// A single failure is shared by every caller waiting on the same in-flight
/// computation, so this type is cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// A computation attempted to resolve a key that the same thread is
  /// already resolving. Waiting would never complete.
  #[error("recursive update: the key is already being computed by this thread")]
  RecursiveUpdate,
  /// The mapping function or loader returned an error.
  #[error("load failed: {0}")]
  Load(Arc<dyn StdError + Send + Sync + 'static>),
  /// The mapping function panicked while computing the value.
  #[error("the mapping function panicked")]
  Panicked,
  /// The computation was dropped before it produced an outcome.
  #[error("the computation was cancelled before completing")]
  Cancelled,
}

impl CacheError {
  pub(crate) fn load(error: impl Into<BoxError>) -> Self {
    CacheError::Load(Arc::from(error.into()))
  }

  /// Returns `true` if this error was produced by the user's function rather
  /// than by the cache itself.
  pub fn is_load_failure(&self) -> bool {
    matches!(self, CacheError::Load(_) | CacheError::Panicked)
  }
}

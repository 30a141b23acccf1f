//! A concurrent compute cache with at-most-once loading per key.
//!
//! # Features
//! - **Single computation per key**: concurrent misses on the same key share
//!   one computation and its outcome, success or failure.
//! - **Sync & Async**: blocking [`Cache`] / [`LoadingCache`] and future-based
//!   [`AsyncCache`] / [`AsyncLoadingCache`] over the same entry model.
//! - **Bulk loads**: missing keys of a batch are loaded with one call, and
//!   keys already being loaded elsewhere are joined instead of reloaded.
//! - **Refresh in place**: readers keep the old value while a reload runs.
//! - **Non-Clone Support**: stores values in an `Arc<V>`, avoiding `V: Clone` bounds.
//! - **Pluggable eviction**: weight-bounded with LRU by default, or any
//!   [`CachePolicy`](policy::CachePolicy).
//! - **Observability**: built-in [`MetricsSnapshot`] plus an optional
//!   [`StatsRecorder`].
//!
//! ```
//! use compute_cache::{CacheBuilder, LoadingCache};
//!
//! let cache: LoadingCache<u64, u64> = CacheBuilder::default()
//!   .capacity(100)
//!   .build_with_loader(|key: &u64| Ok::<_, std::io::Error>(Some(key * 2)))
//!   .unwrap();
//!
//! assert_eq!(cache.get(&21).unwrap().as_deref(), Some(&42));
//! assert_eq!(cache.get_if_present(&21).as_deref(), Some(&42));
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod future;
pub mod handles;
pub mod iter;
pub mod listener;
pub mod loader;
pub mod map;
pub mod metrics;
pub mod policy;
pub mod runtime;

// Internal, crate-only modules
mod cell;
mod entry;
mod rng;
mod scope;
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use error::{BoxError, BuildError, CacheError};
pub use future::{BulkFuture, CacheFuture};
pub use handles::{AsyncCache, AsyncLoadingCache, Cache, LoadingCache, PolicyHandle};
pub use listener::{EvictionListener, EvictionReason};
pub use loader::{AsyncCacheLoader, CacheLoader};
pub use map::{AsyncMapView, MapView};
pub use metrics::{MetricsSnapshot, StatsRecorder};
pub use runtime::{BoxedTask, TaskSpawner};
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;

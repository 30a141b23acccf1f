use crate::listener::EvictionReason;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

/// Receives statistics events from the cache.
///
/// Recording is one-way: implementations must be cheap and must not call
/// back into the cache.
pub trait StatsRecorder: Send + Sync {
  fn record_hits(&self, count: u64);
  fn record_misses(&self, count: u64);
  fn record_load_success(&self, load_time: Duration);
  fn record_load_failure(&self, load_time: Duration);
  fn record_eviction(&self, weight: u64, reason: EvictionReason);
}

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Loads ---
  pub(crate) load_successes: CachePadded<AtomicU64>,
  pub(crate) load_failures: CachePadded<AtomicU64>,
  pub(crate) total_load_nanos: CachePadded<AtomicU64>,

  // --- Throughput ---
  pub(crate) inserts: CachePadded<AtomicU64>,

  // --- Removals ---
  pub(crate) evictions: CachePadded<AtomicU64>,
  pub(crate) evicted_weight: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,
  pub(crate) replacements: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      load_successes: CachePadded::new(AtomicU64::new(0)),
      load_failures: CachePadded::new(AtomicU64::new(0)),
      total_load_nanos: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      evictions: CachePadded::new(AtomicU64::new(0)),
      evicted_weight: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      replacements: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

/// Mean load time, in whole nanoseconds.
fn average_penalty(total_load_nanos: u64, total_loads: u64) -> Duration {
  match total_load_nanos.checked_div(total_loads) {
    Some(nanos) => Duration::from_nanos(nanos),
    None => Duration::ZERO,
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  fn add_load_time(&self, load_time: Duration) {
    let nanos = u64::try_from(load_time.as_nanos()).unwrap_or(u64::MAX);
    self.total_load_nanos.fetch_add(nanos, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;
    let load_successes = self.load_successes.load(Ordering::Relaxed);
    let load_failures = self.load_failures.load(Ordering::Relaxed);
    let total_loads = load_successes + load_failures;
    let total_load_nanos = self.total_load_nanos.load(Ordering::Relaxed);

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      load_successes,
      load_failures,
      total_load_time: Duration::from_nanos(total_load_nanos),
      average_load_penalty: average_penalty(total_load_nanos, total_loads),
      inserts: self.inserts.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
      evicted_weight: self.evicted_weight.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      replacements: self.replacements.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

impl StatsRecorder for Metrics {
  fn record_hits(&self, count: u64) {
    self.hits.fetch_add(count, Ordering::Relaxed);
  }

  fn record_misses(&self, count: u64) {
    self.misses.fetch_add(count, Ordering::Relaxed);
  }

  fn record_load_success(&self, load_time: Duration) {
    self.load_successes.fetch_add(1, Ordering::Relaxed);
    self.add_load_time(load_time);
  }

  fn record_load_failure(&self, load_time: Duration) {
    self.load_failures.fetch_add(1, Ordering::Relaxed);
    self.add_load_time(load_time);
  }

  fn record_eviction(&self, weight: u64, reason: EvictionReason) {
    match reason {
      EvictionReason::Capacity => {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.evicted_weight.fetch_add(weight, Ordering::Relaxed);
      }
      EvictionReason::Invalidated => {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
      }
      EvictionReason::Replaced => {
        self.replacements.fetch_add(1, Ordering::Relaxed);
      }
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of lookups that found a value or an in-flight computation.
  pub hits: u64,
  /// The number of lookups that found nothing.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// The number of computations that produced a value.
  pub load_successes: u64,
  /// The number of computations that failed or produced nothing.
  pub load_failures: u64,
  /// Time spent in computations, successful or not.
  pub total_load_time: Duration,
  /// The average time spent per computation.
  pub average_load_penalty: Duration,
  /// The number of values stored by computations or puts.
  pub inserts: u64,
  /// The number of entries removed by the eviction policy.
  pub evictions: u64,
  /// The combined weight of entries removed by the eviction policy.
  pub evicted_weight: u64,
  /// The number of entries removed explicitly.
  pub invalidations: u64,
  /// The number of values overwritten.
  pub replacements: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl MetricsSnapshot {
  /// The total number of computations.
  pub fn load_count(&self) -> u64 {
    self.load_successes + self.load_failures
  }
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("load_successes", &self.load_successes)
      .field("load_failures", &self.load_failures)
      .field("average_load_penalty", &self.average_load_penalty)
      .field("inserts", &self.inserts)
      .field("evictions", &self.evictions)
      .field("evicted_weight", &self.evicted_weight)
      .field("invalidations", &self.invalidations)
      .field("replacements", &self.replacements)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}

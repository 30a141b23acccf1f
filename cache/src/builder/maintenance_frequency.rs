//! Presets for [`CacheBuilder::maintenance_frequency`](crate::CacheBuilder::maintenance_frequency).
//!
//! Maintenance applies buffered reads and writes to the eviction policy and
//! evicts down to capacity. A write runs it itself with a probability of one
//! in the chosen frequency; full buffers and the janitor thread run it too.

/// Recommended for most general-purpose workloads.
///
/// Runs maintenance, on average, once every 16 writes. This keeps the
/// weighted size close to the capacity without slowing writers down.
pub const RESPONSIVE: u32 = 16;

/// Recommended for write-heavy workloads where insert throughput is critical.
///
/// Runs maintenance once every 64 writes. The cache may overshoot its
/// capacity a little more between passes.
pub const THROUGHPUT: u32 = 64;

/// Recommended for specialized, extremely high-throughput systems.
///
/// Runs maintenance once every 256 writes and relies mostly on the buffer
/// flush points and the janitor. Use with caution.
pub const LOW_OVERHEAD: u32 = 256;

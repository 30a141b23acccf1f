use std::sync::atomic::{AtomicU64, Ordering};

const WEYL_CONSTANT: u64 = 0x9E3779B97F4A7C15;

/// A lock-free Weyl-sequence generator used to sample maintenance runs.
/// Not suitable for anything that needs real randomness.
#[derive(Debug)]
pub(crate) struct FastRng {
  state: AtomicU64,
}

impl FastRng {
  pub(crate) fn new(seed: u64) -> Self {
    Self {
      state: AtomicU64::new(seed | 1),
    }
  }

  #[inline(always)]
  fn next(&self) -> u64 {
    let x = self.state.fetch_add(WEYL_CONSTANT, Ordering::Relaxed);
    // One round of a 64-bit finalizer so the low bits are usable.
    let x = (x ^ (x >> 33)).wrapping_mul(0xff51afd7ed558ccd);
    x ^ (x >> 33)
  }

  /// Returns true with a probability of 1 in `frequency`, which must be a
  /// power of two.
  #[inline(always)]
  pub(crate) fn should_run(&self, frequency: u32) -> bool {
    let mask = u64::from(frequency.max(1)) - 1;
    (self.next() & mask) == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frequency_one_always_runs() {
    let rng = FastRng::new(42);
    assert!((0..100).all(|_| rng.should_run(1)));
  }

  #[test]
  fn sampling_rate_is_roughly_one_in_n() {
    let rng = FastRng::new(7);
    let hits = (0..16_000).filter(|_| rng.should_run(16)).count();
    assert!((500..1500).contains(&hits), "expected ~1000 runs, got {hits}");
  }
}

//! Tracks which computations are running on the current thread so that a
//! computation trying to wait on itself fails instead of deadlocking.

use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
  static ACTIVE: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[inline]
fn address<T>(target: &Arc<T>) -> usize {
  Arc::as_ptr(target) as *const () as usize
}

/// Marks `target` as being computed by the current thread until dropped.
pub(crate) struct ComputeScope {
  address: usize,
}

impl ComputeScope {
  pub(crate) fn enter<T>(target: &Arc<T>) -> Self {
    let address = address(target);
    ACTIVE.with(|active| active.borrow_mut().push(address));
    Self { address }
  }
}

impl Drop for ComputeScope {
  fn drop(&mut self) {
    ACTIVE.with(|active| {
      let mut active = active.borrow_mut();
      if let Some(pos) = active.iter().rposition(|a| *a == self.address) {
        active.remove(pos);
      }
    });
  }
}

/// Returns `true` if the current thread is inside the computation of `target`.
pub(crate) fn is_active<T>(target: &Arc<T>) -> bool {
  let address = address(target);
  ACTIVE.with(|active| active.borrow().contains(&address))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scope_is_thread_local_and_nested() {
    let outer = Arc::new(1u8);
    let inner = Arc::new(2u8);

    assert!(!is_active(&outer));
    {
      let _outer = ComputeScope::enter(&outer);
      assert!(is_active(&outer));
      {
        let _inner = ComputeScope::enter(&inner);
        assert!(is_active(&outer) && is_active(&inner));

        let other = outer.clone();
        let seen = std::thread::spawn(move || is_active(&other)).join().unwrap();
        assert!(!seen, "another thread is not inside this computation");
      }
      assert!(!is_active(&inner));
    }
    assert!(!is_active(&outer));
  }
}

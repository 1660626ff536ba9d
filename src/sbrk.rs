use std::{ptr, slice};

use libc::{c_void, intptr_t, sbrk};

use crate::{align, error::AllocError, source::HeapSource};

/// Heap source backed by the process break.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Stack         │ ↓ grows down
///                │         ...         │
///                │       Heap          │ ↑ grows up (sbrk)
///                ├─────────────────────┤ ← base + top
///                │   segalloc heap     │
///                ├─────────────────────┤ ← base (8-aligned)
///                │   Data / Text       │
///   Low Address  └─────────────────────┘
/// ```
///
/// The region must stay contiguous: if anything else in the process moves
/// the break between two growths (the system `malloc` may), the second
/// growth is rolled back and refused.
pub struct Sbrk {
  base: *mut u8,
  top: usize,
}

fn failed(address: *mut c_void) -> bool {
  address == usize::MAX as *mut c_void
}

impl Sbrk {
  pub const fn new() -> Self {
    Self {
      base: ptr::null_mut(),
      top: 0,
    }
  }

  /// Current program break.
  pub fn program_break() -> *mut c_void {
    unsafe { sbrk(0) }
  }

  fn claim_base(&mut self) -> Result<(), AllocError> {
    let current = Self::program_break();
    if failed(current) {
      return Err(AllocError::OutOfMemory { requested: 0 });
    }
    let pad = align!(current as usize) - current as usize;
    if pad > 0 && failed(unsafe { sbrk(pad as intptr_t) }) {
      return Err(AllocError::OutOfMemory { requested: pad });
    }
    self.base = (current as *mut u8).wrapping_add(pad);
    Ok(())
  }
}

impl Default for Sbrk {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapSource for Sbrk {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<usize, AllocError> {
    let increment = intptr_t::try_from(delta).map_err(|_| AllocError::OutOfMemory { requested: delta })?;
    if delta > u32::MAX as usize - self.top {
      return Err(AllocError::OutOfMemory { requested: delta });
    }
    if self.base.is_null() {
      self.claim_base()?;
    }

    let address = unsafe { sbrk(increment) };
    if failed(address) {
      tracing::warn!("sbrk refused to grow the heap by {} bytes", delta);
      return Err(AllocError::OutOfMemory { requested: delta });
    }
    if address as usize != self.base as usize + self.top {
      tracing::warn!(
        "program break moved under the heap: expected {:#x}, got {:?}",
        self.base as usize + self.top,
        address
      );
      unsafe { sbrk(-increment) };
      return Err(AllocError::OutOfMemory { requested: delta });
    }

    let old = self.top;
    self.top += delta;
    Ok(old)
  }

  fn top(&self) -> usize {
    self.top
  }

  fn bytes(&self) -> &[u8] {
    if self.base.is_null() {
      return &[];
    }
    unsafe { slice::from_raw_parts(self.base, self.top) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    if self.base.is_null() {
      return &mut [];
    }
    unsafe { slice::from_raw_parts_mut(self.base, self.top) }
  }

  fn base_address(&self) -> usize {
    if self.base.is_null() {
      return align!(Self::program_break() as usize);
    }
    self.base as usize
  }
}

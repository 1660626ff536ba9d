use std::{alloc, ptr::NonNull, slice};

use crate::{ALIGNMENT, align, align_down, error::AllocError, source::HeapSource};

/// Simulated heap: a fixed amount of memory reserved up front, with a
/// break pointer that moves inside it.
///
/// ```text
///   start                      brk                       start + capacity
///   ┌──────────────────────────┬─────────────────────────────────┐
///   │     heap (bytes())       │            unused               │
///   └──────────────────────────┴─────────────────────────────────┘
/// ```
///
/// Growth past the capacity is refused, which makes out-of-memory paths
/// easy to exercise.
pub struct MemLib {
  start: NonNull<u8>,
  brk: usize,
  capacity: usize,
}

// The region is owned exclusively by this value.
unsafe impl Send for MemLib {}

impl MemLib {
  /// 20 MiB.
  pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

  pub fn new() -> Result<Self, AllocError> {
    Self::with_capacity(Self::DEFAULT_CAPACITY)
  }

  /// Reserves `capacity` bytes, rounded up to the alignment and clamped to
  /// what 32-bit block offsets can address.
  pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
    let capacity = align!(capacity.clamp(ALIGNMENT, align_down!(u32::MAX as usize)));
    let layout = alloc::Layout::from_size_align(capacity, ALIGNMENT)
      .map_err(|_| AllocError::OutOfMemory { requested: capacity })?;

    let start = unsafe { alloc::alloc_zeroed(layout) };
    let start = NonNull::new(start).ok_or(AllocError::OutOfMemory { requested: capacity })?;

    Ok(Self {
      start,
      brk: 0,
      capacity,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// First byte of the heap.
  pub fn heap_lo(&self) -> *const u8 {
    self.start.as_ptr()
  }

  /// Last byte of the heap, or one below [`heap_lo`](Self::heap_lo) when
  /// the heap is empty.
  pub fn heap_hi(&self) -> *const u8 {
    self.start.as_ptr().wrapping_add(self.brk).wrapping_sub(1)
  }
}

impl HeapSource for MemLib {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<usize, AllocError> {
    if delta > self.capacity - self.brk {
      tracing::debug!(
        "memlib out of memory: requested {} bytes with {} of {} in use",
        delta,
        self.brk,
        self.capacity
      );
      return Err(AllocError::OutOfMemory { requested: delta });
    }
    let old = self.brk;
    self.brk += delta;
    Ok(old)
  }

  fn top(&self) -> usize {
    self.brk
  }

  fn bytes(&self) -> &[u8] {
    unsafe { slice::from_raw_parts(self.start.as_ptr(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.start.as_ptr(), self.brk) }
  }

  fn base_address(&self) -> usize {
    self.start.as_ptr() as usize
  }

  fn reset(&mut self) {
    self.brk = 0;
  }
}

impl Drop for MemLib {
  fn drop(&mut self) {
    if let Ok(layout) = alloc::Layout::from_size_align(self.capacity, ALIGNMENT) {
      unsafe { alloc::dealloc(self.start.as_ptr(), layout) };
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_grow_and_refuse() {
    let mut memlib = MemLib::with_capacity(64).unwrap();
    assert_eq!(memlib.capacity(), 64);
    assert_eq!(memlib.top(), 0);
    assert!(memlib.bytes().is_empty());

    assert_eq!(memlib.grow(16), Ok(0));
    assert_eq!(memlib.grow(40), Ok(16));
    assert_eq!(memlib.top(), 56);
    assert_eq!(
      memlib.grow(16),
      Err(AllocError::OutOfMemory { requested: 16 })
    );
    // A refused request does not move the break.
    assert_eq!(memlib.top(), 56);
    assert_eq!(memlib.grow(8), Ok(56));
  }

  #[test]
  fn test_bytes_are_stable() {
    let mut memlib = MemLib::with_capacity(128).unwrap();
    memlib.grow(8).unwrap();
    memlib.bytes_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    memlib.grow(32).unwrap();
    assert_eq!(&memlib.bytes()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(memlib.bytes().len(), 40);
  }

  #[test]
  fn test_base_is_aligned() {
    let memlib = MemLib::with_capacity(100).unwrap();
    assert_eq!(memlib.base_address() % ALIGNMENT, 0);
    assert_eq!(memlib.capacity(), 104);
  }

  #[test]
  fn test_reset_and_bounds() {
    let mut memlib = MemLib::with_capacity(64).unwrap();
    assert_eq!(memlib.heap_hi().wrapping_add(1), memlib.heap_lo());
    memlib.grow(32).unwrap();
    assert_eq!(memlib.heap_hi() as usize - memlib.heap_lo() as usize, 31);
    memlib.reset();
    assert_eq!(memlib.top(), 0);
    assert_eq!(memlib.grow(64), Ok(0));
  }
}

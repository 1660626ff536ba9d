use crate::error::AllocError;

/// The host primitive an [`Allocator`](crate::Allocator) grows its heap with.
///
/// A source hands out one contiguous region that only ever grows at the top.
/// Bytes below the current top never move, so offsets into
/// [`bytes`](HeapSource::bytes) stay valid for the life of the source.
pub trait HeapSource {
  /// Extends the heap by `delta` bytes and returns the offset of the old top,
  /// which is where the new region starts.
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<usize, AllocError>;

  /// Current size of the heap in bytes.
  fn top(&self) -> usize;

  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  /// Address of offset 0. Always a multiple of 8.
  fn base_address(&self) -> usize;

  /// Gives the whole heap back to the source, if it supports that.
  fn reset(&mut self) {}
}

use thiserror::Error;

/// Errors reported by the allocator and its heap sources.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// The heap source refused to grow, or the request cannot be represented
  /// in a block size word.
  #[error("out of memory: cannot grow the heap by {requested} bytes")]
  OutOfMemory { requested: usize },

  /// Zero-byte allocation request.
  #[error("invalid allocation size {0}")]
  InvalidSize(usize),

  /// The block handed to `free`/`reallocate` is not currently allocated.
  #[error("double free of block at offset {offset:#x}")]
  DoubleFree { offset: usize },

  /// A boundary tag or free list does not hold what the allocator wrote.
  #[error("heap corruption detected at offset {offset:#x}: {reason}")]
  CorruptionDetected { offset: usize, reason: &'static str },

  #[error("invalid allocator configuration: {0}")]
  InvalidConfig(&'static str),
}

impl AllocError {
  /// Whether the error means the caller broke the allocator's contract
  /// rather than the heap running out.
  pub fn is_precondition_violation(&self) -> bool {
    matches!(self, Self::DoubleFree { .. } | Self::CorruptionDetected { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages() {
    assert_eq!(
      AllocError::DoubleFree { offset: 0x30 }.to_string(),
      "double free of block at offset 0x30"
    );
    assert_eq!(
      AllocError::OutOfMemory { requested: 4096 }.to_string(),
      "out of memory: cannot grow the heap by 4096 bytes"
    );
  }

  #[test]
  fn test_precondition_violation() {
    assert!(AllocError::DoubleFree { offset: 8 }.is_precondition_violation());
    assert!(
      AllocError::CorruptionDetected {
        offset: 8,
        reason: "bad footer"
      }
      .is_precondition_violation()
    );
    assert!(!AllocError::OutOfMemory { requested: 1 }.is_precondition_violation());
    assert!(!AllocError::InvalidSize(0).is_precondition_violation());
  }
}

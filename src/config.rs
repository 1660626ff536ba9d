use crate::{ALIGNMENT, error::AllocError};

/// Tunables of an [`Allocator`](crate::Allocator).
///
/// ```rust
/// use segalloc::Config;
///
/// let config = Config::default().with_chunk_size(8192);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
  /// Minimum number of bytes requested from the heap source per extension.
  pub chunk_size: usize,
  /// Slack added on top of every reallocation request so that repeated
  /// small growths land inside the same block.
  pub realloc_buffer: usize,
  /// When a reallocated block keeps less slack than this, the block after
  /// it is reserved for the next growth.
  pub reserve_threshold: usize,
}

impl Config {
  pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;
  pub const DEFAULT_REALLOC_BUFFER: usize = 1 << 7;

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_realloc_buffer(
    mut self,
    realloc_buffer: usize,
  ) -> Self {
    self.realloc_buffer = realloc_buffer;
    self
  }

  pub fn with_reserve_threshold(
    mut self,
    reserve_threshold: usize,
  ) -> Self {
    self.reserve_threshold = reserve_threshold;
    self
  }

  pub fn validate(&self) -> Result<(), AllocError> {
    if self.chunk_size < 2 * ALIGNMENT {
      return Err(AllocError::InvalidConfig("chunk size must be at least 16 bytes"));
    }
    if self.chunk_size % ALIGNMENT != 0 {
      return Err(AllocError::InvalidConfig("chunk size must be a multiple of 8"));
    }
    if self.chunk_size > u32::MAX as usize / 2 {
      return Err(AllocError::InvalidConfig("chunk size does not fit a block size word"));
    }
    if self.realloc_buffer % ALIGNMENT != 0 {
      return Err(AllocError::InvalidConfig("realloc buffer must be a multiple of 8"));
    }
    if self.reserve_threshold < self.realloc_buffer {
      return Err(AllocError::InvalidConfig(
        "reserve threshold must not be below the realloc buffer",
      ));
    }
    Ok(())
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      chunk_size: Self::DEFAULT_CHUNK_SIZE,
      realloc_buffer: Self::DEFAULT_REALLOC_BUFFER,
      reserve_threshold: 2 * Self::DEFAULT_REALLOC_BUFFER,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_is_valid() {
    let config = Config::default();
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.realloc_buffer, 128);
    assert_eq!(config.reserve_threshold, 256);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_rejects_bad_values() {
    assert!(matches!(
      Config::default().with_chunk_size(8).validate(),
      Err(AllocError::InvalidConfig(_))
    ));
    assert!(matches!(
      Config::default().with_chunk_size(4100).validate(),
      Err(AllocError::InvalidConfig(_))
    ));
    assert!(matches!(
      Config::default().with_realloc_buffer(12).validate(),
      Err(AllocError::InvalidConfig(_))
    ));
    assert!(matches!(
      Config::default().with_reserve_threshold(64).validate(),
      Err(AllocError::InvalidConfig(_))
    ));
  }

  #[test]
  fn test_zero_buffer_is_allowed() {
    let config = Config::default()
      .with_realloc_buffer(0)
      .with_reserve_threshold(0);
    assert!(config.validate().is_ok());
  }
}

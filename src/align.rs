/// Rounds `value` up to the allocator alignment ([`ALIGNMENT`](crate::ALIGNMENT), 8 bytes).
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(1), 8);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::ALIGNMENT - 1) & !($crate::ALIGNMENT - 1)
  };
}

/// Rounds `value` down to the allocator alignment.
///
/// ```rust
/// use segalloc::align_down;
///
/// assert_eq!(align_down!(13), 8);
/// assert_eq!(align_down!(7), 0);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr) => {
    $value & !($crate::ALIGNMENT - 1)
  };
}

#[cfg(test)]
mod tests {
  use crate::ALIGNMENT;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));

      let expected_alignment = ALIGNMENT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_down() {
    for size in 0..100usize {
      let down = align_down!(size);
      assert_eq!(down % ALIGNMENT, 0);
      assert!(down <= size && size - down < ALIGNMENT);
    }
  }
}

//! Boundary tags and block navigation.
//!
//! ```text
//!   bp - 4        bp                                  bp + size - 8
//!   ┌──────────┬──────────────────────────────────────┬──────────┐
//!   │  header  │  payload  (pred | succ when free)    │  footer  │
//!   └──────────┴──────────────────────────────────────┴──────────┘
//!   size | reserved | allocated               size | allocated
//! ```
//!
//! All functions take the heap as a byte slice and a block pointer `bp`,
//! the offset of the payload start. Out-of-range offsets panic on the
//! slice index rather than touching memory outside the heap.

/// Word size in bytes: one header, footer or free-list link.
pub(crate) const WSIZE: usize = 4;
/// Double word: header + footer overhead of every block.
pub(crate) const DSIZE: usize = 8;
/// Header + footer + two links.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * DSIZE;
/// Largest size a header word can describe.
pub(crate) const MAX_BLOCK_SIZE: usize = (u32::MAX & SIZE_MASK) as usize;

const ALLOCATED: u32 = 0x1;
const RESERVED: u32 = 0x2;
const SIZE_MASK: u32 = !0x7;

/// Decoded header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoundaryTag {
  pub size: usize,
  pub allocated: bool,
  /// Reallocation tag; only meaningful in headers.
  pub reserved: bool,
}

impl BoundaryTag {
  pub fn new(
    size: usize,
    allocated: bool,
  ) -> Self {
    Self {
      size,
      allocated,
      reserved: false,
    }
  }

  pub fn pack(self) -> u32 {
    debug_assert!(self.size <= MAX_BLOCK_SIZE && self.size % DSIZE == 0);
    let mut word = self.size as u32;
    if self.allocated {
      word |= ALLOCATED;
    }
    if self.reserved {
      word |= RESERVED;
    }
    word
  }

  pub fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOCATED != 0,
      reserved: word & RESERVED != 0,
    }
  }

  /// Whether the block may be merged with a neighbour.
  pub fn is_mergeable(self) -> bool {
    !self.allocated && !self.reserved
  }
}

pub(crate) fn get(
  heap: &[u8],
  at: usize,
) -> u32 {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&heap[at..at + WSIZE]);
  u32::from_ne_bytes(word)
}

pub(crate) fn put(
  heap: &mut [u8],
  at: usize,
  word: u32,
) {
  heap[at..at + WSIZE].copy_from_slice(&word.to_ne_bytes());
}

pub(crate) fn header(
  heap: &[u8],
  bp: usize,
) -> BoundaryTag {
  BoundaryTag::unpack(get(heap, bp - WSIZE))
}

pub(crate) fn footer(
  heap: &[u8],
  bp: usize,
) -> BoundaryTag {
  let size = header(heap, bp).size;
  BoundaryTag::unpack(get(heap, bp + size - DSIZE))
}

pub(crate) fn block_size(
  heap: &[u8],
  bp: usize,
) -> usize {
  header(heap, bp).size
}

pub(crate) fn next_block(
  heap: &[u8],
  bp: usize,
) -> usize {
  bp + block_size(heap, bp)
}

/// The word just below `bp`'s header is the previous block's footer.
pub(crate) fn prev_block(
  heap: &[u8],
  bp: usize,
) -> usize {
  bp - BoundaryTag::unpack(get(heap, bp - DSIZE)).size
}

/// Writes header and footer, keeping whatever reallocation tag the header
/// already carries.
pub(crate) fn write_block(
  heap: &mut [u8],
  bp: usize,
  size: usize,
  allocated: bool,
) {
  let reserved = header(heap, bp).reserved;
  put(
    heap,
    bp - WSIZE,
    BoundaryTag {
      size,
      allocated,
      reserved,
    }
    .pack(),
  );
  put(heap, bp + size - DSIZE, BoundaryTag::new(size, allocated).pack());
}

/// Writes header and footer with the reallocation tag cleared.
pub(crate) fn write_block_untagged(
  heap: &mut [u8],
  bp: usize,
  size: usize,
  allocated: bool,
) {
  let word = BoundaryTag::new(size, allocated).pack();
  put(heap, bp - WSIZE, word);
  put(heap, bp + size - DSIZE, word);
}

pub(crate) fn write_epilogue(
  heap: &mut [u8],
  bp: usize,
) {
  put(heap, bp - WSIZE, BoundaryTag::new(0, true).pack());
}

pub(crate) fn set_reserved(
  heap: &mut [u8],
  bp: usize,
  reserved: bool,
) {
  let word = get(heap, bp - WSIZE);
  let word = if reserved { word | RESERVED } else { word & !RESERVED };
  put(heap, bp - WSIZE, word);
}

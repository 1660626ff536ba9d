//! Heap consistency checking.
//!
//! [`Allocator::check`] walks every block from the prologue to the epilogue
//! and then every size class, so it costs time proportional to the heap.
//! It is meant for tests and debugging sessions, not hot paths.

use crate::{
  allocator::Allocator,
  block::{self, BoundaryTag, DSIZE, MIN_BLOCK_SIZE},
  error::AllocError,
  registry::{self, CLASS_COUNT, Registry},
  source::HeapSource,
};

/// Snapshot of the heap produced by a successful check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  /// Blocks carrying the reallocation tag, allocated or free.
  pub reserved_blocks: usize,
  pub extensions: usize,
}

fn corrupt(
  offset: usize,
  reason: &'static str,
) -> AllocError {
  tracing::error!("heap check failed at {:#x}: {}", offset, reason);
  AllocError::CorruptionDetected { offset, reason }
}

impl<S: HeapSource> Allocator<S> {
  /// Verifies every boundary tag and free list.
  pub fn check(&self) -> Result<HeapStats, AllocError> {
    let heap = self.source.bytes();
    let mut stats = HeapStats {
      heap_size: heap.len(),
      extensions: self.extensions,
      ..HeapStats::default()
    };

    let prologue = self.prologue;
    if block::header(heap, prologue) != BoundaryTag::new(DSIZE, true)
      || BoundaryTag::unpack(block::get(heap, prologue)) != BoundaryTag::new(DSIZE, true)
    {
      return Err(corrupt(prologue, "bad prologue"));
    }

    let mut bp = prologue + DSIZE;
    let mut prev_mergeable = false;
    loop {
      if bp > heap.len() {
        return Err(corrupt(bp, "block runs past the heap top"));
      }
      let head = block::header(heap, bp);
      if head.size == 0 {
        if !head.allocated {
          return Err(corrupt(bp, "epilogue is not allocated"));
        }
        if bp != heap.len() {
          return Err(corrupt(bp, "epilogue is not at the heap top"));
        }
        break;
      }

      if bp % DSIZE != 0 {
        return Err(corrupt(bp, "misaligned block"));
      }
      if head.size < MIN_BLOCK_SIZE || head.size % DSIZE != 0 {
        return Err(corrupt(bp, "impossible block size"));
      }
      if bp + head.size > heap.len() {
        return Err(corrupt(bp, "block runs past the heap top"));
      }
      let foot = block::footer(heap, bp);
      if foot.size != head.size || foot.allocated != head.allocated {
        return Err(corrupt(bp, "header and footer disagree"));
      }
      if foot.reserved {
        return Err(corrupt(bp, "footer carries the reallocation tag"));
      }

      if head.reserved {
        stats.reserved_blocks += 1;
      }
      if head.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += head.size;
      } else {
        // A reserved free block may sit next to a free one.
        if prev_mergeable {
          return Err(corrupt(bp, "adjacent free blocks escaped coalescing"));
        }
        stats.free_blocks += 1;
        stats.free_bytes += head.size;
      }
      prev_mergeable = head.is_mergeable();
      bp += head.size;
    }

    self.check_free_lists(heap, stats.free_blocks)?;
    Ok(stats)
  }

  fn check_free_lists(
    &self,
    heap: &[u8],
    free_blocks: usize,
  ) -> Result<(), AllocError> {
    let first = self.prologue + DSIZE;
    let mut listed = 0;

    for class in 0..CLASS_COUNT {
      let mut prev = None;
      let mut last_size = 0;
      // Links are only followed once the block holding them is in bounds.
      let mut current = self.registry.head(class);
      while let Some(bp) = current {
        listed += 1;
        if listed > free_blocks {
          return Err(corrupt(bp, "free lists hold more blocks than the heap"));
        }
        if bp < first || bp + DSIZE > heap.len() || bp % DSIZE != 0 {
          return Err(corrupt(bp, "listed block outside the heap"));
        }
        let head = block::header(heap, bp);
        if head.allocated {
          return Err(corrupt(bp, "allocated block on a free list"));
        }
        if registry::class_of(head.size) != class {
          return Err(corrupt(bp, "block listed in the wrong size class"));
        }
        if head.size < last_size {
          return Err(corrupt(bp, "size class out of order"));
        }
        if Registry::pred_of(heap, bp) != prev {
          return Err(corrupt(bp, "broken predecessor link"));
        }
        prev = Some(bp);
        last_size = head.size;
        current = Registry::succ_of(heap, bp);
      }
    }

    if listed != free_blocks {
      return Err(corrupt(first, "free block missing from the free lists"));
    }
    Ok(())
  }
}

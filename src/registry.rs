//! Segregated free lists.
//!
//! ```text
//!   class  range            list (ascending size)
//!   ─────  ───────────────  ─────────────────────────────
//!     4    [16, 31]         16 ⇄ 16 ⇄ 24
//!     5    [32, 63]         32 ⇄ 48
//!     6    [64, 127]        (empty)
//!    ...
//!    19    [2^19, ∞)        catch-all
//! ```
//!
//! The links live inside the free blocks themselves: `pred` at `bp`,
//! `succ` at `bp + 4`, both heap offsets with 0 meaning none.

use crate::block::{self, WSIZE};

pub(crate) const CLASS_COUNT: usize = 20;

const NIL: usize = 0;

/// Index of the size class holding blocks of `size` bytes.
pub(crate) fn class_of(size: usize) -> usize {
  let mut class = 0;
  let mut size = size;
  while class < CLASS_COUNT - 1 && size > 1 {
    size >>= 1;
    class += 1;
  }
  class
}

fn pred(
  heap: &[u8],
  bp: usize,
) -> usize {
  block::get(heap, bp) as usize
}

fn succ(
  heap: &[u8],
  bp: usize,
) -> usize {
  block::get(heap, bp + WSIZE) as usize
}

fn set_pred(
  heap: &mut [u8],
  bp: usize,
  pred: usize,
) {
  block::put(heap, bp, pred as u32);
}

fn set_succ(
  heap: &mut [u8],
  bp: usize,
  succ: usize,
) {
  block::put(heap, bp + WSIZE, succ as u32);
}

pub(crate) struct Registry {
  heads: [usize; CLASS_COUNT],
}

impl Registry {
  pub fn new() -> Self {
    Self {
      heads: [NIL; CLASS_COUNT],
    }
  }

  pub fn clear(&mut self) {
    self.heads = [NIL; CLASS_COUNT];
  }

  /// Links `bp` into its class, before the first block that is at least as
  /// large.
  pub fn insert(
    &mut self,
    heap: &mut [u8],
    bp: usize,
  ) {
    let size = block::block_size(heap, bp);
    let class = class_of(size);

    let mut before = NIL;
    let mut after = self.heads[class];
    while after != NIL && block::block_size(heap, after) < size {
      before = after;
      after = succ(heap, after);
    }

    set_pred(heap, bp, before);
    set_succ(heap, bp, after);
    if after != NIL {
      set_pred(heap, after, bp);
    }
    if before == NIL {
      self.heads[class] = bp;
    } else {
      set_succ(heap, before, bp);
    }
  }

  /// Unlinks `bp`. The class is recomputed from the current header, so this
  /// must run before the header size changes. Unlinked blocks are ignored.
  pub fn remove(
    &mut self,
    heap: &mut [u8],
    bp: usize,
  ) {
    let class = class_of(block::block_size(heap, bp));
    let before = pred(heap, bp);
    let after = succ(heap, bp);

    if before == NIL {
      if self.heads[class] != bp {
        return;
      }
      self.heads[class] = after;
    } else {
      set_succ(heap, before, after);
    }
    if after != NIL {
      set_pred(heap, after, before);
    }

    set_pred(heap, bp, NIL);
    set_succ(heap, bp, NIL);
  }

  /// First block of at least `size` bytes that is not reserved, searching
  /// upwards from `size`'s own class.
  pub fn find_fit(
    &self,
    heap: &[u8],
    size: usize,
  ) -> Option<usize> {
    (class_of(size)..CLASS_COUNT).find_map(|class| {
      self.iter(heap, class).find(|&bp| {
        let tag = block::header(heap, bp);
        tag.size >= size && !tag.reserved
      })
    })
  }

  pub fn iter<'a>(
    &self,
    heap: &'a [u8],
    class: usize,
  ) -> ClassIter<'a> {
    ClassIter {
      heap,
      current: self.heads[class],
    }
  }

  /// First block of `class`, if any.
  pub fn head(
    &self,
    class: usize,
  ) -> Option<usize> {
    Some(self.heads[class]).filter(|&bp| bp != NIL)
  }

  /// Successor link of a listed block, for consistency checks.
  pub fn succ_of(
    heap: &[u8],
    bp: usize,
  ) -> Option<usize> {
    Some(succ(heap, bp)).filter(|&bp| bp != NIL)
  }

  /// Predecessor link of a listed block, for consistency checks.
  pub fn pred_of(
    heap: &[u8],
    bp: usize,
  ) -> Option<usize> {
    Some(pred(heap, bp)).filter(|&bp| bp != NIL)
  }
}

/// Walks one size class from its head.
pub(crate) struct ClassIter<'a> {
  heap: &'a [u8],
  current: usize,
}

impl Iterator for ClassIter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    if self.current == NIL {
      return None;
    }
    let bp = self.current;
    self.current = succ(self.heap, bp);
    Some(bp)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::write_block_untagged;

  /// Lays out free blocks of the given sizes back to back from bp 8.
  fn heap_with(sizes: &[usize]) -> (Vec<u8>, Vec<usize>) {
    let total: usize = sizes.iter().sum();
    let mut heap = vec![0u8; total + 16];
    let mut bps = Vec::new();
    let mut bp = 8;
    for &size in sizes {
      write_block_untagged(&mut heap, bp, size, false);
      bps.push(bp);
      bp += size;
    }
    (heap, bps)
  }

  fn sizes_in(
    registry: &Registry,
    heap: &[u8],
    class: usize,
  ) -> Vec<usize> {
    registry
      .iter(heap, class)
      .map(|bp| block::block_size(heap, bp))
      .collect()
  }

  #[test]
  fn test_class_of() {
    assert_eq!(class_of(16), 4);
    assert_eq!(class_of(31), 4);
    assert_eq!(class_of(32), 5);
    assert_eq!(class_of(64), 6);
    assert_eq!(class_of(127), 6);
    assert_eq!(class_of(1 << 19), CLASS_COUNT - 1);
    assert_eq!(class_of(usize::MAX), CLASS_COUNT - 1);
  }

  #[test]
  fn test_insert_keeps_ascending_order() {
    let (mut heap, bps) = heap_with(&[24, 16, 24, 16]);
    let mut registry = Registry::new();
    for &bp in &bps {
      registry.insert(&mut heap, bp);
    }

    assert_eq!(sizes_in(&registry, &heap, 4), vec![16, 16, 24, 24]);
    // Back links mirror the forward walk.
    let listed: Vec<usize> = registry.iter(&heap, 4).collect();
    assert_eq!(registry.head(4), Some(listed[0]));
    assert_eq!(Registry::pred_of(&heap, listed[0]), None);
    for pair in listed.windows(2) {
      assert_eq!(Registry::pred_of(&heap, pair[1]), Some(pair[0]));
      assert_eq!(Registry::succ_of(&heap, pair[0]), Some(pair[1]));
    }
    assert_eq!(Registry::succ_of(&heap, listed[3]), None);
  }

  #[test]
  fn test_remove_head_middle_tail() {
    let (mut heap, bps) = heap_with(&[16, 24, 32, 40, 48]);
    let mut registry = Registry::new();
    for &bp in &bps {
      registry.insert(&mut heap, bp);
    }
    assert_eq!(sizes_in(&registry, &heap, 5), vec![32, 40, 48]);

    registry.remove(&mut heap, bps[3]);
    assert_eq!(sizes_in(&registry, &heap, 5), vec![32, 48]);
    registry.remove(&mut heap, bps[2]);
    assert_eq!(sizes_in(&registry, &heap, 5), vec![48]);
    registry.remove(&mut heap, bps[4]);
    assert_eq!(registry.iter(&heap, 5).next(), None);
    assert_eq!(sizes_in(&registry, &heap, 4), vec![16, 24]);
  }

  #[test]
  fn test_remove_twice_is_harmless() {
    let (mut heap, bps) = heap_with(&[16, 16]);
    let mut registry = Registry::new();
    registry.insert(&mut heap, bps[0]);
    registry.insert(&mut heap, bps[1]);

    registry.remove(&mut heap, bps[0]);
    registry.remove(&mut heap, bps[0]);
    assert_eq!(registry.iter(&heap, 4).collect::<Vec<_>>(), vec![bps[1]]);
  }

  #[test]
  fn test_find_fit_prefers_tightest_class() {
    let (mut heap, bps) = heap_with(&[16, 32, 64]);
    let mut registry = Registry::new();
    for &bp in &bps {
      registry.insert(&mut heap, bp);
    }

    assert_eq!(registry.find_fit(&heap, 32), Some(bps[1]));
    assert_eq!(registry.find_fit(&heap, 16), Some(bps[0]));
    assert_eq!(registry.find_fit(&heap, 40), Some(bps[2]));
    assert_eq!(registry.find_fit(&heap, 72), None);
  }

  #[test]
  fn test_find_fit_skips_small_and_reserved() {
    let (mut heap, bps) = heap_with(&[40, 48, 56]);
    let mut registry = Registry::new();
    for &bp in &bps {
      registry.insert(&mut heap, bp);
    }
    block::set_reserved(&mut heap, bps[1], true);

    assert_eq!(registry.find_fit(&heap, 48), Some(bps[2]));
    block::set_reserved(&mut heap, bps[2], true);
    assert_eq!(registry.find_fit(&heap, 48), None);
    assert_eq!(registry.find_fit(&heap, 40), Some(bps[0]));
  }
}

use std::cmp;

use tracing::{debug, error, trace, warn};

use crate::{
  align,
  block::{self, BoundaryTag, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, WSIZE},
  config::Config,
  error::AllocError,
  memlib::MemLib,
  registry::Registry,
  source::HeapSource,
};

/// Handle to an allocated block: the offset of its payload from the heap
/// base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(u32);

impl HeapPtr {
  pub fn offset(self) -> usize {
    self.0 as usize
  }

  fn from_offset(bp: usize) -> Self {
    Self(bp as u32)
  }
}

/// Block size for a payload of `size` bytes: header and footer added,
/// rounded to the alignment, never below the minimum block.
fn adjusted_size(size: usize) -> Result<usize, AllocError> {
  if size <= DSIZE {
    return Ok(MIN_BLOCK_SIZE);
  }
  if size > MAX_BLOCK_SIZE - DSIZE {
    return Err(AllocError::OutOfMemory { requested: size });
  }
  Ok(align!(size + DSIZE))
}

/// Segregated-fit allocator over a single growable heap.
///
/// ```text
///   ┌─────┬──────────┬───────┬───────┬───────┬─────┬──────────┐
///   │ pad │ prologue │ block │ block │ block │ ... │ epilogue │
///   └─────┴──────────┴───────┴───────┴───────┴─────┴──────────┘
///    4 B      8 B                                     4 B
/// ```
///
/// Free blocks are kept on size-class lists; allocation takes the first
/// fitting block of the tightest class and splits it, freeing merges with
/// free neighbours right away.
pub struct Allocator<S: HeapSource = MemLib> {
  pub(crate) source: S,
  pub(crate) registry: Registry,
  pub(crate) config: Config,
  /// Block pointer of the prologue.
  pub(crate) prologue: usize,
  pub(crate) extensions: usize,
}

impl<S: HeapSource> Allocator<S> {
  pub fn new(source: S) -> Result<Self, AllocError> {
    Self::with_config(source, Config::default())
  }

  pub fn with_config(
    source: S,
    config: Config,
  ) -> Result<Self, AllocError> {
    config.validate()?;
    let mut allocator = Self {
      source,
      registry: Registry::new(),
      config,
      prologue: 0,
      extensions: 0,
    };
    allocator.init()?;
    Ok(allocator)
  }

  /// Lays out a fresh heap: sentinels plus one chunk of free space.
  ///
  /// Every block handed out before is forgotten.
  pub fn init(&mut self) -> Result<(), AllocError> {
    self.source.reset();
    self.registry.clear();
    self.extensions = 0;

    let start = self.source.grow(4 * WSIZE)?;
    debug_assert_eq!(start % DSIZE, 0);

    let heap = self.source.bytes_mut();
    block::put(heap, start, 0);
    block::put(heap, start + WSIZE, BoundaryTag::new(DSIZE, true).pack());
    block::put(heap, start + 2 * WSIZE, BoundaryTag::new(DSIZE, true).pack());
    block::put(heap, start + 3 * WSIZE, BoundaryTag::new(0, true).pack());
    self.prologue = start + 2 * WSIZE;

    self.extend(self.config.chunk_size / WSIZE)?;
    debug!("heap initialized with {} bytes", self.source.top());
    Ok(())
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Current heap size in bytes.
  pub fn heap_size(&self) -> usize {
    self.source.top()
  }

  /// Number of successful heap extensions since the last [`init`](Self::init).
  pub fn extensions(&self) -> usize {
    self.extensions
  }

  /// Grows the heap by `words` words (rounded up to an even count) and
  /// returns the resulting free block after coalescing.
  fn extend(
    &mut self,
    words: usize,
  ) -> Result<usize, AllocError> {
    let words = if words % 2 == 1 { words + 1 } else { words };
    let size = words * WSIZE;
    if size > MAX_BLOCK_SIZE || size > u32::MAX as usize - self.source.top() {
      return Err(AllocError::OutOfMemory { requested: size });
    }

    let bp = self.source.grow(size).inspect_err(|err| {
      warn!("heap extension by {} bytes failed: {}", size, err);
    })?;

    // The new block's header replaces the old epilogue, dropping any tag on it.
    let heap = self.source.bytes_mut();
    block::write_block_untagged(heap, bp, size, false);
    block::write_epilogue(heap, bp + size);
    self.registry.insert(heap, bp);
    self.extensions += 1;

    debug!("extended heap by {} bytes, top is now {}", size, self.source.top());
    Ok(self.coalesce(bp))
  }

  /// Merges the free, listed block `bp` with its free neighbours. Returns
  /// the pointer of the merged block, which may be a predecessor's.
  fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let heap = self.source.bytes_mut();
    let mut bp = bp;
    let mut size = block::block_size(heap, bp);
    let mut merged = false;

    loop {
      let next = bp + size;
      if block::header(heap, next).allocated {
        break;
      }
      if !merged {
        self.registry.remove(heap, bp);
        merged = true;
      }
      self.registry.remove(heap, next);
      size += block::block_size(heap, next);
      block::write_block(heap, bp, size, false);
    }

    // A reserved predecessor belongs to a pending reallocation.
    loop {
      let prev = block::prev_block(heap, bp);
      if !block::header(heap, prev).is_mergeable() {
        break;
      }
      if !merged {
        self.registry.remove(heap, bp);
        merged = true;
      }
      self.registry.remove(heap, prev);
      size += block::block_size(heap, prev);
      block::write_block(heap, prev, size, false);
      bp = prev;
    }

    if merged {
      self.registry.insert(heap, bp);
      trace!("coalesced into block {:#x} of {} bytes", bp, size);
    }
    bp
  }

  /// Marks `asize` bytes of the free block `bp` allocated, returning the
  /// tail to the registry when it can hold a block of its own.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let heap = self.source.bytes_mut();
    let size = block::block_size(heap, bp);
    self.registry.remove(heap, bp);

    let remainder = size - asize;
    if remainder >= MIN_BLOCK_SIZE {
      block::write_block_untagged(heap, bp, asize, true);
      let rest = bp + asize;
      block::write_block_untagged(heap, rest, remainder, false);
      self.registry.insert(heap, rest);
    } else {
      block::write_block_untagged(heap, bp, size, true);
    }
  }

  /// Allocates a block with at least `size` usable bytes.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<HeapPtr, AllocError> {
    if size == 0 {
      return Err(AllocError::InvalidSize(size));
    }
    let asize = adjusted_size(size)?;

    let bp = match self.registry.find_fit(self.source.bytes(), asize) {
      Some(bp) => bp,
      None => self.extend(cmp::max(asize, self.config.chunk_size) / WSIZE)?,
    };
    self.place(bp, asize);

    trace!("allocate({}) -> {:#x}", size, bp);
    Ok(HeapPtr::from_offset(bp))
  }

  /// Allocates `count * size` zeroed bytes.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<HeapPtr, AllocError> {
    let bytes = count
      .checked_mul(size)
      .ok_or(AllocError::OutOfMemory { requested: usize::MAX })?;
    let ptr = self.allocate(bytes)?;
    self.payload_mut(ptr)?.fill(0);
    Ok(ptr)
  }

  /// Returns a block to the heap.
  pub fn free(
    &mut self,
    ptr: HeapPtr,
  ) -> Result<(), AllocError> {
    let bp = self.live_block(ptr)?;

    let heap = self.source.bytes_mut();
    let size = block::block_size(heap, bp);
    // Whatever this block reserved for its own growth is released.
    block::set_reserved(heap, bp + size, false);
    block::write_block(heap, bp, size, false);
    self.registry.insert(heap, bp);

    let merged = self.coalesce(bp);
    trace!("free({:#x}) -> free block {:#x}", bp, merged);
    Ok(())
  }

  /// Resizes a block, growing it in place when the following block allows
  /// it and moving it otherwise.
  ///
  /// `None` behaves as [`allocate`](Self::allocate); a `size` of 0 frees the
  /// block. Both return `Ok(None)` when no block results.
  pub fn reallocate(
    &mut self,
    ptr: Option<HeapPtr>,
    size: usize,
  ) -> Result<Option<HeapPtr>, AllocError> {
    let Some(ptr) = ptr else {
      if size == 0 {
        return Ok(None);
      }
      return self.allocate(size).map(Some);
    };
    if size == 0 {
      self.free(ptr)?;
      return Ok(None);
    }

    let bp = self.live_block(ptr)?;
    let wanted = adjusted_size(size)?
      .checked_add(self.config.realloc_buffer)
      .filter(|&wanted| wanted <= MAX_BLOCK_SIZE)
      .ok_or(AllocError::OutOfMemory { requested: size })?;

    let current = block::block_size(self.source.bytes(), bp);
    let bp = if current >= wanted || self.grow_in_place(bp, wanted)? {
      bp
    } else {
      self.relocate(bp, size, wanted)?
    };

    let heap = self.source.bytes_mut();
    let size_now = block::block_size(heap, bp);
    if size_now - wanted < self.config.reserve_threshold {
      block::set_reserved(heap, bp + size_now, true);
    }

    trace!("reallocate({:#x}, {}) -> {:#x}", ptr.offset(), size, bp);
    Ok(Some(HeapPtr::from_offset(bp)))
  }

  /// Grows `bp` over the free block after it, extending the heap first when
  /// that block ends at the heap top and is still too small. Returns false
  /// when the block has to move instead.
  fn grow_in_place(
    &mut self,
    bp: usize,
    wanted: usize,
  ) -> Result<bool, AllocError> {
    let heap = self.source.bytes_mut();
    let current = block::block_size(heap, bp);
    let next = bp + current;
    let next_tag = block::header(heap, next);
    if next_tag.allocated && next_tag.size != 0 {
      return Ok(false);
    }

    let available = current + next_tag.size;
    let at_top = next_tag.size == 0 || block::block_size(heap, next + next_tag.size) == 0;
    if available < wanted && !at_top {
      return Ok(false);
    }

    // The next block is being consumed, so its reservation goes too.
    block::set_reserved(heap, next, false);
    if available < wanted {
      let deficit = cmp::max(wanted - available, self.config.chunk_size);
      self.extend(deficit.div_ceil(WSIZE))?;
    }

    // After an extension the block at `next` is the merged free block.
    let heap = self.source.bytes_mut();
    let total = current + block::block_size(heap, next);
    self.registry.remove(heap, next);
    block::write_block(heap, bp, total, true);
    Ok(true)
  }

  fn relocate(
    &mut self,
    bp: usize,
    size: usize,
    wanted: usize,
  ) -> Result<usize, AllocError> {
    let moved = self.allocate(wanted - DSIZE)?.offset();

    let heap = self.source.bytes_mut();
    let count = cmp::min(block::block_size(heap, bp) - DSIZE, size);
    heap.copy_within(bp..bp + count, moved);

    self.free(HeapPtr::from_offset(bp))?;
    Ok(moved)
  }

  /// Usable bytes of a live block.
  pub fn usable_size(
    &self,
    ptr: HeapPtr,
  ) -> Result<usize, AllocError> {
    let bp = self.live_block(ptr)?;
    Ok(block::block_size(self.source.bytes(), bp) - DSIZE)
  }

  pub fn payload(
    &self,
    ptr: HeapPtr,
  ) -> Result<&[u8], AllocError> {
    let bp = self.live_block(ptr)?;
    let heap = self.source.bytes();
    let end = bp + block::block_size(heap, bp) - DSIZE;
    Ok(&heap[bp..end])
  }

  pub fn payload_mut(
    &mut self,
    ptr: HeapPtr,
  ) -> Result<&mut [u8], AllocError> {
    let bp = self.live_block(ptr)?;
    let heap = self.source.bytes_mut();
    let end = bp + block::block_size(heap, bp) - DSIZE;
    Ok(&mut heap[bp..end])
  }

  /// Absolute address of the payload.
  pub fn address(
    &self,
    ptr: HeapPtr,
  ) -> usize {
    self.source.base_address() + ptr.offset()
  }

  /// Handle for an address previously returned by [`address`](Self::address).
  pub fn ptr_from_address(
    &self,
    address: usize,
  ) -> Option<HeapPtr> {
    address
      .checked_sub(self.source.base_address())
      .filter(|&offset| offset < self.source.top())
      .map(HeapPtr::from_offset)
  }

  /// Validates that `ptr` names an allocated block and returns its offset.
  fn live_block(
    &self,
    ptr: HeapPtr,
  ) -> Result<usize, AllocError> {
    let heap = self.source.bytes();
    let bp = ptr.offset();

    if bp < self.prologue + DSIZE || bp >= heap.len() || bp % DSIZE != 0 {
      return Err(corruption(bp, "pointer does not name a block in this heap"));
    }
    let head = block::header(heap, bp);
    if head.size < MIN_BLOCK_SIZE || head.size % DSIZE != 0 || bp + head.size > heap.len() {
      return Err(corruption(bp, "block header holds an impossible size"));
    }
    if !head.allocated {
      error!("double free of block {:#x}", bp);
      return Err(AllocError::DoubleFree { offset: bp });
    }
    let foot = block::footer(heap, bp);
    if foot.size != head.size || !foot.allocated {
      return Err(corruption(bp, "block header and footer disagree"));
    }
    Ok(bp)
  }
}

fn corruption(
  offset: usize,
  reason: &'static str,
) -> AllocError {
  error!("heap corruption at {:#x}: {}", offset, reason);
  AllocError::CorruptionDetected { offset, reason }
}

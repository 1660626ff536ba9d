//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a general-purpose **segregated free-list allocator**
//! managing a single contiguous heap that only grows, through a primitive
//! "grow the heap by N bytes" call such as `sbrk(2)`.
//!
//! ## Overview
//!
//! Every block carries a boundary tag at both ends, so the allocator can
//! walk to either neighbour without any side table:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            HEAP                                      │
//!   │                                                                      │
//!   │  ┌───┬────┬────────┬──────────┬────────┬─────────────────────┬───┐   │
//!   │  │pad│ P  │ used   │  free    │ used   │        free         │ E │   │
//!   │  └───┴────┴────────┴──────────┴────────┴─────────────────────┴───┘   │
//!   │        ▲                                                       ▲     │
//!   │    prologue                                               epilogue   │
//!   │                                                            (top)     │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Free blocks are threaded onto one of twenty size-class lists, class *i*
//! holding sizes in `[2^i, 2^(i+1))`, each list sorted by size. Allocation
//! searches from the tightest class upwards and splits what it finds;
//! freeing merges with free neighbours immediately.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_down!)
//!   ├── block      - Boundary tags and block navigation (internal)
//!   ├── registry   - Size-class free lists (internal)
//!   ├── allocator  - Allocator: allocate / free / reallocate
//!   ├── check      - Heap consistency checker and statistics
//!   ├── source     - HeapSource trait, the host's grow primitive
//!   ├── memlib     - MemLib, a simulated fixed-capacity heap
//!   ├── sbrk       - Sbrk, the real process break
//!   ├── config     - Tunables
//!   ├── error      - AllocError
//!   └── trace      - Malloc-lab trace replay
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Allocator, MemLib};
//!
//! let mut allocator = Allocator::new(MemLib::new()?)?;
//!
//! let ptr = allocator.allocate(64)?;
//! allocator.payload_mut(ptr)?[..5].copy_from_slice(b"hello");
//!
//! let ptr = allocator.reallocate(Some(ptr), 256)?.expect("non-zero size");
//! assert_eq!(&allocator.payload(ptr)?[..5], b"hello");
//!
//! allocator.free(ptr)?;
//! allocator.check()?;
//! # Ok::<(), segalloc::AllocError>(())
//! ```
//!
//! ## How Blocks Look
//!
//! ```text
//!   Allocated Block:
//!   ┌──────────┬────────────────────────────────────┬──────────┐
//!   │  header  │            User Data               │  footer  │
//!   │ size|R|A │                                    │ size|A   │
//!   └──────────┴────────────────────────────────────┴──────────┘
//!              ▲
//!              └── HeapPtr handed to the user (8-byte aligned)
//!
//!   Free Block:
//!   ┌──────────┬────────┬────────┬──────────────────┬──────────┐
//!   │  header  │  pred  │  succ  │     (unused)     │  footer  │
//!   └──────────┴────────┴────────┴──────────────────┴──────────┘
//! ```
//!
//! `A` is the allocated bit. `R` is the reallocation tag: a block right after
//! one that keeps being reallocated is reserved for that block's next
//! growth, so ordinary allocation and coalescing leave it alone.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: wrap the allocator in a lock to share it
//! - **Never shrinks**: freed memory is reused but not returned to the host
//! - **32-bit offsets**: one heap spans at most 4 GiB
//!
//! ## Safety
//!
//! Blocks are addressed by offsets into the heap and every access goes
//! through a bounds-checked slice. The only `unsafe` code lives in the heap
//! sources, which turn their raw region into that slice.

pub mod align;
mod allocator;
mod block;
mod check;
mod config;
mod error;
mod memlib;
mod registry;
mod sbrk;
mod source;
pub mod trace;

/// Alignment of every payload, in bytes.
pub const ALIGNMENT: usize = 8;

pub use allocator::{Allocator, HeapPtr};
pub use check::HeapStats;
pub use config::Config;
pub use error::AllocError;
pub use memlib::MemLib;
pub use sbrk::Sbrk;
pub use source::HeapSource;

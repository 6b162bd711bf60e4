//! Fixed-region heap allocation with boundary tags
//!
//! This crate manages a single byte region, acquired from the host exactly
//! once, and partitions and recycles it entirely on its own. Two allocator
//! variants share one block format:
//!
//! - [`Heap`] hands out stable addresses into the region. Placement is
//!   first-fit, freed blocks coalesce with their neighbors through the
//!   boundary tags.
//! - [`CompactingHeap`] hands out opaque [`Handle`]s instead. Blocks are
//!   free to move: every free slides the later blocks down and rewrites the
//!   redirection table, so the live data always forms one contiguous run and
//!   external fragmentation cannot occur.
//!
//! # Block format
//! Every block consists of a 4-byte header tag, the payload and a 4-byte
//! footer tag. A tag stores the payload size (a multiple of 8) with the
//! allocated flag in bit 0. The region starts with a single bootstrap word,
//! so the first header sits at offset 4 and all payloads are aligned to 8:
//!
//! ```text
//! offset: 0    4    8            8+s  12+s
//!         xxxx hhhh pppp ... pppp ffff hhhh ...      ~~~~~~~~~~~
//!         ^--- ^--- ^------------ ^--- ^---          virgin tail
//!         boot tag  payload (s)   tag  next block    ^
//!                                                    frontier
//! ```
//!
//! The *frontier* separates the structured prefix from the virgin tail.
//! Bytes past it have never held a block and are never scanned; the tail is
//! only consumed when no interior free block fits a request, and it grows
//! back whenever a free reaches the frontier:
//!
//! 1.  Allocating 8 bytes twice and freeing the first block leaves an
//!     interior free block and an untouched tail.
//!     ```text
//!     xxxx FREE ........ ffff USED ........ ffff ~~~~~~~~~~~~
//!                                                ^ frontier
//!     ```
//! 2.  Freeing the second block cannot leave a free block at the frontier.
//!     The span merges with the free left neighbor and the frontier
//!     retracts past both, restoring the empty-region picture.
//!     ```text
//!     xxxx ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
//!          ^ frontier
//!     ```
//!
//! Coalescing needs no free list: the footer of the left neighbor sits
//! directly below a block's header, the header of the right neighbor
//! directly above its footer, so both merges are O(1) tag reads.
//!
//! # Compaction
//! The handle-indirected variant trades O(n) work per free for a heap with
//! no interior free blocks at all. Freeing `B` moves every later block down
//! over it in one overlapping copy and rewrites the affected table slots:
//!
//! ```text
//! before:  xxxx [ A ][ B ][ C ][ D ]~~~~~~~~    RT: 0→A  1→B  2→C  3→D
//! free B:  xxxx [ A ][ C ][ D ]~~~~~~~~~~~~    RT: 0→A  1→∅  2→C' 3→D'
//! ```
//!
//! Handles are redirection-table slots, so callers observe nothing of the
//! move; the table slot is the one level of indirection that makes the
//! relocation safe.
//!
//! # Usage
//! ```
//! use tagheap::{CompactingHeap, Heap};
//!
//! let mut heap = Heap::new(tagheap::DEFAULT_CAPACITY);
//! let addr = heap.put(b"stable").unwrap();
//! let mut buf = [0_u8; 6];
//! heap.get(&mut buf, addr); // copies, then frees
//! assert_eq!(&buf, b"stable");
//!
//! let mut heap = CompactingHeap::new(4096);
//! let first = heap.put(b"first").unwrap();
//! let second = heap.put(b"second").unwrap();
//! heap.free(first); // "second" slides down, its handle stays valid
//! let mut buf = [0_u8; 6];
//! heap.get(&mut buf, second);
//! assert_eq!(&buf, b"second");
//! ```
//!
//! Both heaps are strictly single-threaded: every operation takes
//! `&mut self`, completes in bounded time and performs no locking. The
//! region is returned to the host only when the heap is dropped.
#![no_std]

extern crate alloc;

mod compact;
mod direct;
mod region;
mod stats;

pub use compact::{CompactingHeap, Handle};
pub use direct::Heap;
pub use region::Addr;
pub use stats::HeapReport;

/// Default region capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 1 << 20;

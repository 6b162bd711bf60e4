//! The direct allocator: stable addresses, first-fit placement and
//! boundary-tag coalescing.

use crate::region::{align8, Addr, Region, State, Tag, BLOCK_OVERHEAD, FIRST_HEADER, TAG_BYTES};
use crate::stats::{Counters, HeapReport};

/// Smallest leftover worth splitting off a free block: an 8-byte payload
/// plus the two tags bracketing it. A smaller remainder is absorbed into
/// the allocation instead.
const MIN_SPLIT: usize = 8 + BLOCK_OVERHEAD;

/// A fixed-capacity heap handing out stable payload addresses.
///
/// Allocation walks the structured prefix from the region base and places
/// the request in the first free block that fits, splitting off the
/// remainder when it is large enough to stand on its own. When no interior
/// block fits, a fresh block is bump-formatted at the frontier. Freeing
/// merges the block with free neighbors through the boundary tags and
/// retracts the frontier whenever the freed span reaches it, so the last
/// structured block is never free.
///
/// All operations complete in bounded time and touch no state outside the
/// heap; the type is deliberately not `Sync` and performs no locking.
///
/// ```
/// let mut heap = tagheap::Heap::new(4096);
///
/// let addr = heap.put(b"payload").unwrap();
/// let mut buf = [0_u8; 7];
/// heap.get(&mut buf, addr);
/// assert_eq!(&buf, b"payload");
/// ```
pub struct Heap {
    region: Region,
    counters: Counters,
}

impl Heap {
    /// Create a heap over a fresh region of `capacity` bytes.
    ///
    /// The backing bytes are obtained from the host once and never handed
    /// back until the heap is dropped.
    ///
    /// # Panics
    /// Panics if `capacity` is less than 16, not divisible by 8, or does
    /// not fit in 32 bits.
    pub fn new(capacity: usize) -> Self {
        let region = Region::new(capacity);
        log::debug!("formatted a {capacity} byte region");
        Self {
            region,
            counters: Counters::default(),
        }
    }

    /// The size of the managed region in bytes.
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Allocate `n` bytes, rounded up to a multiple of 8.
    ///
    /// Returns the address of the payload, or `None` if neither an interior
    /// free block nor the virgin tail can satisfy the request. `alloc(0)`
    /// succeeds and returns the address of a zero-length payload.
    pub fn alloc(&mut self, n: usize) -> Option<Addr> {
        self.counters.on_request();
        if n > self.capacity() {
            self.counters.on_fail();
            log::trace!("rejected oversized request for {n} bytes");
            return None;
        }
        let size = align8(n);

        // First fit: walk the structured prefix in address order.
        let fit = self
            .region
            .blocks()
            .find(|&(_, tag)| tag.state() == State::Free && tag.size() >= size);
        if let Some((header, tag)) = fit {
            return Some(self.place(header, tag.size(), size));
        }

        // No interior block fits: bump-format a fresh one at the frontier.
        let offset = self.region.frontier();
        if offset + size + BLOCK_OVERHEAD > self.capacity() {
            self.counters.on_fail();
            log::trace!("out of memory for a {size} byte block");
            return None;
        }
        self.region.write_tag(offset, Tag::used(size));
        self.region
            .write_tag(offset + TAG_BYTES + size, Tag::used(size));
        self.region.set_frontier(offset + size + BLOCK_OVERHEAD);
        self.counters.on_alloc(size);
        Some(Addr::new(offset + TAG_BYTES))
    }

    /// Place a request of `size` bytes into the free block at `header`.
    fn place(&mut self, header: usize, old: usize, size: usize) -> Addr {
        if old - size >= MIN_SPLIT {
            // Split: the fitted block in front, the remainder stays free.
            self.region.write_tag(header, Tag::used(size));
            self.region
                .write_tag(header + TAG_BYTES + size, Tag::used(size));

            let rest = old - size - BLOCK_OVERHEAD;
            let rest_header = header + size + BLOCK_OVERHEAD;
            self.region.write_tag(rest_header, Tag::free(rest));
            self.region
                .write_tag(rest_header + TAG_BYTES + rest, Tag::free(rest));
            self.counters.on_alloc(size);
        } else {
            // The remainder could not hold a block of its own: hand out the
            // whole span.
            self.region.write_tag(header, Tag::used(old));
            self.region
                .write_tag(header + TAG_BYTES + old, Tag::used(old));
            self.counters.interior_free(-1);
            self.counters.on_alloc(old);
        }
        Addr::new(header + TAG_BYTES)
    }

    /// Release the allocation at `addr`.
    ///
    /// The address must be one previously returned by [`alloc`](Self::alloc)
    /// or [`put`](Self::put) on this heap and not freed since; the heap does
    /// not detect violations of that contract.
    pub fn free(&mut self, addr: Addr) {
        let header = addr.header();
        let tag = self.region.read_tag(header);
        debug_assert_eq!(tag.state(), State::Used, "free of a block not in use");
        let size = tag.size();
        self.counters.on_free(size);

        let mut start = header;
        let mut span = size;

        // Right neighbor, reachable over our own footprint. A block ending
        // at the frontier has no right neighbor; it is reabsorbed into the
        // virgin tail instead.
        let next = header + size + BLOCK_OVERHEAD;
        let reaches_tail = next >= self.region.frontier();
        if !reaches_tail {
            let right = self.region.read_tag(next);
            if right.state() == State::Free {
                span += right.size() + BLOCK_OVERHEAD;
                self.counters.interior_free(-1);
            }
        }

        // Left neighbor, reachable through its footer. The probe skips the
        // first block: the word below it is the bootstrap word, not a footer.
        if header > FIRST_HEADER {
            let left = self.region.read_tag(header - TAG_BYTES);
            if left.state() == State::Free {
                start = header - BLOCK_OVERHEAD - left.size();
                span += left.size() + BLOCK_OVERHEAD;
                self.counters.interior_free(-1);
            }
        }

        if reaches_tail {
            // The merged span reaches the frontier: retract it and leave the
            // span virgin rather than formatting a trailing free block.
            self.region.set_frontier(start);
        } else {
            self.region.write_tag(start, Tag::free(span));
            self.region
                .write_tag(start + TAG_BYTES + span, Tag::free(span));
            self.counters.interior_free(1);
        }
    }

    /// Allocate room for `data` and copy it into the region.
    ///
    /// Returns the payload address on success and `None` when the
    /// allocation fails.
    pub fn put(&mut self, data: &[u8]) -> Option<Addr> {
        let addr = self.alloc(data.len())?;
        self.region
            .payload_mut(addr, data.len())
            .copy_from_slice(data);
        Some(addr)
    }

    /// Copy the payload at `addr` into `buf`, then free the allocation.
    ///
    /// At most the block's payload size is copied; `buf` should not be
    /// longer than the allocation it reads back.
    pub fn get(&mut self, buf: &mut [u8], addr: Addr) {
        let size = self.region.read_tag(addr.header()).size();
        let n = buf.len().min(size);
        buf[..n].copy_from_slice(self.region.payload(addr, n));
        self.free(addr);
    }

    /// Snapshot the diagnostic counters.
    pub fn report(&self) -> HeapReport {
        let tail_is_virgin = self.region.frontier() < self.capacity();
        self.counters.snapshot(self.capacity(), tail_is_virgin)
    }

    #[cfg(test)]
    pub(crate) fn region(&self) -> &Region {
        &self.region
    }
}

//! The handle-indirected allocator: relocatable blocks behind a redirection
//! table, compacted on every free.

use alloc::vec::Vec;

use crate::region::{align8, Addr, Region, Tag, BLOCK_OVERHEAD, TAG_BYTES};
use crate::stats::{Counters, HeapReport};

/// An opaque handle to an allocation in a [`CompactingHeap`].
///
/// A handle names a slot of the redirection table, not a place in the
/// region; the payload behind it moves whenever an earlier block is freed.
/// Handles stay valid until they are passed to
/// [`free`](CompactingHeap::free) or [`get`](CompactingHeap::get).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    const fn index(self) -> usize {
        self.0
    }
}

/// The redirection table: a bounded array of payload-address slots.
///
/// Slots are brought into scope lazily; a cleared slot is reused by the
/// next allocation before a fresh one is claimed. The scope never shrinks.
struct RedirectTable {
    slots: Vec<Option<Addr>>,
    limit: usize,
}

impl RedirectTable {
    fn new(limit: usize) -> Self {
        assert!(limit >= 1, "redirection table needs at least one slot");
        Self {
            slots: Vec::new(),
            limit,
        }
    }

    /// Find a slot for a new allocation: the first cleared one in scope, or
    /// a virgin slot if the limit permits. Returns `None` when the table is
    /// exhausted.
    fn claim(&mut self) -> Option<usize> {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            return Some(index);
        }
        if self.slots.len() < self.limit {
            self.slots.push(None);
            return Some(self.slots.len() - 1);
        }
        None
    }

    fn store(&mut self, index: usize, addr: Addr) {
        self.slots[index] = Some(addr);
    }

    fn clear(&mut self, index: usize) {
        self.slots[index] = None;
    }

    /// Resolve a handle to the payload address it currently redirects to.
    fn lookup(&self, handle: Handle) -> Option<Addr> {
        self.slots.get(handle.index()).copied().flatten()
    }

    /// Pull every live slot above `hole` down by `delta` bytes, following a
    /// compaction move of the underlying blocks.
    fn rebase(&mut self, hole: Addr, delta: usize) {
        for slot in self.slots.iter_mut() {
            if let Some(addr) = slot {
                if *addr > hole {
                    *addr = Addr::new(addr.offset() - delta);
                }
            }
        }
    }
}

/// A fixed-capacity heap handing out handles to relocatable blocks.
///
/// Live blocks always form one contiguous run from the region base: there
/// are no interior free blocks, ever. Allocation is a pure bump at the
/// frontier plus a redirection-table entry; freeing closes the hole by
/// sliding every later block down and rewriting the affected table slots,
/// so external fragmentation cannot build up no matter the workload.
///
/// ```
/// let mut heap = tagheap::CompactingHeap::new(4096);
///
/// let handle = heap.put(b"movable").unwrap();
/// let mut buf = [0_u8; 7];
/// heap.get(&mut buf, handle);
/// assert_eq!(&buf, b"movable");
/// ```
pub struct CompactingHeap {
    region: Region,
    table: RedirectTable,
    counters: Counters,
}

impl CompactingHeap {
    /// Default number of redirection-table slots.
    pub const DEFAULT_SLOTS: usize = 1 << 20;

    /// Create a heap over a fresh region of `capacity` bytes with the
    /// default redirection-table limit.
    ///
    /// # Panics
    /// Panics under the same capacity conditions as [`Heap::new`](crate::Heap::new).
    pub fn new(capacity: usize) -> Self {
        Self::with_slots(capacity, Self::DEFAULT_SLOTS)
    }

    /// Create a heap whose redirection table holds at most `slots` entries.
    ///
    /// Once `slots` allocations are simultaneously live, further requests
    /// fail even while region space remains.
    ///
    /// # Panics
    /// Panics if `slots` is zero or `capacity` is invalid.
    pub fn with_slots(capacity: usize, slots: usize) -> Self {
        let region = Region::new(capacity);
        let table = RedirectTable::new(slots);
        log::debug!("formatted a {capacity} byte region behind {slots} handle slots");
        Self {
            region,
            table,
            counters: Counters::default(),
        }
    }

    /// The size of the managed region in bytes.
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// The redirection-table limit.
    pub fn slot_capacity(&self) -> usize {
        self.table.limit
    }

    /// Allocate `n` bytes, rounded up to a multiple of 8.
    ///
    /// Returns a handle on success. Fails when the contiguous live run
    /// leaves no room at the frontier or the redirection table is
    /// exhausted. `alloc(0)` succeeds and yields a zero-length payload.
    pub fn alloc(&mut self, n: usize) -> Option<Handle> {
        self.counters.on_request();
        if n > self.capacity() {
            self.counters.on_fail();
            log::trace!("rejected oversized request for {n} bytes");
            return None;
        }
        let size = align8(n);

        let frontier = self.region.frontier();
        if frontier + size + BLOCK_OVERHEAD > self.capacity() {
            self.counters.on_fail();
            log::trace!("out of memory for a {size} byte block");
            return None;
        }
        let Some(slot) = self.table.claim() else {
            self.counters.on_fail();
            log::trace!("redirection table exhausted at {} slots", self.table.limit);
            return None;
        };

        self.region.write_tag(frontier, Tag::used(size));
        self.region
            .write_tag(frontier + TAG_BYTES + size, Tag::used(size));
        self.region.set_frontier(frontier + size + BLOCK_OVERHEAD);

        let addr = Addr::new(frontier + TAG_BYTES);
        self.table.store(slot, addr);
        self.counters.on_alloc(size);
        Some(Handle(slot))
    }

    /// Release the allocation behind `handle` and compact the live run.
    ///
    /// Every block above the freed one slides down by the freed footprint
    /// and the table slots that point at them are rewritten, so the live
    /// prefix stays contiguous. A dead or out-of-scope handle only bumps
    /// the failure counter.
    pub fn free(&mut self, handle: Handle) {
        let Some(addr) = self.table.lookup(handle) else {
            self.counters.on_fail();
            log::debug!("free through a dead handle {handle:?}");
            return;
        };

        let header = addr.header();
        let size = self.region.read_tag(header).size();
        let footprint = size + BLOCK_OVERHEAD;
        let frontier = self.region.frontier();

        // Close the hole with one overlap-tolerant move of everything above
        // it, then retarget the slots of the moved blocks.
        self.region.shift_down(header + footprint..frontier, header);
        self.region.set_frontier(frontier - footprint);
        self.table.clear(handle.index());
        self.table.rebase(addr, footprint);
        self.counters.on_free(size);
    }

    /// Allocate room for `data`, copy it into the region and return the
    /// handle.
    pub fn put(&mut self, data: &[u8]) -> Option<Handle> {
        let handle = self.alloc(data.len())?;
        let addr = self.table.lookup(handle)?;
        self.region
            .payload_mut(addr, data.len())
            .copy_from_slice(data);
        Some(handle)
    }

    /// Copy the payload behind `handle` into `buf`, then free it.
    ///
    /// At most the block's payload size is copied. A dead handle bumps the
    /// failure counter and leaves `buf` untouched.
    pub fn get(&mut self, buf: &mut [u8], handle: Handle) {
        let Some(addr) = self.table.lookup(handle) else {
            self.counters.on_fail();
            log::debug!("get through a dead handle {handle:?}");
            return;
        };
        let size = self.region.read_tag(addr.header()).size();
        let n = buf.len().min(size);
        buf[..n].copy_from_slice(self.region.payload(addr, n));
        self.free(handle);
    }

    /// The payload address a handle currently redirects to.
    ///
    /// Diagnostic only: the address is invalidated by the next free of any
    /// earlier block. `None` for dead handles.
    pub fn resolve(&self, handle: Handle) -> Option<Addr> {
        self.table.lookup(handle)
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

#[cfg(test)]
mod tests {
    use super::{CompactingHeap, Handle};
    use crate::region::{State, BLOCK_OVERHEAD, FIRST_HEADER, TAG_BYTES};
    use alloc::vec::Vec;

    /// Check that the live blocks form one contiguous tagged run from the
    /// region base to the frontier and that every live slot points at the
    /// payload of exactly one of them.
    fn assert_compacted(heap: &CompactingHeap, live: &[Handle]) {
        let region = heap.region();
        let mut expected = FIRST_HEADER;
        let mut payloads = Vec::new();
        for (header, tag) in region.blocks() {
            assert_eq!(header, expected, "hole in the live run");
            assert_eq!(tag.state(), State::Used, "free block in the live run");
            let footer = region.read_tag(header + TAG_BYTES + tag.size());
            assert_eq!(tag, footer, "header and footer disagree");
            payloads.push(header + TAG_BYTES);
            expected = header + tag.size() + BLOCK_OVERHEAD;
        }
        assert_eq!(expected, region.frontier());

        let mut resolved: Vec<usize> = live
            .iter()
            .map(|&handle| heap.resolve(handle).unwrap().offset())
            .collect();
        resolved.sort_unstable();
        assert_eq!(resolved, payloads, "table and region disagree");
    }

    #[test]
    fn allocations_are_bumped_in_order() {
        let mut heap = CompactingHeap::new(1024);
        let a = heap.alloc(8).unwrap();
        let b = heap.alloc(8).unwrap();
        let pa = heap.resolve(a).unwrap();
        let pb = heap.resolve(b).unwrap();
        assert!(pa < pb);
        assert_eq!(pa.offset() % 8, 0);
        assert_eq!(pb.offset() % 8, 0);
        assert_compacted(&heap, &[a, b]);
    }

    #[test]
    fn free_compacts_the_survivors() {
        let mut heap = CompactingHeap::new(1024);
        let a = heap.put(b"aaaaaaaa").unwrap();
        let b = heap.put(b"bbbbbbbb").unwrap();
        let c = heap.put(b"cccccccc").unwrap();
        let c_before = heap.resolve(c).unwrap();

        heap.free(b);
        assert_compacted(&heap, &[a, c]);

        // c moved down by b's footprint; a stayed put.
        let c_after = heap.resolve(c).unwrap();
        assert_eq!(c_after.offset(), c_before.offset() - (8 + BLOCK_OVERHEAD));
        assert_eq!(heap.resolve(a).unwrap().offset(), 8);

        // and the payloads went with the blocks
        let mut buf = [0_u8; 8];
        heap.get(&mut buf, c);
        assert_eq!(&buf, b"cccccccc");
        let mut buf = [0_u8; 8];
        heap.get(&mut buf, a);
        assert_eq!(&buf, b"aaaaaaaa");
        assert_eq!(heap.report().allocated_blocks, 0);
    }

    #[test]
    fn freeing_everything_drains_the_region() {
        let mut heap = CompactingHeap::new(1024);
        let handles: Vec<Handle> = (0..8).map(|_| heap.alloc(16).unwrap()).collect();
        for handle in handles {
            heap.free(handle);
        }
        assert_eq!(heap.region().frontier(), FIRST_HEADER);
        assert_eq!(heap.report().allocated_blocks, 0);
        assert_eq!(heap.report().aligned_bytes_free as usize, 1024);
    }

    #[test]
    fn cleared_slots_are_reused_first() {
        let mut heap = CompactingHeap::new(1024);
        let _a = heap.alloc(8).unwrap();
        let b = heap.alloc(8).unwrap();
        let _c = heap.alloc(8).unwrap();
        heap.free(b);

        // the new allocation lands in b's slot, not a virgin one
        let d = heap.alloc(8).unwrap();
        assert_eq!(d, b);
    }

    #[test]
    fn table_exhaustion_fails_despite_free_space() {
        let mut heap = CompactingHeap::with_slots(1024, 2);
        let a = heap.alloc(8).unwrap();
        let _b = heap.alloc(8).unwrap();
        assert!(heap.alloc(8).is_none());
        assert_eq!(heap.report().failed_requests, 1);

        heap.free(a);
        assert!(heap.alloc(8).is_some());
    }

    #[test]
    fn dead_handles_are_counted_and_ignored() {
        let mut heap = CompactingHeap::new(1024);
        let a = heap.alloc(8).unwrap();
        heap.free(a);
        let before = heap.report();

        heap.free(a);
        let mut buf = [0xab_u8; 4];
        heap.get(&mut buf, a);
        assert_eq!(buf, [0xab; 4], "dead get must not copy");

        let after = heap.report();
        assert_eq!(after.failed_requests, before.failed_requests + 2);
        assert_eq!(after.free_requests, before.free_requests);
        assert_eq!(after.allocated_blocks, 0);
    }

    #[test]
    fn oversized_and_tail_requests_fail() {
        let mut heap = CompactingHeap::new(64);
        assert!(heap.alloc(1 << 20).is_none());
        let _a = heap.alloc(32).unwrap();
        // 4 + 40 bytes used; another 32-byte block would need 40 more
        assert!(heap.alloc(32).is_none());
        assert_eq!(heap.report().failed_requests, 2);
    }

    #[test]
    fn zero_sized_allocation_is_deterministic() {
        let mut heap = CompactingHeap::new(64);
        let a = heap.alloc(0).unwrap();
        assert_eq!(heap.resolve(a).unwrap().offset() % 8, 0);
        assert_eq!(heap.report().padded_bytes_allocated, 8);
        heap.free(a);
        assert_eq!(heap.region().frontier(), FIRST_HEADER);
    }
}

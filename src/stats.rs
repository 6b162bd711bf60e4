//! Request counters and their public snapshot.

use core::fmt;

/// Point-in-time view of an allocator's bookkeeping.
///
/// Free-space figures count the virgin tail as free: as long as the frontier
/// has not reached the region end, `free_blocks` includes one block for the
/// tail and `padded_bytes_allocated + aligned_bytes_free` equals the region
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapReport {
    /// Blocks belonging to outstanding allocations.
    pub allocated_blocks: u64,
    /// Interior free blocks, plus one for the virgin tail if present.
    pub free_blocks: u64,
    /// Sum of the payload sizes of outstanding allocations.
    pub raw_bytes_allocated: u64,
    /// Sum of the block footprints (payload plus tags) of outstanding
    /// allocations.
    pub padded_bytes_allocated: u64,
    /// Capacity minus the bootstrap word minus `raw_bytes_allocated`.
    pub raw_bytes_free: u64,
    /// Capacity minus `padded_bytes_allocated`.
    pub aligned_bytes_free: u64,
    /// Allocation requests, successful or not.
    pub malloc_requests: u64,
    /// Free requests that released a block.
    pub free_requests: u64,
    /// Requests that failed: out of memory, exhausted handle table, or a
    /// dead handle.
    pub failed_requests: u64,
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of allocated blocks: {}", self.allocated_blocks)?;
        writeln!(f, "Number of free blocks: {}", self.free_blocks)?;
        writeln!(
            f,
            "Raw total number of bytes allocated: {}",
            self.raw_bytes_allocated
        )?;
        writeln!(
            f,
            "Padded total number of bytes allocated: {}",
            self.padded_bytes_allocated
        )?;
        writeln!(f, "Raw total number of bytes free: {}", self.raw_bytes_free)?;
        writeln!(
            f,
            "Aligned total number of bytes free: {}",
            self.aligned_bytes_free
        )?;
        writeln!(f, "Total number of Malloc requests: {}", self.malloc_requests)?;
        writeln!(f, "Total number of Free requests: {}", self.free_requests)?;
        write!(
            f,
            "Total number of request failures: {}",
            self.failed_requests
        )
    }
}

/// Running counters maintained by both allocator variants.
///
/// Byte totals and block counts move only on success; the derived free-space
/// figures are computed at snapshot time from the capacity.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    malloc_requests: u64,
    free_requests: u64,
    failed_requests: u64,
    allocated_blocks: u64,
    interior_free_blocks: u64,
    raw_bytes_allocated: u64,
    padded_bytes_allocated: u64,
}

impl Counters {
    /// Record an incoming allocation request.
    pub fn on_request(&mut self) {
        self.malloc_requests += 1;
    }

    /// Record a placed block of the given payload size.
    pub fn on_alloc(&mut self, size: usize) {
        self.allocated_blocks += 1;
        self.raw_bytes_allocated += size as u64;
        self.padded_bytes_allocated += size as u64 + 8;
    }

    /// Record the release of a block of the given payload size.
    pub fn on_free(&mut self, size: usize) {
        self.free_requests += 1;
        self.allocated_blocks -= 1;
        self.raw_bytes_allocated -= size as u64;
        self.padded_bytes_allocated -= size as u64 + 8;
    }

    /// Record a failed request.
    pub fn on_fail(&mut self) {
        self.failed_requests += 1;
    }

    /// Adjust the interior free-block count by `delta`.
    pub fn interior_free(&mut self, delta: i64) {
        let count = self.interior_free_blocks as i64 + delta;
        debug_assert!(count >= 0, "interior free-block count underflow");
        self.interior_free_blocks = count as u64;
    }

    pub fn snapshot(&self, capacity: usize, tail_is_virgin: bool) -> HeapReport {
        let capacity = capacity as u64;
        HeapReport {
            allocated_blocks: self.allocated_blocks,
            free_blocks: self.interior_free_blocks + u64::from(tail_is_virgin),
            raw_bytes_allocated: self.raw_bytes_allocated,
            padded_bytes_allocated: self.padded_bytes_allocated,
            raw_bytes_free: capacity - 4 - self.raw_bytes_allocated,
            aligned_bytes_free: capacity - self.padded_bytes_allocated,
            malloc_requests: self.malloc_requests,
            free_requests: self.free_requests,
            failed_requests: self.failed_requests,
        }
    }
}

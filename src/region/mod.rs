//! The managed byte region and its block structure.
//!
//! A [`Region`] owns the backing bytes acquired from the host exactly once
//! and keeps track of the *frontier*: the offset separating the structured
//! prefix (a gapless sequence of tagged blocks) from the virgin tail, which
//! is never formatted and never scanned.
mod tag;

pub(crate) use tag::{State, Tag};

use alloc::boxed::Box;
use alloc::vec;
use core::ops::Range;

/// Size of one boundary-tag word.
pub(crate) const TAG_BYTES: usize = 4;
/// Per-block overhead: one header and one footer tag.
pub(crate) const BLOCK_OVERHEAD: usize = 2 * TAG_BYTES;
/// Offset of the first block header, directly behind the bootstrap word.
pub(crate) const FIRST_HEADER: usize = TAG_BYTES;

/// Round a byte count up to the next multiple of 8.
pub(crate) const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// A payload address inside a region.
///
/// This is the currency of the direct allocator: the value handed out by an
/// allocation and handed back to free it. It is the offset of the first
/// payload byte from the region base and is always congruent to 0 mod 8.
/// Addresses order the same way the underlying blocks do, so callers may
/// compare them to reason about placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(usize);

impl Addr {
    pub(crate) const fn new(offset: usize) -> Self {
        Self(offset)
    }

    /// The byte offset of the payload from the region base.
    pub const fn offset(self) -> usize {
        self.0
    }

    /// The offset of the block header bracketing this payload.
    pub(crate) const fn header(self) -> usize {
        self.0 - TAG_BYTES
    }
}

/// The backing byte region together with the frontier marker.
pub(crate) struct Region {
    bytes: Box<[u8]>,
    /// Offset at which the next bump-allocated header would be formatted.
    /// Equal to one past the end of the last structured block, or
    /// [`FIRST_HEADER`] while the structured prefix is empty.
    frontier: usize,
}

impl Region {
    /// Acquire and format a fresh region of `capacity` bytes.
    ///
    /// The backing bytes are obtained from the host in this single
    /// allocation; the region never grows, shrinks, or reallocates
    /// afterwards. Formatting writes the bootstrap word: a free tag at
    /// offset 0 spanning the whole region, which anchors the first block
    /// header at offset 4 and thereby keeps every payload 8-aligned.
    ///
    /// # Panics
    /// Panics if `capacity` is less than 16, not divisible by 8, or too
    /// large for the 32-bit tag encoding.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 16, "region too small: minimum capacity is 16");
        assert!(capacity % 8 == 0, "capacity has to be divisible by 8");
        assert!(
            capacity <= u32::MAX as usize,
            "capacity has to fit in 32 bits"
        );

        let bytes = vec![0_u8; capacity].into_boxed_slice();
        let mut region = Self {
            bytes,
            frontier: FIRST_HEADER,
        };
        region.write_tag(0, Tag::free(capacity));
        region
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn frontier(&self) -> usize {
        self.frontier
    }

    pub fn set_frontier(&mut self, offset: usize) {
        debug_assert!(offset >= FIRST_HEADER && offset <= self.capacity());
        self.frontier = offset;
    }

    /// Read the boundary tag at `offset`.
    ///
    /// # Panics
    /// Panics if `offset` is not word-aligned or the word would extend past
    /// the end of the region.
    pub fn read_tag(&self, offset: usize) -> Tag {
        assert!(offset % TAG_BYTES == 0);
        assert!(offset + TAG_BYTES <= self.bytes.len());

        let mut raw = [0_u8; TAG_BYTES];
        raw.copy_from_slice(&self.bytes[offset..offset + TAG_BYTES]);
        Tag::from_raw(raw)
    }

    /// Write the boundary tag at `offset`.
    ///
    /// # Panics
    /// Panics under the same conditions as [`read_tag`](Self::read_tag).
    pub fn write_tag(&mut self, offset: usize, tag: Tag) {
        assert!(offset % TAG_BYTES == 0);
        assert!(offset + TAG_BYTES <= self.bytes.len());

        self.bytes[offset..offset + TAG_BYTES].copy_from_slice(&tag.as_raw());
    }

    /// Borrow `len` payload bytes starting at `addr`.
    pub fn payload(&self, addr: Addr, len: usize) -> &[u8] {
        &self.bytes[addr.offset()..addr.offset() + len]
    }

    /// Mutably borrow `len` payload bytes starting at `addr`.
    pub fn payload_mut(&mut self, addr: Addr, len: usize) -> &mut [u8] {
        &mut self.bytes[addr.offset()..addr.offset() + len]
    }

    /// Slide the bytes in `src` down to `dst`, tolerating overlap.
    ///
    /// This is the compaction primitive: it moves whole blocks (tags and
    /// payload alike) towards the region base in one pass.
    pub fn shift_down(&mut self, src: Range<usize>, dst: usize) {
        debug_assert!(dst <= src.start);
        self.bytes.copy_within(src, dst);
    }

    /// Iterate over the header offsets and tags of the structured prefix.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            region: self,
            offset: FIRST_HEADER,
        }
    }
}

/// Iterator over the blocks of the structured prefix, in address order.
pub(crate) struct Blocks<'region> {
    region: &'region Region,
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = (usize, Tag);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset < self.region.frontier() {
            let offset = self.offset;
            let tag = self.region.read_tag(offset);
            self.offset += tag.size() + BLOCK_OVERHEAD;
            Some((offset, tag))
        } else {
            None
        }
    }
}

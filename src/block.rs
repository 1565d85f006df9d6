//! Blocks: self-describing spans of a memory region
use core::{alloc::Layout, fmt, marker::PhantomData, mem::MaybeUninit, ptr, ptr::NonNull};

use crate::{
    error::{Error, Result},
    int::BlockOffset,
};

mod header;
use self::header::{Header, INFO_LAST, INFO_POISONED, INFO_USED, MAX_HEADER_SIZE};

/// The signature written into the usable space of a poisoned free block.
const POISON_PATTERN: [u8; 8] = [0xab, 0x5c, 0xab, 0x5c, 0xab, 0x5c, 0xab, 0x5c];

/// A handle to a block, i.e., the byte offset of its header from the start of
/// the (aligned) region.
///
/// Handles are only meaningful for the [`BlockRegion`] that produced them and
/// only until that region's block structure changes around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(usize);

impl Block {
    /// The byte offset of the block's header from the start of the region.
    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Which end of a free block a new allocation is carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carve {
    /// [`BlockRegion::alloc_first`]
    Front,
    /// [`BlockRegion::alloc_last`]
    Back,
}

/// Describes how a block operation affected a neighbor of the block it
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    /// The neighbor was not touched.
    Unchanged,
    /// Alignment padding was handed over to the (used) previous block.
    Shifted,
    /// A new free block was split off on this side.
    SplitNew,
    /// The following free block was moved and resized.
    Resized,
    /// The following free block was absorbed entirely.
    Merged,
}

/// The outcome of a successful carve or resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockResult {
    /// The used block.
    pub block: Block,
    /// What happened in front of `block`.
    pub prev: Neighbor,
    /// What happened behind `block`.
    pub next: Neighbor,
}

impl BlockResult {
    #[inline]
    fn unchanged(block: Block) -> Self {
        Self {
            block,
            prev: Neighbor::Unchanged,
            next: Neighbor::Unchanged,
        }
    }
}

/// A snapshot of one block, as produced by [`Blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    block: Block,
    outer_size: usize,
    inner_size: usize,
    info: u16,
    usable_space: NonNull<u8>,
}

impl BlockInfo {
    /// The handle of the block.
    #[inline]
    pub fn block(&self) -> Block {
        self.block
    }

    /// The byte offset of the block's header from the start of the region.
    #[inline]
    pub fn offset(&self) -> usize {
        self.block.0
    }

    /// The total number of bytes the block occupies, including its header.
    #[inline]
    pub fn outer_size(&self) -> usize {
        self.outer_size
    }

    /// The number of usable bytes.
    #[inline]
    pub fn inner_size(&self) -> usize {
        self.inner_size
    }

    /// Whether the block is free.
    #[inline]
    pub fn is_free(&self) -> bool {
        (self.info & INFO_USED) == 0
    }

    /// Whether the block ends at the end of the region.
    #[inline]
    pub fn is_last(&self) -> bool {
        (self.info & INFO_LAST) != 0
    }

    /// Whether the block holds the poison signature.
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        (self.info & INFO_POISONED) != 0
    }

    /// The start of the block's usable space.
    #[inline]
    pub fn usable_space(&self) -> NonNull<u8> {
        self.usable_space
    }
}

/// The placement a carve settled on.
#[derive(Debug, Clone, Copy)]
struct Plan {
    /// The distance between the free block's header and the used block's
    /// header.
    lead: usize,
    /// If set, `lead` is appended to this (used) block instead of becoming a
    /// free block of its own.
    shift_into: Option<Block>,
    /// The usable size of the used block, before absorbing any trailing slack.
    inner: usize,
}

#[doc = svgbobdoc::transform!(
/// A memory region partitioned into blocks whose headers live inside the
/// region itself.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///  region
///  ,--------+-------------------+--------+---------+--------+------------------,
///  | header |    usable space   | header | usable  | header |  usable space    |
///  | prev=0 |       (used)      | prev=A | (free)  | prev=B |     (used)       |
///  | next=A |                   | next=B |         | next=C |                  |
///  '--------+-------------------+--------+---------+--------+------------------'
///  |<--------- A bytes -------->|<---- B bytes --->|<-------- C bytes -------->|
/// ```
/// </center>
///
/// Every header records the outer size of its own block and of the block in
/// front of it, so the chain can be walked in both directions. Headers are
/// explicitly encoded into and decoded from the region's bytes (see
/// `block/header.rs` for the record format); blocks are identified by their
/// offset from the start of the region.
///
/// # Invariants
///
///  - The blocks cover the region exactly, in address order, without gaps or
///    overlaps.
///  - Every outer size is a multiple of [`Self::ALIGNMENT`].
///  - No two free blocks are adjacent after a public operation completes.
///  - A block flagged as poisoned is free and its usable space holds the
///    poison signature at [`Self::POISON_OFFSET`].
)]
pub struct BlockRegion<'pool, O> {
    /// The start of the region, aligned to `ALIGNMENT`.
    base: NonNull<u8>,
    /// The length of the region, a multiple of `ALIGNMENT`.
    len: usize,
    /// The block whose header has `INFO_LAST`.
    last: Block,
    _phantom: PhantomData<(&'pool mut [MaybeUninit<u8>], O)>,
}

// Safety: The region is exclusively borrowed for `'pool` and is only ever
//         accessed through `self`. `&self` methods do not write.
unsafe impl<O> Send for BlockRegion<'_, O> {}
unsafe impl<O> Sync for BlockRegion<'_, O> {}

impl<O: BlockOffset> fmt::Debug for BlockRegion<'_, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("blocks", &DebugBlocks(self))
            .finish()
    }
}

struct DebugBlocks<'a, 'pool, O>(&'a BlockRegion<'pool, O>);

impl<O: BlockOffset> fmt::Debug for DebugBlocks<'_, '_, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|b| {
                (
                    b.offset(),
                    b.outer_size(),
                    if b.is_free() { "free" } else { "used" },
                )
            }))
            .finish()
    }
}

#[inline]
fn align_up(x: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(x.checked_add(align - 1)? & !(align - 1))
}

#[inline]
fn align_down(x: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    x & !(align - 1)
}

impl<'pool, O: BlockOffset> BlockRegion<'pool, O> {
    /// The alignment of every block boundary and of every usable space. Outer
    /// sizes are multiples of this value.
    pub const ALIGNMENT: usize = if O::BYTES > 8 { O::BYTES } else { 8 };

    /// The size of a block header.
    pub const HEADER_SIZE: usize =
        (2 * O::BYTES + 2 + Self::ALIGNMENT - 1) & !(Self::ALIGNMENT - 1);

    /// The offset of the poison signature within a poisoned block's usable
    /// space.
    pub const POISON_OFFSET: usize = 0;

    /// The length of the poison signature.
    pub const POISON_LEN: usize = POISON_PATTERN.len();

    /// The smallest block that is split off as a free block of its own. Its
    /// usable space can hold the poison signature.
    pub const MIN_OUTER_SIZE: usize =
        Self::HEADER_SIZE + ((Self::POISON_LEN + Self::ALIGNMENT - 1) & !(Self::ALIGNMENT - 1));

    /// The largest block (and thus region) the offset type can describe.
    pub const MAX_OUTER_SIZE: usize =
        O::MAX.saturating_mul(Self::ALIGNMENT) & !(Self::ALIGNMENT - 1);

    /// Evaluates successfully if the parameters are valid.
    const VALID: () = {
        assert!(Self::HEADER_SIZE <= MAX_HEADER_SIZE);
        assert!(
            Self::POISON_OFFSET + Self::POISON_LEN <= Self::MIN_OUTER_SIZE - Self::HEADER_SIZE
        );
    };

    /// Partition `memory` into a single free block.
    ///
    /// The start of the region is rounded up and its end rounded down to
    /// [`Self::ALIGNMENT`]. Fails with [`Error::InvalidArgument`] if what
    /// remains is smaller than [`Self::MIN_OUTER_SIZE`] or larger than
    /// [`Self::MAX_OUTER_SIZE`].
    ///
    /// # Examples
    ///
    /// ```
    /// use blockfit::BlockRegion;
    /// use std::mem::MaybeUninit;
    /// let mut pool = [MaybeUninit::uninit(); 256];
    /// let (region, first) = BlockRegion::<u16>::init(&mut pool).unwrap();
    /// assert_eq!(region.iter().count(), 1);
    /// assert!(region.info(first).unwrap().is_free());
    /// ```
    #[inline]
    pub fn init(memory: &'pool mut [MaybeUninit<u8>]) -> Result<(Self, Block)> {
        // Safety: `memory` is a mutable reference, which guarantees the absence
        // of aliasing references. Being `'pool` means it will outlive `self`.
        unsafe {
            Self::init_ptr(NonNull::new_unchecked(
                memory as *mut [MaybeUninit<u8>] as *mut [u8],
            ))
        }
    }

    /// Partition a region specified by a slice pointer into a single free
    /// block.
    ///
    /// # Safety
    ///
    /// The memory will be considered owned by the returned value for `'pool`.
    /// It must be valid for reads and writes and must not be accessed through
    /// other means except via pointers to allocations carved from it.
    pub unsafe fn init_ptr(memory: NonNull<[u8]>) -> Result<(Self, Block)> {
        let () = Self::VALID;

        let len = memory.len();

        // Round up the starting address
        let unaligned_start = memory.as_ptr() as *mut u8 as usize;
        let start = align_up(unaligned_start, Self::ALIGNMENT).ok_or(Error::InvalidArgument)?;

        // Round down the length
        let len = len
            .checked_sub(start - unaligned_start)
            .map(|x| align_down(x, Self::ALIGNMENT))
            .ok_or(Error::InvalidArgument)?;

        if len < Self::MIN_OUTER_SIZE || len > Self::MAX_OUTER_SIZE {
            log::trace!(
                "region of {} usable bytes rejected (min {}, max {})",
                len,
                Self::MIN_OUTER_SIZE,
                Self::MAX_OUTER_SIZE
            );
            return Err(Error::InvalidArgument);
        }

        let mut region = Self {
            // Safety: `start` lies within `memory`, which is non-null.
            base: NonNull::new_unchecked(start as *mut u8),
            len,
            last: Block(0),
            _phantom: PhantomData,
        };

        let first = Block(0);
        region.write_header(
            first,
            Header {
                prev_size: 0,
                outer_size: len,
                info: INFO_LAST,
            },
        );

        log::trace!("region {:p}: [u8; {}] initialized", region.base, len);

        Ok((region, first))
    }

    /// The number of bytes managed by the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The (aligned) start of the region.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// The first block.
    #[inline]
    pub fn first(&self) -> Block {
        Block(0)
    }

    /// The last block.
    #[inline]
    pub fn last(&self) -> Block {
        self.last
    }

    /// Iterate over all blocks in address order. Use [`Iterator::rev`] to walk
    /// in the opposite direction.
    #[inline]
    pub fn iter(&self) -> Blocks<'_, 'pool, O> {
        Blocks {
            region: Some(self),
            range: Some((self.first(), self.last)),
        }
    }

    /// Get a snapshot of `block`.
    ///
    /// Fails with [`Error::OutOfRange`] if `block` is not one of the region's
    /// current blocks.
    pub fn info(&self, block: Block) -> Result<BlockInfo> {
        self.check_handle(block)?;
        Ok(self.info_unchecked(block))
    }

    /// The start of `block`'s usable space.
    ///
    /// # Panics
    ///
    /// Panics if `block` lies outside the region.
    #[inline]
    pub fn usable_space(&self, block: Block) -> NonNull<u8> {
        assert!(
            block.0 <= self.len - Self::HEADER_SIZE,
            "{:?} is out of the region",
            block
        );
        // Safety: `block.0 + HEADER_SIZE <= len`, so the result is at most one
        //         past the end of the region, hence non-null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(block.0 + Self::HEADER_SIZE)) }
    }

    /// Find the block whose usable space starts at `ptr`.
    ///
    /// The pointer is validated against the region's bounds and alignment,
    /// and the header found there must be consistent with its neighbors.
    /// Fails with [`Error::OutOfRange`] otherwise.
    ///
    /// # Safety
    ///
    /// If `ptr` lies inside the region at a block boundary plus
    /// [`Self::HEADER_SIZE`], it must be the usable space of one of the
    /// region's current blocks. Other pointers are rejected without reading
    /// the region.
    pub unsafe fn from_usable_space(&self, ptr: NonNull<u8>) -> Result<Block> {
        let offset = (ptr.as_ptr() as usize)
            .checked_sub(self.base.as_ptr() as usize)
            .and_then(|x| x.checked_sub(Self::HEADER_SIZE))
            .ok_or(Error::OutOfRange)?;

        if offset % Self::ALIGNMENT != 0 || offset > self.last.0 {
            return Err(Error::OutOfRange);
        }

        let block = Block(offset);
        if !self.is_consistent(block) {
            return Err(Error::OutOfRange);
        }
        Ok(block)
    }

    /// Check `layout` against a free block without modifying anything.
    ///
    /// Fails with [`Error::NotFound`] if `block` is used or too small once
    /// the header and alignment padding are accounted for, and with
    /// [`Error::OutOfRange`] if `block` is not one of the region's current
    /// blocks.
    pub fn can_alloc(&self, block: Block, layout: Layout) -> Result<()> {
        self.check_handle(block)?;
        self.can_alloc_unchecked(block, layout)
    }

    /// Carve an allocation for `layout` from the front of the free block
    /// `block`.
    ///
    /// Alignment padding in front of the allocation is given to the previous
    /// block if it is too small to become a free block of its own. Leftover
    /// space at the end becomes a new free block if it is large enough and is
    /// absorbed into the allocation otherwise.
    pub fn alloc_first(&mut self, block: Block, layout: Layout) -> Result<BlockResult> {
        self.check_handle(block)?;
        let plan = self.plan_first(block, layout)?;
        self.check_reusable(block)?;
        Ok(self.carve(block, plan))
    }

    /// Carve an allocation for `layout` from the back of the free block
    /// `block`, leaving a free block in front of it if the remainder is large
    /// enough.
    pub fn alloc_last(&mut self, block: Block, layout: Layout) -> Result<BlockResult> {
        self.check_handle(block)?;
        let plan = self.plan_last(block, layout)?;
        self.check_reusable(block)?;
        Ok(self.carve(block, plan))
    }

    /// Mark the used block `block` as free and merge it with free neighbors.
    ///
    /// Returns the resulting free block, which starts at `block` or at the
    /// previous block. Fails with [`Error::OutOfRange`] if `block` is free or
    /// not one of the region's current blocks.
    pub fn free(&mut self, block: Block) -> Result<Block> {
        self.check_handle(block)?;
        self.free_unchecked(block)
    }

    /// Change the usable size of the used block `block` without moving it.
    ///
    /// Growing succeeds only if the following block is free and large enough
    /// and fails with [`Error::ResourceExhausted`] otherwise. Shrinking always
    /// succeeds; the reclaimed space becomes (or joins) a free block if it is
    /// large enough.
    pub fn resize(&mut self, block: Block, new_inner_size: usize) -> Result<BlockResult> {
        self.check_handle(block)?;
        self.resize_unchecked(block, new_inner_size)
    }

    /// Write the poison signature into a free block's usable space.
    ///
    /// Returns `false` (and does nothing) if `block` is used, is not one of
    /// the region's current blocks, or its usable space cannot hold the
    /// signature.
    pub fn poison(&mut self, block: Block) -> bool {
        self.check_handle(block).is_ok() && self.poison_unchecked(block)
    }

    /// Check `block`'s header against its neighbors and, if the block is
    /// poisoned, its poison signature. Does not modify anything.
    ///
    /// Returns `false` for handles that are not the region's current blocks.
    pub fn is_valid(&self, block: Block) -> bool {
        self.check_handle(block).is_ok() && self.validate(block)
    }

    // The methods below trust `block` to be one of the region's current
    // blocks, e.g., because it was yielded by `iter` or found by
    // `from_usable_space`.

    pub(crate) fn info_unchecked(&self, block: Block) -> BlockInfo {
        let header = self.header(block);
        BlockInfo {
            block,
            outer_size: header.outer_size,
            inner_size: header.outer_size.saturating_sub(Self::HEADER_SIZE),
            info: header.info,
            usable_space: self.usable_space(block),
        }
    }

    /// The total number of bytes `block` occupies, including its header.
    #[inline]
    pub(crate) fn outer_size(&self, block: Block) -> usize {
        self.header(block).outer_size
    }

    /// The number of usable bytes in `block`.
    #[inline]
    pub(crate) fn inner_size(&self, block: Block) -> usize {
        self.outer_size(block).saturating_sub(Self::HEADER_SIZE)
    }

    /// Whether `block` is free.
    #[inline]
    pub(crate) fn is_free(&self, block: Block) -> bool {
        !self.header(block).is_used()
    }

    /// Get the block following `block` in memory.
    #[inline]
    pub(crate) fn next(&self, block: Block) -> Option<Block> {
        let header = self.header(block);
        if header.is_last() {
            return None;
        }
        let next = block.0.checked_add(header.outer_size)?;
        if next < self.len && self.len - next >= Self::HEADER_SIZE {
            Some(Block(next))
        } else {
            debug_assert!(false, "{:?} points past the end of the region", block);
            None
        }
    }

    /// Get the block preceding `block` in memory.
    #[inline]
    pub(crate) fn prev(&self, block: Block) -> Option<Block> {
        let prev_size = self.header(block).prev_size;
        if prev_size == 0 {
            return None;
        }
        match block.0.checked_sub(prev_size) {
            Some(prev) => Some(Block(prev)),
            None => {
                debug_assert!(false, "{:?} points before the start of the region", block);
                None
            }
        }
    }

    #[inline]
    pub(crate) fn can_alloc_unchecked(&self, block: Block, layout: Layout) -> Result<()> {
        self.plan_first(block, layout).map(|_| ())
    }

    pub(crate) fn free_unchecked(&mut self, block: Block) -> Result<Block> {
        if self.is_free(block) {
            return Err(Error::OutOfRange);
        }

        let prev = self.prev(block).filter(|&b| self.is_free(b));
        let next = self.next(block).filter(|&b| self.is_free(b));

        // Neighbors lose their poison signatures when merged, so check them
        // before anything is modified.
        for neighbor in prev.iter().chain(next.iter()) {
            self.check_reusable(*neighbor)?;
        }

        self.update_info(block, |info| info & !INFO_USED);

        if next.is_some() {
            self.merge_next(block);
        }

        Ok(match prev {
            Some(prev) => {
                self.merge_next(prev);
                prev
            }
            None => block,
        })
    }

    pub(crate) fn resize_unchecked(
        &mut self,
        block: Block,
        new_inner_size: usize,
    ) -> Result<BlockResult> {
        let header = self.header(block);
        if !header.is_used() {
            return Err(Error::OutOfRange);
        }

        let new_outer_size = Self::inner_size_for(new_inner_size)
            .and_then(|x| x.checked_add(Self::HEADER_SIZE))
            .ok_or(Error::ResourceExhausted)?;

        let mut result = BlockResult::unchanged(block);

        match self.next(block).filter(|&b| self.is_free(b)) {
            Some(next) => {
                if new_outer_size > header.outer_size + self.outer_size(next) {
                    return Err(Error::ResourceExhausted);
                }
                if new_outer_size == header.outer_size {
                    return Ok(result);
                }
                self.check_reusable(next)?;

                self.merge_next(block);
                result.next = Neighbor::Merged;

                if self.outer_size(block) - new_outer_size >= Self::MIN_OUTER_SIZE {
                    self.split(block, new_outer_size);
                    result.next = Neighbor::Resized;
                }
            }
            None => {
                if new_outer_size > header.outer_size {
                    return Err(Error::ResourceExhausted);
                }
                if header.outer_size - new_outer_size >= Self::MIN_OUTER_SIZE {
                    self.split(block, new_outer_size);
                    result.next = Neighbor::SplitNew;
                }
            }
        }

        Ok(result)
    }

    pub(crate) fn poison_unchecked(&mut self, block: Block) -> bool {
        let header = self.header(block);
        if header.is_used()
            || header.outer_size.saturating_sub(Self::HEADER_SIZE)
                < Self::POISON_OFFSET + Self::POISON_LEN
        {
            return false;
        }
        self.write_bytes(
            block.0 + Self::HEADER_SIZE + Self::POISON_OFFSET,
            &POISON_PATTERN,
        );
        self.update_info(block, |info| info | INFO_POISONED);
        true
    }

    /// Split `block` into a block of `first_outer_size` bytes and a new free
    /// block covering the rest, which is returned.
    ///
    /// The first block keeps its state. The new block inherits `INFO_LAST`.
    pub(crate) fn split(&mut self, block: Block, first_outer_size: usize) -> Block {
        let header = self.header(block);
        debug_assert_eq!(first_outer_size % Self::ALIGNMENT, 0);
        debug_assert!(first_outer_size >= Self::HEADER_SIZE);
        debug_assert!(header.outer_size - first_outer_size >= Self::HEADER_SIZE);

        let new_block = Block(block.0 + first_outer_size);
        let new_outer_size = header.outer_size - first_outer_size;

        self.write_header(
            new_block,
            Header {
                prev_size: first_outer_size,
                outer_size: new_outer_size,
                info: header.info & INFO_LAST,
            },
        );
        self.write_header(
            block,
            Header {
                outer_size: first_outer_size,
                info: header.info & !INFO_LAST,
                ..header
            },
        );

        if header.is_last() {
            self.last = new_block;
        } else if let Some(next) = self.next(new_block) {
            self.set_prev_size(next, new_outer_size);
        }

        new_block
    }

    /// Absorb the block following `block` into `block`, which keeps its
    /// state.
    fn merge_next(&mut self, block: Block) {
        let header = self.header(block);
        let next = match self.next(block) {
            Some(next) => next,
            None => {
                debug_assert!(false, "{:?} has no next block", block);
                return;
            }
        };
        let next_header = self.header(next);
        debug_assert!(!next_header.is_used());

        let outer_size = header.outer_size + next_header.outer_size;
        self.write_header(
            block,
            Header {
                outer_size,
                info: (header.info & !INFO_LAST) | (next_header.info & INFO_LAST),
                ..header
            },
        );

        if next_header.is_last() {
            self.last = block;
        } else if let Some(next_next) = self.next(block) {
            self.set_prev_size(next_next, outer_size);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_used(&mut self, block: Block) {
        self.update_info(block, |info| (info | INFO_USED) & !INFO_POISONED);
    }

    /// Move the start of the free block `block` back by `lead` bytes, giving
    /// them to `prev`. Returns the moved block.
    fn shift_into_prev(&mut self, prev: Block, block: Block, lead: usize) -> Block {
        let header = self.header(block);
        let prev_header = self.header(prev);
        debug_assert_eq!(prev.0 + prev_header.outer_size, block.0);
        debug_assert!(prev_header.is_used());
        debug_assert!(header.outer_size - lead >= Self::HEADER_SIZE);

        let prev_outer_size = prev_header.outer_size + lead;
        self.write_header(
            prev,
            Header {
                outer_size: prev_outer_size,
                ..prev_header
            },
        );

        let new_block = Block(block.0 + lead);
        let outer_size = header.outer_size - lead;
        self.write_header(
            new_block,
            Header {
                prev_size: prev_outer_size,
                outer_size,
                info: header.info & !INFO_POISONED,
            },
        );

        if header.is_last() {
            self.last = new_block;
        } else if let Some(next) = self.next(new_block) {
            self.set_prev_size(next, outer_size);
        }

        new_block
    }

    /// Round a requested size up to a usable size. Empty requests are served
    /// with `ALIGNMENT` bytes so that allocations have distinct addresses.
    #[inline]
    fn inner_size_for(size: usize) -> Option<usize> {
        align_up(size.max(1), Self::ALIGNMENT)
    }

    /// Decide where `layout` goes when carved from the front of `block`.
    fn plan_first(&self, block: Block, layout: Layout) -> Result<Plan> {
        let header = self.header(block);
        if header.is_used() {
            return Err(Error::NotFound);
        }

        let inner = Self::inner_size_for(layout.size()).ok_or(Error::NotFound)?;
        let align = layout.align().max(Self::ALIGNMENT);

        let usable = self.base.as_ptr() as usize + block.0 + Self::HEADER_SIZE;
        let mut lead = align_up(usable, align).ok_or(Error::NotFound)? - usable;
        let mut shift_into = None;

        if lead != 0 && lead < Self::MIN_OUTER_SIZE {
            // The padding can't host a free block.
            match self.prev(block) {
                Some(prev) => shift_into = Some(prev),
                None => {
                    // There's no one to hand the padding to. Pad enough to
                    // split off a free block instead.
                    let min_usable = usable
                        .checked_add(Self::MIN_OUTER_SIZE)
                        .ok_or(Error::NotFound)?;
                    lead = align_up(min_usable, align).ok_or(Error::NotFound)? - usable;
                }
            }
        }

        let required = lead
            .checked_add(Self::HEADER_SIZE)
            .and_then(|x| x.checked_add(inner))
            .ok_or(Error::NotFound)?;
        if required > header.outer_size {
            return Err(Error::NotFound);
        }

        Ok(Plan {
            lead,
            shift_into,
            inner,
        })
    }

    /// Decide where `layout` goes when carved from the back of `block`.
    fn plan_last(&self, block: Block, layout: Layout) -> Result<Plan> {
        let header = self.header(block);
        if header.is_used() {
            return Err(Error::NotFound);
        }

        let inner = Self::inner_size_for(layout.size()).ok_or(Error::NotFound)?;
        let align = layout.align().max(Self::ALIGNMENT);

        let start = self.base.as_ptr() as usize + block.0;
        let end = start + header.outer_size;
        // Place the usable space as far back as the alignment permits
        let used_start = end
            .checked_sub(inner)
            .map(|x| align_down(x, align))
            .and_then(|x| x.checked_sub(Self::HEADER_SIZE))
            .filter(|&x| x >= start)
            .ok_or(Error::NotFound)?;
        let lead = used_start - start;

        if lead == 0 || lead >= Self::MIN_OUTER_SIZE {
            return Ok(Plan {
                lead,
                shift_into: None,
                inner,
            });
        }

        match self.prev(block) {
            Some(prev) => Ok(Plan {
                lead,
                shift_into: Some(prev),
                inner,
            }),
            // The remainder in front can't become a free block and there's no
            // one to take it. Fall back to carving from the front.
            None => self.plan_first(block, layout),
        }
    }

    /// Execute a plan made by `plan_first` or `plan_last`.
    fn carve(&mut self, block: Block, plan: Plan) -> BlockResult {
        let mut result = BlockResult::unchanged(block);
        let mut block = block;

        if plan.lead != 0 {
            match plan.shift_into {
                Some(prev) => {
                    block = self.shift_into_prev(prev, block, plan.lead);
                    result.prev = Neighbor::Shifted;
                }
                None => {
                    // The leading free block keeps the original header, and
                    // its poison signature if it has one.
                    block = self.split(block, plan.lead);
                    result.prev = Neighbor::SplitNew;
                }
            }
        }

        let used_outer_size = Self::HEADER_SIZE + plan.inner;
        let outer_size = self.outer_size(block);
        debug_assert!(outer_size >= used_outer_size);

        if outer_size - used_outer_size >= Self::MIN_OUTER_SIZE {
            self.split(block, used_outer_size);
            result.next = Neighbor::SplitNew;
        }

        self.update_info(block, |info| (info | INFO_USED) & !INFO_POISONED);
        result.block = block;
        result
    }

    /// Fail with [`Error::OutOfRange`] unless `block` is one of the region's
    /// current blocks. Only headers reached by walking the chain from the
    /// first block are decoded.
    fn check_handle(&self, block: Block) -> Result<()> {
        if block.0 % Self::ALIGNMENT != 0 || block.0 > self.last.0 {
            return Err(Error::OutOfRange);
        }
        let mut cursor = self.first();
        while cursor < block {
            let outer_size = self.header(cursor).outer_size;
            if outer_size < Self::HEADER_SIZE {
                log::warn!("{:?} in region {:p} is corrupted", cursor, self.base);
                return Err(Error::Corrupted);
            }
            cursor = Block(cursor.0.checked_add(outer_size).ok_or(Error::Corrupted)?);
        }
        if cursor == block {
            Ok(())
        } else {
            log::trace!("{:?} is not a block of region {:p}", block, self.base);
            Err(Error::OutOfRange)
        }
    }

    /// The body of `is_valid`.
    fn validate(&self, block: Block) -> bool {
        if !self.is_consistent(block) {
            return false;
        }
        let header = self.header(block);
        if header.is_poisoned() {
            let mut signature = [0u8; POISON_PATTERN.len()];
            self.read_bytes(
                block.0 + Self::HEADER_SIZE + Self::POISON_OFFSET,
                &mut signature,
            );
            if signature != POISON_PATTERN {
                return false;
            }
        }
        true
    }

    /// Fail with [`Error::Corrupted`] if `block` is not valid.
    fn check_reusable(&self, block: Block) -> Result<()> {
        if self.validate(block) {
            Ok(())
        } else {
            log::warn!("{:?} in region {:p} is corrupted", block, self.base);
            Err(Error::Corrupted)
        }
    }

    /// Check that `block`'s header fits in the region and agrees with its
    /// neighbors' headers.
    fn is_consistent(&self, block: Block) -> bool {
        let header = self.header(block);

        if header.outer_size < Self::HEADER_SIZE || header.outer_size > self.len - block.0 {
            return false;
        }

        let end = block.0 + header.outer_size;
        if header.is_last() != (end == self.len) {
            return false;
        }
        if !header.is_last() {
            if self.len - end < Self::HEADER_SIZE {
                return false;
            }
            let next_header = self.header(Block(end));
            if next_header.prev_size != header.outer_size {
                return false;
            }
            // No two adjacent free blocks
            if !next_header.is_used() && !header.is_used() {
                return false;
            }
        }

        if header.prev_size != 0 {
            let prev = match block.0.checked_sub(header.prev_size) {
                Some(x) => Block(x),
                None => return false,
            };
            let prev_header = self.header(prev);
            if prev_header.outer_size != header.prev_size || prev_header.is_last() {
                return false;
            }
        } else if block.0 != 0 {
            return false;
        }

        true
    }

    #[inline]
    fn header(&self, block: Block) -> Header {
        let mut bytes = [0u8; MAX_HEADER_SIZE];
        let bytes = &mut bytes[..Self::HEADER_SIZE];
        self.read_bytes(block.0, bytes);
        Header::decode::<O>(bytes, Self::ALIGNMENT)
    }

    #[inline]
    fn write_header(&mut self, block: Block, header: Header) {
        let mut bytes = [0u8; MAX_HEADER_SIZE];
        let bytes = &mut bytes[..Self::HEADER_SIZE];
        header.encode::<O>(bytes, Self::ALIGNMENT);
        self.write_bytes(block.0, bytes);
    }

    #[inline]
    fn update_info(&mut self, block: Block, f: impl FnOnce(u16) -> u16) {
        let header = self.header(block);
        self.write_header(
            block,
            Header {
                info: f(header.info),
                ..header
            },
        );
    }

    #[inline]
    fn set_prev_size(&mut self, block: Block, prev_size: usize) {
        let header = self.header(block);
        self.write_header(block, Header { prev_size, ..header });
    }

    #[inline]
    fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        assert!(
            offset <= self.len && out.len() <= self.len - offset,
            "access to {}..{} is out of the region",
            offset,
            offset.wrapping_add(out.len())
        );
        // Safety: The range was checked above, the region is valid for reads
        //         for `'pool`, and only initialized bytes (headers and poison
        //         signatures written by `self`) are read.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), out.as_mut_ptr(), out.len())
        };
    }

    #[inline]
    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        assert!(
            offset <= self.len && bytes.len() <= self.len - offset,
            "access to {}..{} is out of the region",
            offset,
            offset.wrapping_add(bytes.len())
        );
        // Safety: The range was checked above and the region is valid for
        //         writes for `'pool`.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(offset), bytes.len())
        };
    }
}

/// An iterator over the blocks of a [`BlockRegion`] in address order.
///
/// The iterator reads the block chain lazily; the region can't be modified
/// while it exists.
pub struct Blocks<'a, 'pool, O> {
    region: Option<&'a BlockRegion<'pool, O>>,
    /// The blocks yet to be visited, inclusive on both ends.
    range: Option<(Block, Block)>,
}

impl<O> Clone for Blocks<'_, '_, O> {
    fn clone(&self) -> Self {
        Self {
            region: self.region,
            range: self.range,
        }
    }
}

impl<O> fmt::Debug for Blocks<'_, '_, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocks").field("range", &self.range).finish()
    }
}

impl<O> Blocks<'_, '_, O> {
    /// An iterator that yields nothing.
    #[inline]
    pub(crate) fn empty() -> Self {
        Self {
            region: None,
            range: None,
        }
    }
}

impl<O: BlockOffset> Iterator for Blocks<'_, '_, O> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.region?;
        let (front, back) = self.range?;
        self.range = if front == back {
            None
        } else {
            region.next(front).map(|next| (next, back))
        };
        Some(region.info_unchecked(front))
    }
}

impl<O: BlockOffset> DoubleEndedIterator for Blocks<'_, '_, O> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let region = self.region?;
        let (front, back) = self.range?;
        self.range = if front == back {
            None
        } else {
            region.prev(back).map(|prev| (front, prev))
        };
        Some(region.info_unchecked(back))
    }
}

impl<O: BlockOffset> core::iter::FusedIterator for Blocks<'_, '_, O> {}

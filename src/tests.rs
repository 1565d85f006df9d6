//! Test support shared by the unit tests of all modules.
extern crate std;

use std::{collections::BTreeMap, mem::MaybeUninit, ops::Range, prelude::v1::*, ptr::NonNull};

use crate::{block::Block, BlockOffset, BlockRegion};

/// A buffer aligned well beyond any block alignment, so that a region
/// covering it is not trimmed.
#[repr(align(64))]
pub struct Align<T>(pub T);

impl<const LEN: usize> Align<[MaybeUninit<u8>; LEN]> {
    pub fn uninit() -> Self {
        Align([MaybeUninit::uninit(); LEN])
    }
}

/// Keeps track of the live allocations handed out by an allocator and checks
/// that they stay inside the region and never overlap.
pub struct ShadowAllocator {
    region: Range<usize>,
    /// Start address of each live allocation → its end address
    live: BTreeMap<usize, usize>,
}

impl ShadowAllocator {
    pub fn new(base: NonNull<u8>, len: usize) -> Self {
        let start = base.as_ptr() as usize;
        Self {
            region: start..start + len,
            live: BTreeMap::new(),
        }
    }

    fn check_vacant(&self, range: Range<usize>) {
        assert!(
            self.region.start <= range.start && range.end <= self.region.end,
            "0x{:x}..0x{:x} is outside the region {:x?}",
            range.start,
            range.end,
            self.region
        );
        if let Some((&start, &end)) = self.live.range(..range.end).next_back() {
            assert!(
                end <= range.start,
                "0x{:x}..0x{:x} overlaps the live allocation 0x{:x}..0x{:x}",
                range.start,
                range.end,
                start,
                end
            );
        }
    }

    pub fn allocate(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        let start = ptr.as_ptr() as usize;
        log::trace!("sa: allocate 0x{:x}..0x{:x}", start, start + size);
        assert!(
            start % align == 0,
            "0x{:x} is not properly aligned (0x{:x} bytes alignment required)",
            start,
            align
        );
        self.check_vacant(start..start + size);
        self.live.insert(start, start + size);
    }

    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        let start = ptr.as_ptr() as usize;
        log::trace!("sa: deallocate 0x{:x}", start);
        assert!(
            self.live.remove(&start).is_some(),
            "0x{:x} is not a live allocation",
            start
        );
    }

    pub fn resize(&mut self, ptr: NonNull<u8>, new_size: usize) {
        let start = ptr.as_ptr() as usize;
        log::trace!("sa: resize 0x{:x} to {} bytes", start, new_size);
        let removed = self.live.remove(&start);
        assert!(removed.is_some(), "0x{:x} is not a live allocation", start);
        self.check_vacant(start..start + new_size);
        self.live.insert(start, start + new_size);
    }
}

/// Walk the whole block chain of `region` and check every structural
/// invariant. Returns the number of blocks.
pub fn check_region<O: BlockOffset>(region: &BlockRegion<'_, O>) -> usize {
    let align = BlockRegion::<O>::ALIGNMENT;
    let mut expected_offset = 0;
    let mut prev_free = false;
    let mut count = 0;

    for block in region.iter() {
        assert_eq!(block.offset(), expected_offset, "gap or overlap at {:?}", block);
        assert_eq!(block.outer_size() % align, 0, "{:?} is misaligned", block);
        assert!(
            block.outer_size() >= BlockRegion::<O>::HEADER_SIZE,
            "{:?} is smaller than a header",
            block
        );
        assert!(!(prev_free && block.is_free()), "two adjacent free blocks at {:?}", block);
        assert!(region.is_valid(block.block()), "{:?} is not valid", block);
        assert_eq!(
            block.usable_space().as_ptr() as usize % align,
            0,
            "usable space of {:?} is misaligned",
            block
        );
        if block.is_poisoned() {
            assert!(block.is_free(), "{:?} is used but poisoned", block);
        }

        expected_offset += block.outer_size();
        assert_eq!(block.is_last(), expected_offset == region.len());
        prev_free = block.is_free();
        count += 1;
    }
    assert_eq!(expected_offset, region.len(), "the blocks don't cover the region");
    assert_eq!(region.last().offset() + region.outer_size(region.last()), region.len());

    // Walking backwards visits the same blocks
    let forward: Vec<_> = region.iter().map(|b| b.offset()).collect();
    let mut backward: Vec<_> = region.iter().rev().map(|b| b.offset()).collect();
    backward.reverse();
    assert_eq!(forward, backward);

    count
}

/// The size of the last preallocated block is whatever remains.
pub const SIZE_REMAINING: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Free,
    Used,
}

/// Partition a freshly initialized region into blocks of the given outer
/// sizes and states. Returns the blocks in address order.
pub fn preallocate<O: BlockOffset>(
    region: &mut BlockRegion<'_, O>,
    pattern: &[(usize, State)],
) -> Vec<Block> {
    assert_eq!(region.iter().count(), 1, "the region is already partitioned");

    let mut blocks = Vec::new();
    let mut block = region.first();
    for &(outer_size, _) in pattern {
        blocks.push(block);
        if outer_size != SIZE_REMAINING {
            block = region.split(block, outer_size);
        }
    }

    for (&block, &(_, state)) in blocks.iter().zip(pattern) {
        if state == State::Used {
            region.set_used(block);
        }
    }

    check_region(region);
    blocks
}

//! Block selection policies
use core::alloc::Layout;

use crate::{
    block::{Block, BlockInfo, BlockRegion, Carve},
    int::BlockOffset,
};

mod best_fit;
mod dual_first_fit;
mod first_fit;
mod last_fit;
mod worst_fit;
pub use self::{
    best_fit::BestFit, dual_first_fit::DualFirstFit, first_fit::FirstFit, last_fit::LastFit,
    worst_fit::WorstFit,
};

/// Decides which free block serves an allocation request and from which end
/// of that block the allocation is carved.
///
/// A strategy only inspects the region; the carving itself is done by
/// [`BlockAllocator`](crate::BlockAllocator).
pub trait Strategy {
    /// Pick a free block that can hold `layout`, or `None` if there is no
    /// such block.
    fn choose_block<O: BlockOffset>(
        &self,
        region: &BlockRegion<'_, O>,
        layout: Layout,
    ) -> Option<(Block, Carve)>;
}

/// Whether `block`, as yielded by `region.iter()`, is free and can hold
/// `layout`.
#[inline]
fn fits<O: BlockOffset>(region: &BlockRegion<'_, O>, block: &BlockInfo, layout: Layout) -> bool {
    block.is_free() && region.can_alloc_unchecked(block.block(), layout).is_ok()
}

#[cfg(test)]
mod tests;

use core::alloc::Layout;

use super::{fits, Strategy};
use crate::{
    block::{Block, BlockRegion, Carve},
    int::BlockOffset,
};

/// Use the last free block, in address order, that can hold the request.
/// Allocations are carved from the back of the block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LastFit;

impl const_default1::ConstDefault for LastFit {
    const DEFAULT: Self = Self;
}

impl Strategy for LastFit {
    fn choose_block<O: BlockOffset>(
        &self,
        region: &BlockRegion<'_, O>,
        layout: Layout,
    ) -> Option<(Block, Carve)> {
        region
            .iter()
            .rev()
            .find(|b| fits(region, b, layout))
            .map(|b| (b.block(), Carve::Back))
    }
}

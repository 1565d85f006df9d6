use core::alloc::Layout;

use super::{fits, Strategy};
use crate::{
    block::{Block, BlockRegion, Carve},
    int::BlockOffset,
};

/// Use the first free block, in address order, that can hold the request.
/// Allocations are carved from the front of the block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FirstFit;

impl const_default1::ConstDefault for FirstFit {
    const DEFAULT: Self = Self;
}

impl Strategy for FirstFit {
    fn choose_block<O: BlockOffset>(
        &self,
        region: &BlockRegion<'_, O>,
        layout: Layout,
    ) -> Option<(Block, Carve)> {
        region
            .iter()
            .find(|b| fits(region, b, layout))
            .map(|b| (b.block(), Carve::Front))
    }
}

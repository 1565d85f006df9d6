use core::alloc::Layout;

use super::{fits, Strategy};
use crate::{
    block::{Block, BlockRegion, Carve},
    int::BlockOffset,
};

/// Use the smallest free block that can hold the request. Ties go to the
/// lowest address.
///
/// This minimizes the space left over next to each allocation at the cost of
/// scanning every block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BestFit;

impl const_default1::ConstDefault for BestFit {
    const DEFAULT: Self = Self;
}

impl Strategy for BestFit {
    fn choose_block<O: BlockOffset>(
        &self,
        region: &BlockRegion<'_, O>,
        layout: Layout,
    ) -> Option<(Block, Carve)> {
        let mut best = None;
        for b in region.iter().filter(|b| fits(region, b, layout)) {
            match best {
                Some((_, inner_size)) if inner_size <= b.inner_size() => {}
                _ => best = Some((b.block(), b.inner_size())),
            }
        }
        best.map(|(block, _)| (block, Carve::Front))
    }
}

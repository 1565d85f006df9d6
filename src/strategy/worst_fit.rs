use core::alloc::Layout;

use super::{fits, Strategy};
use crate::{
    block::{Block, BlockRegion, Carve},
    int::BlockOffset,
};

/// Use the largest free block. Ties go to the lowest address.
///
/// Carving from the largest block tends to leave remainders that are still
/// useful for later requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WorstFit;

impl const_default1::ConstDefault for WorstFit {
    const DEFAULT: Self = Self;
}

impl Strategy for WorstFit {
    fn choose_block<O: BlockOffset>(
        &self,
        region: &BlockRegion<'_, O>,
        layout: Layout,
    ) -> Option<(Block, Carve)> {
        let mut worst = None;
        for b in region.iter().filter(|b| fits(region, b, layout)) {
            match worst {
                Some((_, inner_size)) if inner_size >= b.inner_size() => {}
                _ => worst = Some((b.block(), b.inner_size())),
            }
        }
        worst.map(|(block, _)| (block, Carve::Front))
    }
}

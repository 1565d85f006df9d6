use core::alloc::Layout;

use super::{FirstFit, LastFit, Strategy};
use crate::{
    block::{Block, BlockRegion, Carve},
    int::BlockOffset,
};

/// Serve large requests like [`LastFit`] and small requests like
/// [`FirstFit`], keeping the two kinds at opposite ends of the region.
///
/// A request is large if its size is at least [`Self::threshold`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DualFirstFit {
    threshold: usize,
}

impl const_default1::ConstDefault for DualFirstFit {
    const DEFAULT: Self = Self::new(0);
}

impl DualFirstFit {
    #[inline]
    pub const fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// The size in bytes from which on a request is considered large.
    #[inline]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    #[inline]
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }
}

impl Strategy for DualFirstFit {
    fn choose_block<O: BlockOffset>(
        &self,
        region: &BlockRegion<'_, O>,
        layout: Layout,
    ) -> Option<(Block, Carve)> {
        if layout.size() >= self.threshold {
            LastFit.choose_block(region, layout)
        } else {
            FirstFit.choose_block(region, layout)
        }
    }
}

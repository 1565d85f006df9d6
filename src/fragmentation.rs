//! Fragmentation metrics
use core::ops::AddAssign;

/// Statistics over the free blocks of an allocator, from which a
/// fragmentation score can be derived.
///
/// Each free block contributes its inner size divided by the block alignment.
/// A region whose free space is one large block has `sum_of_squares ==
/// sum * sum`; the more the free space is scattered, the smaller
/// `sum_of_squares` becomes relative to that.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Fragmentation {
    /// The sum of the normalized free sizes.
    pub sum: usize,
    /// The sum of the squares of the normalized free sizes.
    pub sum_of_squares: u128,
}

impl Fragmentation {
    pub const EMPTY: Self = Self {
        sum: 0,
        sum_of_squares: 0,
    };

    /// Account for a free block of `normalized_size` (its inner size divided
    /// by the block alignment).
    #[inline]
    pub fn add_fragment(&mut self, normalized_size: usize) {
        self.sum += normalized_size;
        self.sum_of_squares += (normalized_size as u128) * (normalized_size as u128);
    }
}

impl AddAssign<usize> for Fragmentation {
    #[inline]
    fn add_assign(&mut self, normalized_size: usize) {
        self.add_fragment(normalized_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate() {
        let mut frag = Fragmentation::EMPTY;
        frag.add_fragment(3);
        frag += 4;
        assert_eq!(frag.sum, 7);
        assert_eq!(frag.sum_of_squares, 25);
    }

    #[test]
    fn no_overflow() {
        let mut frag = Fragmentation::default();
        frag.add_fragment(usize::MAX >> 1);
        frag.add_fragment(1);
        assert_eq!(frag.sum, (usize::MAX >> 1) + 1);
        assert!(frag.sum_of_squares > usize::MAX as u128);
    }
}

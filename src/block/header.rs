//! The serialized form of a block header.
//!
//! A header is `HEADER_SIZE` bytes long and laid out as follows (`W` is the
//! byte width of the offset type, all integers are little endian):
//!
//! | bytes            | field  | meaning                                        |
//! |------------------|--------|------------------------------------------------|
//! | `0..W`           | `prev` | previous block's outer size / `ALIGNMENT`      |
//! | `W..2W`          | `next` | this block's outer size / `ALIGNMENT`          |
//! | `2W..2W+2`       | `info` | `USED`, `LAST`, `POISONED` flags               |
//! | `2W+2..`         | -      | zero                                           |
use crate::int::BlockOffset;

/// The block is handed out to a caller.
pub(super) const INFO_USED: u16 = 1 << 0;
/// The block is the last one of the region.
pub(super) const INFO_LAST: u16 = 1 << 1;
/// The block's usable space starts with the poison signature.
pub(super) const INFO_POISONED: u16 = 1 << 2;

/// Upper bound of `HEADER_SIZE` over all supported offset types.
pub(super) const MAX_HEADER_SIZE: usize = 32;

/// A decoded block header. Sizes are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Header {
    /// The outer size of the previous block. Zero for the first block.
    pub prev_size: usize,
    /// The outer size of this block, i.e., the distance to the next block.
    pub outer_size: usize,
    pub info: u16,
}

impl Header {
    #[inline]
    pub fn decode<O: BlockOffset>(bytes: &[u8], alignment: usize) -> Self {
        let w = O::BYTES;
        Self {
            prev_size: O::decode(&bytes[..w]).saturating_mul(alignment),
            outer_size: O::decode(&bytes[w..2 * w]).saturating_mul(alignment),
            info: u16::from_le_bytes([bytes[2 * w], bytes[2 * w + 1]]),
        }
    }

    /// Write the header into `bytes`, which must be exactly `HEADER_SIZE`
    /// bytes long.
    #[inline]
    pub fn encode<O: BlockOffset>(&self, bytes: &mut [u8], alignment: usize) {
        debug_assert_eq!(self.prev_size % alignment, 0);
        debug_assert_eq!(self.outer_size % alignment, 0);

        let w = O::BYTES;
        O::encode(self.prev_size / alignment, &mut bytes[..w]);
        O::encode(self.outer_size / alignment, &mut bytes[w..2 * w]);
        bytes[2 * w..2 * w + 2].copy_from_slice(&self.info.to_le_bytes());
        bytes[2 * w + 2..].fill(0);
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        (self.info & INFO_USED) != 0
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        (self.info & INFO_LAST) != 0
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        (self.info & INFO_POISONED) != 0
    }
}

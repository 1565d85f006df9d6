//! Integers usable as the offset fields of a block header.
use core::fmt;

/// An unsigned integer type whose width determines the size of the `prev` and
/// `next` fields of a block header, and thus the largest region a block
/// allocator can manage.
///
/// The fields are stored in units of the block alignment, so a `u16` offset
/// can describe blocks of up to `u16::MAX * ALIGNMENT` bytes.
///
/// This trait is sealed and implemented for `u16`, `u32`, `u64`, and `usize`.
pub trait BlockOffset: private::Sealed + Copy + fmt::Debug + Send + Sync + 'static {
    /// The encoded width in bytes.
    const BYTES: usize;

    /// The largest representable value, saturated to `usize`.
    const MAX: usize;

    /// Decode a value from the first [`Self::BYTES`] bytes of `bytes`
    /// (little endian).
    fn decode(bytes: &[u8]) -> usize;

    /// Encode `value` into the first [`Self::BYTES`] bytes of `bytes` (little
    /// endian).
    ///
    /// `value` must not exceed [`Self::MAX`].
    fn encode(value: usize, bytes: &mut [u8]);
}

mod private {
    pub trait Sealed {}
}

macro_rules! impl_block_offset {
    ($($ty:ty),*) => {$(
        impl private::Sealed for $ty {}

        impl BlockOffset for $ty {
            const BYTES: usize = core::mem::size_of::<$ty>();

            const MAX: usize = if (<$ty>::MAX as u128) < (usize::MAX as u128) {
                <$ty>::MAX as usize
            } else {
                usize::MAX
            };

            #[inline]
            fn decode(bytes: &[u8]) -> usize {
                let mut buf = [0u8; core::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..core::mem::size_of::<$ty>()]);
                <$ty>::from_le_bytes(buf) as usize
            }

            #[inline]
            fn encode(value: usize, bytes: &mut [u8]) {
                debug_assert!(value <= <Self as BlockOffset>::MAX);
                let buf = (value as $ty).to_le_bytes();
                bytes[..buf.len()].copy_from_slice(&buf);
            }
        }
    )*};
}

impl_block_offset!(u16, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: BlockOffset>(value: usize) {
        let mut buf = [0xffu8; 8];
        T::encode(value, &mut buf);
        assert_eq!(T::decode(&buf), value);
        // Bytes past the field are left alone
        assert!(buf[T::BYTES..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn widths() {
        assert_eq!(<u16 as BlockOffset>::BYTES, 2);
        assert_eq!(<u32 as BlockOffset>::BYTES, 4);
        assert_eq!(<u64 as BlockOffset>::BYTES, 8);
        assert_eq!(<u16 as BlockOffset>::MAX, 0xffff);
        assert_eq!(<u64 as BlockOffset>::MAX, usize::MAX.min(u64::MAX as usize));
    }

    #[test]
    fn extremes() {
        roundtrip::<u16>(0);
        roundtrip::<u16>(0xffff);
        roundtrip::<u32>(0x1234_5678);
        roundtrip::<usize>(usize::MAX);
    }

    #[test]
    fn encode_max() {
        let mut buf = [0u8; 8];
        <u16 as BlockOffset>::encode(<u16 as BlockOffset>::MAX, &mut buf);
        assert_eq!(&buf[..2], &[0xff, 0xff]);
        <u32 as BlockOffset>::encode(<u32 as BlockOffset>::MAX, &mut buf);
        assert_eq!(&buf[..4], &[0xff; 4]);
        <u64 as BlockOffset>::encode(<u64 as BlockOffset>::MAX, &mut buf);
        assert_eq!(<u64 as BlockOffset>::decode(&buf), <u64 as BlockOffset>::MAX);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn encode_overflow() {
        let mut buf = [0u8; 2];
        <u16 as BlockOffset>::encode(0x1_0000, &mut buf);
    }

    #[test]
    fn little_endian() {
        let mut buf = [0u8; 4];
        <u32 as BlockOffset>::encode(0x0403_0201, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}

//! Error types.

/// The error type of block and block allocator operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// The memory region is too small, or too large for the offset type, to
    /// host a block.
    #[error("the region cannot host a block")]
    InvalidArgument,

    /// No free block can satisfy the requested layout.
    #[error("no free block can satisfy the request")]
    NotFound,

    /// The block cannot be grown in place.
    #[error("the block cannot grow in place")]
    ResourceExhausted,

    /// The pointer does not refer to a live allocation in this region.
    #[error("the pointer does not refer to a live allocation in this region")]
    OutOfRange,

    /// Block metadata or a poisoned free block was found modified.
    #[error("block metadata or poisoned memory is corrupted")]
    Corrupted,
}

/// A specialized [`Result`](core::result::Result) type for block operations.
pub type Result<T> = core::result::Result<T, Error>;

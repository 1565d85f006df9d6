//! This crate implements block allocators: general purpose dynamic memory
//! allocators that keep their bookkeeping inside the memory they manage.
//!
//!  - **The memory region is provided by an application.** Examples of
//!    potential memory region sources include: a `static` array, a memory
//!    block allocated by another memory allocator for arena allocation.
//!
//!  - **No side tables.** The region is partitioned into [blocks], each
//!    starting with a small header that records its own size and the size of
//!    the block in front of it. The headers are serialized explicitly, so the
//!    allocator is position independent and never reinterprets the region as
//!    structs.
//!
//!  - **Pluggable policy.** A [`Strategy`] decides which free block serves a
//!    request: [`FirstFit`], [`LastFit`], [`BestFit`], [`WorstFit`], or
//!    [`DualFirstFit`]. Everything else (splitting, merging, alignment, in-place
//!    resizing) is shared.
//!
//!  - **Corruption detection.** Every N-th freed block can be *poisoned* with a
//!    signature that is verified before the block is reused or merged, to
//!    catch use-after-free bugs. Inconsistent block headers are detected the
//!    same way. Detected corruption is reported as [`Error::Corrupted`].
//!
//!  - **This crate supports `#![no_std]`.** It can be used in bare-metal and
//!    RTOS-based applications.
//!
//! The allocators are not thread-safe by themselves. Wrap one in a lock to
//! share it.
//!
//! [blocks]: BlockRegion
//!
//! # Examples
//!
//! ```rust
//! use blockfit::FirstFitBlockAllocator;
//! use std::{alloc::Layout, mem::MaybeUninit};
//!
//! let mut pool = [MaybeUninit::uninit(); 65536];
//!
//! // `u16` block offsets can describe regions of up to 512 KiB and keep the
//! // block headers at 8 bytes. `'pool` represents the memory pool's lifetime
//! // (`pool` in this case).
//! let mut allocator: FirstFitBlockAllocator<'_, u16> = FirstFitBlockAllocator::INIT;
//! //                                         ^^   ^^
//! //                                          |    |
//! //                                        'pool  offset type
//! allocator.init(&mut pool).unwrap();
//!
//! unsafe {
//!     let ptr1 = allocator.allocate(Layout::new::<u64>()).unwrap().cast::<u64>();
//!     let ptr2 = allocator.allocate(Layout::new::<u64>()).unwrap().cast::<u64>();
//!     *ptr1.as_ptr() = 42;
//!     *ptr2.as_ptr() = 56;
//!     assert_eq!(*ptr1.as_ptr(), 42);
//!     assert_eq!(*ptr2.as_ptr(), 56);
//!     allocator.deallocate(ptr1.cast()).unwrap();
//!     allocator.deallocate(ptr2.cast()).unwrap();
//! }
//!
//! // Everything was merged back into one free block
//! assert_eq!(allocator.blocks().count(), 1);
//! ```
//!
//! Poisoning is enabled by the last type parameter:
//!
//! ```rust
//! use blockfit::{BestFitBlockAllocator, Error};
//! use std::{alloc::Layout, mem::MaybeUninit};
//!
//! let mut pool = [MaybeUninit::uninit(); 4096];
//! // Poison every freed block
//! let mut allocator: BestFitBlockAllocator<'_, u32, 1> =
//!     BestFitBlockAllocator::new(&mut pool).unwrap();
//!
//! let layout = Layout::from_size_align(64, 8).unwrap();
//! let a = allocator.allocate(layout).unwrap();
//! let _b = allocator.allocate(layout).unwrap();
//! unsafe {
//!     allocator.deallocate(a).unwrap();
//!     // Use after free
//!     a.as_ptr().write(0);
//! }
//! assert_eq!(allocator.allocate(layout), Err(Error::Corrupted));
//! ```
#![no_std]
#![warn(missing_docs)]

mod allocator;
pub mod block;
mod error;
mod fragmentation;
pub mod int;
pub mod strategy;
pub use self::{
    allocator::{
        BestFitBlockAllocator, BlockAllocator, DualFirstFitBlockAllocator,
        FirstFitBlockAllocator, LastFitBlockAllocator, WorstFitBlockAllocator,
    },
    block::{Block, BlockInfo, BlockRegion, BlockResult, Blocks, Carve, Neighbor},
    error::{Error, Result},
    fragmentation::Fragmentation,
    int::BlockOffset,
    strategy::{BestFit, DualFirstFit, FirstFit, LastFit, Strategy, WorstFit},
};

#[cfg(test)]
mod tests;

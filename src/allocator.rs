//! The policy-neutral block allocator
use core::{alloc::Layout, fmt, iter::Rev, mem::MaybeUninit, ptr::NonNull};

use const_default1::ConstDefault;

use crate::{
    block::{BlockRegion, Blocks, Carve},
    error::{Error, Result},
    fragmentation::Fragmentation,
    int::BlockOffset,
    strategy::{BestFit, DualFirstFit, FirstFit, LastFit, Strategy, WorstFit},
};

/// An allocator that serves requests from a single memory region divided into
/// [blocks](BlockRegion), using `S` to decide which free block to carve each
/// allocation from.
///
/// # Type parameters
///
///  - `'pool` is the lifetime of the memory region.
///
///  - `S` is the [`Strategy`].
///
///  - `O` is the [`BlockOffset`] type of the block headers. It limits the size
///    of the region to [`BlockRegion::MAX_OUTER_SIZE`]; narrower types make
///    the headers smaller.
///
///  - Every `POISON_INTERVAL`-th deallocated block is poisoned, i.e., a
///    signature is written into it that is checked before the block is reused
///    or merged. `0` disables poisoning.
///
/// # Examples
///
/// ```rust
/// use blockfit::BestFitBlockAllocator;
/// use std::{alloc::Layout, mem::MaybeUninit};
///
/// let mut pool = [MaybeUninit::uninit(); 4096];
/// let mut allocator: BestFitBlockAllocator<'_, u16> =
///     BestFitBlockAllocator::new(&mut pool).unwrap();
///
/// let ptr = allocator.allocate(Layout::new::<u64>()).unwrap();
/// unsafe {
///     ptr.cast::<u64>().as_ptr().write(42);
///     allocator.deallocate(ptr).unwrap();
/// }
/// ```
pub struct BlockAllocator<'pool, S, O = usize, const POISON_INTERVAL: usize = 0> {
    region: Option<BlockRegion<'pool, O>>,
    strategy: S,
    /// Deallocations since a block was last poisoned
    free_count: usize,
}

/// A [`BlockAllocator`] using [`FirstFit`].
pub type FirstFitBlockAllocator<'pool, O = usize, const POISON_INTERVAL: usize = 0> =
    BlockAllocator<'pool, FirstFit, O, POISON_INTERVAL>;
/// A [`BlockAllocator`] using [`LastFit`].
pub type LastFitBlockAllocator<'pool, O = usize, const POISON_INTERVAL: usize = 0> =
    BlockAllocator<'pool, LastFit, O, POISON_INTERVAL>;
/// A [`BlockAllocator`] using [`BestFit`].
pub type BestFitBlockAllocator<'pool, O = usize, const POISON_INTERVAL: usize = 0> =
    BlockAllocator<'pool, BestFit, O, POISON_INTERVAL>;
/// A [`BlockAllocator`] using [`WorstFit`].
pub type WorstFitBlockAllocator<'pool, O = usize, const POISON_INTERVAL: usize = 0> =
    BlockAllocator<'pool, WorstFit, O, POISON_INTERVAL>;
/// A [`BlockAllocator`] using [`DualFirstFit`].
pub type DualFirstFitBlockAllocator<'pool, O = usize, const POISON_INTERVAL: usize = 0> =
    BlockAllocator<'pool, DualFirstFit, O, POISON_INTERVAL>;

impl<S: fmt::Debug, O: BlockOffset, const POISON_INTERVAL: usize> fmt::Debug
    for BlockAllocator<'_, S, O, POISON_INTERVAL>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("region", &self.region)
            .field("strategy", &self.strategy)
            .field("free_count", &self.free_count)
            .finish()
    }
}

impl<S: Default, O: BlockOffset, const POISON_INTERVAL: usize> Default
    for BlockAllocator<'_, S, O, POISON_INTERVAL>
{
    fn default() -> Self {
        Self::with_strategy(S::default())
    }
}

impl<'pool, S: ConstDefault, O: BlockOffset, const POISON_INTERVAL: usize>
    BlockAllocator<'pool, S, O, POISON_INTERVAL>
{
    /// An uninitialized allocator. Call [`Self::init`] before allocating.
    pub const INIT: Self = Self::with_strategy(S::DEFAULT);

    /// Construct an allocator managing `memory`.
    ///
    /// Fails with [`Error::InvalidArgument`] if `memory` can't host a block
    /// (see [`BlockRegion::init`]).
    pub fn new(memory: &'pool mut [MaybeUninit<u8>]) -> Result<Self> {
        let mut this = Self::INIT;
        this.init(memory)?;
        Ok(this)
    }
}

impl<'pool, S, O: BlockOffset, const POISON_INTERVAL: usize>
    BlockAllocator<'pool, S, O, POISON_INTERVAL>
{
    /// An uninitialized allocator using `strategy`.
    #[inline]
    pub const fn with_strategy(strategy: S) -> Self {
        Self {
            region: None,
            strategy,
            free_count: 0,
        }
    }

    /// Start managing `memory`.
    ///
    /// Fails with [`Error::InvalidArgument`] if the allocator already manages
    /// a region or if `memory` can't host a block.
    pub fn init(&mut self, memory: &'pool mut [MaybeUninit<u8>]) -> Result<()> {
        if self.region.is_some() {
            return Err(Error::InvalidArgument);
        }
        let (region, _) = BlockRegion::init(memory)?;
        self.init_region(region)
    }

    /// Start managing a region specified by a slice pointer.
    ///
    /// # Safety
    ///
    /// See [`BlockRegion::init_ptr`].
    pub unsafe fn init_ptr(&mut self, memory: NonNull<[u8]>) -> Result<()> {
        if self.region.is_some() {
            return Err(Error::InvalidArgument);
        }
        let (region, _) = BlockRegion::init_ptr(memory)?;
        self.init_region(region)
    }

    /// Start managing a region that has already been partitioned into blocks.
    /// Used blocks in it are treated as outstanding allocations.
    pub fn init_region(&mut self, region: BlockRegion<'pool, O>) -> Result<()> {
        if self.region.is_some() {
            return Err(Error::InvalidArgument);
        }
        log::trace!("init: {:?}", region);
        self.region = Some(region);
        self.free_count = 0;
        Ok(())
    }

    /// Stop managing the current region, if any. [`Self::init`] can be called
    /// again afterwards.
    ///
    /// All allocations should have been deallocated. Outstanding allocations
    /// are a bug, which is reported by a debug assertion.
    pub fn reset(&mut self) {
        if let Some(region) = self.region.take() {
            let outstanding = region.iter().filter(|b| !b.is_free()).count();
            if outstanding != 0 {
                log::warn!(
                    "reset: {} allocations are still outstanding in {:p}",
                    outstanding,
                    region.base()
                );
            }
            debug_assert_eq!(outstanding, 0, "reset with outstanding allocations");
            log::debug!("reset: released {:p}: [u8; {}]", region.base(), region.len());
        }
        self.free_count = 0;
    }

    /// The managed region, if any.
    #[inline]
    pub fn region(&self) -> Option<&BlockRegion<'pool, O>> {
        self.region.as_ref()
    }

    #[inline]
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    #[inline]
    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Iterate over all blocks in address order.
    pub fn blocks(&self) -> Blocks<'_, 'pool, O> {
        match &self.region {
            Some(region) => region.iter(),
            None => Blocks::empty(),
        }
    }

    /// Iterate over all blocks in reverse address order.
    #[inline]
    pub fn rblocks(&self) -> Rev<Blocks<'_, 'pool, O>> {
        self.blocks().rev()
    }

    /// The total usable space of all blocks, free and used.
    pub fn capacity(&self) -> usize {
        self.blocks().map(|b| b.inner_size()).sum()
    }

    /// Collect the normalized sizes of all free blocks.
    pub fn measure_fragmentation(&self) -> Fragmentation {
        let mut fragmentation = Fragmentation::EMPTY;
        for block in self.blocks().filter(|b| b.is_free()) {
            fragmentation += block.inner_size() / BlockRegion::<O>::ALIGNMENT;
        }
        fragmentation
    }

    /// Deallocate a previously allocated memory block.
    ///
    /// The block is merged with its free neighbors. Fails with
    /// [`Error::OutOfRange`] if `ptr` is rejected as not denoting a live
    /// allocation, and with [`Error::Corrupted`] if a neighbor to be merged
    /// is corrupted. Nothing is modified on failure.
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a memory block previously allocated by `self`.
    ///    Pointers outside the managed region or not at a block boundary are
    ///    rejected; other pointers are validated only on a best-effort basis.
    ///  - The memory block must not be accessed after this call.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let region = self.region.as_mut().ok_or(Error::OutOfRange)?;
        // Safety: Upheld by the caller
        let block = unsafe { region.from_usable_space(ptr) }?;
        let freed = region.free_unchecked(block)?;

        if POISON_INTERVAL != 0 {
            self.free_count += 1;
            if self.free_count >= POISON_INTERVAL {
                self.free_count = 0;
                let poisoned = region.poison_unchecked(freed);
                log::trace!("deallocate: poisoned {:?}: {}", freed, poisoned);
            }
        }

        log::trace!("deallocate({:p}): freed {:?}", ptr, freed);
        Ok(())
    }

    /// Change the size of a previously allocated memory block without moving
    /// it.
    ///
    /// Fails with [`Error::ResourceExhausted`] if the block can't grow in
    /// place; the block is left unchanged in that case.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated by `self`. See
    /// [`Self::deallocate`].
    pub unsafe fn resize(&mut self, ptr: NonNull<u8>, new_size: usize) -> Result<()> {
        let region = self.region.as_mut().ok_or(Error::OutOfRange)?;
        // Safety: Upheld by the caller
        let block = unsafe { region.from_usable_space(ptr) }?;
        let result = region.resize_unchecked(block, new_size);
        log::trace!("resize({:p}, {}) = {:?}", ptr, new_size, result);
        result.map(|_| ())
    }

    /// Get the usable size of a previously allocated memory block, which is
    /// at least the size it was requested with.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated by `self`. See
    /// [`Self::deallocate`].
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize> {
        let region = self.region.as_ref().ok_or(Error::OutOfRange)?;
        // Safety: Upheld by the caller
        let block = unsafe { region.from_usable_space(ptr) }?;
        if region.is_free(block) {
            return Err(Error::OutOfRange);
        }
        Ok(region.inner_size(block))
    }
}

impl<'pool, S: Strategy, O: BlockOffset, const POISON_INTERVAL: usize>
    BlockAllocator<'pool, S, O, POISON_INTERVAL>
{
    /// Attempt to allocate a memory block.
    ///
    /// Returns the starting address of the allocated memory block. Fails with
    /// [`Error::NotFound`] if the allocator is uninitialized or no free block
    /// can hold `layout`, with [`Error::Corrupted`] if the chosen block is
    /// corrupted, and with [`Error::OutOfRange`] if the strategy chose a block
    /// that is not in the region.
    ///
    /// A zero-sized request is served with [`BlockRegion::ALIGNMENT`] bytes.
    pub fn allocate(&mut self, layout: Layout) -> Result<NonNull<u8>> {
        let region = self.region.as_mut().ok_or(Error::NotFound)?;

        let (block, carve) = self
            .strategy
            .choose_block(region, layout)
            .ok_or(Error::NotFound)?;

        let result = match carve {
            Carve::Front => region.alloc_first(block, layout),
            Carve::Back => region.alloc_last(block, layout),
        };
        log::trace!("allocate({:?}) from {:?}: {:?}", layout, block, result);

        Ok(region.usable_space(result?.block))
    }
}

impl<'pool, O: BlockOffset, const POISON_INTERVAL: usize>
    BlockAllocator<'pool, DualFirstFit, O, POISON_INTERVAL>
{
    /// Set the size from which on requests are carved from the back of the
    /// region.
    #[inline]
    pub fn set_threshold(&mut self, threshold: usize) {
        self.strategy.set_threshold(threshold);
    }
}

use super::backend::{RawBackend, SystemBackend};
use super::block::Block;
use crate::config::BlockConfig;
use crate::error::AllocError;
use crate::metrics::BlockMetrics;
use std::alloc::{handle_alloc_error, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::needs_drop;
use std::ptr::NonNull;
use std::vec::Drain;
use tracing::{debug, trace};

/// A pool of `T` slots that grows `N` slots at a time and recycles freed
/// slots through a LIFO free list.
///
/// Blocks come from the backend `B` and are only returned to it when the
/// pool is dropped. Values still live at that point are dropped exactly
/// once; slots that were freed earlier are left alone.
///
/// ```rust
/// use minalloc::BlockAllocator;
///
/// let mut pool: BlockAllocator<String, 64> = BlockAllocator::new();
///
/// let a = pool.allocate(String::from("a"));
/// unsafe { pool.free(a) };
///
/// let b = pool.allocate(String::from("b"));
/// assert_eq!(a, b);
/// assert_eq!(unsafe { b.as_ref() }, "b");
/// ```
pub struct BlockAllocator<T, const N: usize = 256, B: RawBackend = SystemBackend> {
    blocks: Vec<Block<T, N>>,
    free_list: Vec<NonNull<T>>,
    live: usize,
    backend: B,
    _owns: PhantomData<T>,
}

unsafe impl<T: Send, const N: usize, B: RawBackend + Send> Send for BlockAllocator<T, N, B> {}

impl<T, const N: usize> BlockAllocator<T, N> {
    /// Creates an empty pool backed by the global allocator. Nothing is
    /// acquired until the first allocation.
    pub fn new() -> Self {
        Self::with_backend(SystemBackend)
    }
}

impl<T, const N: usize> Default for BlockAllocator<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize, B: RawBackend> BlockAllocator<T, N, B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            blocks: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            backend,
            _owns: PhantomData,
        }
    }

    pub fn with_config(config: BlockConfig, backend: B) -> Self {
        let mut pool = Self::with_backend(backend);
        let slots = config.initial_blocks.saturating_mul(N);

        pool.free_list
            .reserve(slots.saturating_add(config.free_list_reserve));
        pool.reserve_blocks(config.initial_blocks);
        pool
    }

    /// Moves `value` into a free slot, growing by one block first if there is
    /// none, and returns the slot.
    ///
    /// Failing to get a block from the backend is fatal.
    pub fn allocate(&mut self, value: T) -> NonNull<T> {
        self.allocate_with(|| value)
    }

    /// Builds the value in a free slot from `init`. The slot is reserved
    /// before `init` runs, so any growth happens first.
    pub fn allocate_with<F: FnOnce() -> T>(&mut self, init: F) -> NonNull<T> {
        match self.try_allocate_with(init) {
            Ok(slot) => slot,
            Err(err) => Self::growth_failed(err),
        }
    }

    pub fn allocate_default(&mut self) -> NonNull<T>
    where
        T: Default,
    {
        self.allocate_with(T::default)
    }

    /// Like [`allocate`](Self::allocate), but a backend failure is returned
    /// instead of aborting. `value` is dropped in that case.
    pub fn try_allocate(&mut self, value: T) -> Result<NonNull<T>, AllocError> {
        self.try_allocate_with(|| value)
    }

    pub fn try_allocate_with<F: FnOnce() -> T>(
        &mut self,
        init: F,
    ) -> Result<NonNull<T>, AllocError> {
        let slot = self.next_free()?;
        let value = init();

        self.free_list.pop();

        // SAFETY: the slot came off the free list so it is inside one of our
        // blocks and holds nothing
        unsafe {
            slot.as_ptr().write(value);

            let block = Block::<T, N>::from_slot(slot);
            block.meta().set_live(block.index_of(slot));
        }

        self.live += 1;

        Ok(slot)
    }

    /// Drops the value at `ptr` and puts its slot back on the free list. The
    /// next allocation will return `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this pool and not freed since.
    /// Debug builds check both, release builds check neither.
    pub unsafe fn free(&mut self, ptr: NonNull<T>) {
        self.release_slot(ptr);

        ptr.as_ptr().drop_in_place();
    }

    /// Moves the value at `ptr` out and puts its slot back on the free list.
    ///
    /// # Safety
    ///
    /// Same as [`free`](Self::free).
    pub unsafe fn take(&mut self, ptr: NonNull<T>) -> T {
        self.release_slot(ptr);

        ptr.as_ptr().read()
    }

    /// Acquires `count` more blocks up front.
    pub fn reserve_blocks(&mut self, count: usize) {
        if let Err(err) = self.try_reserve_blocks(count) {
            Self::growth_failed(err)
        }
    }

    pub fn try_reserve_blocks(&mut self, count: usize) -> Result<(), AllocError> {
        for _ in 0..count {
            self.grow()?;
        }

        Ok(())
    }

    /// Whether `ptr` is the address of a slot in one of this pool's blocks,
    /// live or not. This walks every block.
    pub fn owns(&self, ptr: NonNull<T>) -> bool {
        self.blocks.iter().any(|block| block.contains(ptr.as_ptr()))
    }

    /// Whether `ptr` is a slot of this pool currently holding a value.
    pub fn is_live(&self, ptr: NonNull<T>) -> bool {
        if !self.owns(ptr) {
            return false;
        }

        // SAFETY: `owns` confirmed the slot belongs to one of our blocks
        let block = unsafe { Block::<T, N>::from_slot(ptr) };

        block.meta().is_live(block.index_of(ptr))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total slots across all blocks.
    pub fn capacity(&self) -> usize {
        self.blocks.len() * N
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn metrics(&self) -> BlockMetrics {
        BlockMetrics {
            block_count: self.blocks.len(),
            capacity: self.capacity(),
            live: self.live,
            free: self.free_list.len(),
            reserved_bytes: self.blocks.len() * Block::<T, N>::SIZE,
        }
    }

    fn next_free(&mut self) -> Result<NonNull<T>, AllocError> {
        loop {
            if let Some(slot) = self.free_list.last() {
                return Ok(*slot);
            }

            self.grow()?;
        }
    }

    fn grow(&mut self) -> Result<(), AllocError> {
        let layout = Block::<T, N>::layout()?;
        let slots = (self.blocks.len() + 1) * N;

        // every slot fits on the free list without it reallocating in `free`
        self.free_list
            .reserve(slots.saturating_sub(self.free_list.len()));

        let ptr = self.backend.acquire(layout)?;
        // SAFETY: ptr is a fresh allocation of the block layout
        let block = unsafe { Block::<T, N>::new(ptr) };

        // pushed in reverse so a new block hands out ascending addresses
        self.free_list.extend((0..N).rev().map(|index| block.slot(index)));
        self.blocks.push(block);

        trace!(
            block_count = self.blocks.len(),
            slots = N,
            bytes = layout.size(),
            "acquired block"
        );

        Ok(())
    }

    unsafe fn release_slot(&mut self, ptr: NonNull<T>) {
        debug_assert!(
            self.owns(ptr),
            "pointer was not allocated by this block allocator"
        );

        let block = Block::<T, N>::from_slot(ptr);
        let index = block.index_of(ptr);
        let meta = block.meta();

        debug_assert!(meta.is_live(index), "slot freed twice");

        meta.clear_live(index);
        self.free_list.push(ptr);
        self.live -= 1;
    }

    #[cold]
    fn growth_failed(err: AllocError) -> ! {
        match (err, Block::<T, N>::layout()) {
            (AllocError::OutOfMemory { .. }, Ok(layout)) => handle_alloc_error(layout),
            _ => panic!("capacity overflow"),
        }
    }
}

impl<T, const N: usize, B: RawBackend> Drop for BlockAllocator<T, N, B> {
    fn drop(&mut self) {
        if self.blocks.is_empty() {
            return;
        }

        debug!(
            block_count = self.blocks.len(),
            live = self.live,
            "dropping block allocator"
        );
        debug_assert_eq!(
            self.blocks
                .iter()
                .map(|block| block.meta().live_count())
                .sum::<usize>(),
            self.live
        );

        let Ok(layout) = Block::<T, N>::layout() else {
            return;
        };
        let mut teardown = Teardown {
            blocks: self.blocks.drain(..),
            current: None,
            backend: &self.backend,
            layout,
        };

        teardown.finish();
    }
}

/// Drops the live values of every block and releases it to the backend.
///
/// If a value's `Drop` panics, the guard's own `Drop` picks up where
/// `finish` stopped, so the rest of the values are still dropped and every
/// block is still released.
struct Teardown<'a, T, const N: usize, B: RawBackend> {
    blocks: Drain<'a, Block<T, N>>,
    current: Option<Block<T, N>>,
    backend: &'a B,
    layout: Layout,
}

impl<T, const N: usize, B: RawBackend> Teardown<'_, T, N, B> {
    fn finish(&mut self) {
        loop {
            if self.current.is_none() {
                self.current = self.blocks.next();
            }

            let Some(block) = &self.current else {
                return;
            };

            if needs_drop::<T>() {
                let meta = block.meta();

                while let Some(index) = meta.live_slots().next() {
                    // cleared first so a panicking value is not dropped again
                    meta.clear_live(index);

                    // SAFETY: the bit was set, so the slot holds a value that
                    // has not been dropped
                    unsafe { block.slot(index).as_ptr().drop_in_place() }
                }
            }

            if let Some(block) = self.current.take() {
                // SAFETY: every block was acquired from this backend with this layout
                unsafe { self.backend.release(block.into_raw(), self.layout) }
            }
        }
    }
}

impl<T, const N: usize, B: RawBackend> Drop for Teardown<'_, T, N, B> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<T, const N: usize, B: RawBackend> fmt::Debug for BlockAllocator<T, N, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("block_count", &self.blocks.len())
            .field("slots_per_block", &N)
            .field("live", &self.live)
            .field("free", &self.free_list.len())
            .finish()
    }
}

use super::block_meta::BlockMeta;
use crate::error::AllocError;
use std::alloc::Layout;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

/// A block of `N` slots for values of `T`.
///
/// Layout, from the block's base address:
///
/// ```text
/// [ liveness bitmap | padding to align_of::<T>() | slot 0 | slot 1 | ... | slot N-1 ]
/// ```
///
/// Every block is acquired with an alignment equal to its size rounded up to
/// a power of two, so the base of the block owning a slot is found by
/// masking the slot's address.
pub struct Block<T, const N: usize> {
    ptr: NonNull<u8>,
    _marker: PhantomData<T>,
}

const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl<T, const N: usize> Block<T, N> {
    /// Distance between slots. Zero sized types still get a distinct address
    /// per slot.
    pub const STRIDE: usize = if size_of::<T>() > align_of::<T>() {
        size_of::<T>()
    } else {
        align_of::<T>()
    };

    pub const META_WORDS: usize = {
        assert!(N > 0, "a block must hold at least one slot");

        BlockMeta::words_for(N)
    };

    pub const SLOTS_OFFSET: usize =
        round_up(Self::META_WORDS * size_of::<u64>(), align_of::<T>());

    pub const SIZE: usize = match Self::STRIDE.checked_mul(N) {
        Some(slots) => match Self::SLOTS_OFFSET.checked_add(slots) {
            Some(size) => size,
            None => panic!("block size overflows usize"),
        },
        None => panic!("block size overflows usize"),
    };

    pub const ALIGN: usize = match Self::SIZE.checked_next_power_of_two() {
        Some(align) => align,
        None => panic!("block alignment overflows usize"),
    };

    pub fn layout() -> Result<Layout, AllocError> {
        Layout::from_size_align(Self::SIZE, Self::ALIGN)
            .map_err(|_| AllocError::LayoutOverflow)
    }

    /// Takes over a freshly acquired block, clearing its bitmap.
    ///
    /// # Safety
    ///
    /// `ptr` must point to memory valid for [`Block::layout`].
    pub unsafe fn new(ptr: NonNull<u8>) -> Self {
        debug_assert!((ptr.as_ptr() as usize % Self::ALIGN) == 0);

        BlockMeta::new(ptr, N);

        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Finds the block a slot lives in.
    ///
    /// # Safety
    ///
    /// `slot` must point to a slot of a block with this `T` and `N`.
    pub unsafe fn from_slot(slot: NonNull<T>) -> Self {
        let offset = (slot.as_ptr() as usize) % Self::ALIGN;
        let block_ptr = slot.as_ptr().cast::<u8>().sub(offset);

        Self {
            ptr: NonNull::new_unchecked(block_ptr),
            _marker: PhantomData,
        }
    }

    #[cfg(test)]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn into_raw(self) -> NonNull<u8> {
        self.ptr
    }

    pub fn meta(&self) -> BlockMeta {
        // SAFETY: the bitmap is at the block base and was cleared by `new`
        unsafe { BlockMeta::from_block(self.ptr, N) }
    }

    pub fn slot(&self, index: usize) -> NonNull<T> {
        debug_assert!(index < N);

        // SAFETY: index < N keeps the offset inside the block
        unsafe {
            let ptr = self.ptr.as_ptr().add(Self::SLOTS_OFFSET + index * Self::STRIDE);

            NonNull::new_unchecked(ptr.cast())
        }
    }

    pub fn index_of(&self, slot: NonNull<T>) -> usize {
        let offset = slot.as_ptr() as usize - self.ptr.as_ptr() as usize;

        debug_assert!(offset >= Self::SLOTS_OFFSET);
        debug_assert!((offset - Self::SLOTS_OFFSET) % Self::STRIDE == 0);

        (offset - Self::SLOTS_OFFSET) / Self::STRIDE
    }

    /// Whether `slot` is the address of one of this block's slots.
    pub fn contains(&self, slot: *const T) -> bool {
        let base = self.ptr.as_ptr() as usize;
        let addr = slot as usize;

        if addr < base + Self::SLOTS_OFFSET || addr >= base + Self::SIZE {
            return false;
        }

        (addr - base - Self::SLOTS_OFFSET) % Self::STRIDE == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_allocator::backend::{RawBackend, SystemBackend};

    #[repr(align(64))]
    struct Wide([u8; 100]);

    #[test]
    fn test_byte_geometry() {
        type B = Block<u8, 100>;

        assert_eq!(B::STRIDE, 1);
        assert_eq!(B::META_WORDS, 2);
        assert_eq!(B::SLOTS_OFFSET, 16);
        assert_eq!(B::SIZE, 116);
        assert_eq!(B::ALIGN, 128);
    }

    #[test]
    fn test_zero_sized_geometry() {
        type B = Block<(), 64>;

        assert_eq!(B::STRIDE, 1);
        assert_eq!(B::SLOTS_OFFSET, 8);
        assert_eq!(B::SIZE, 72);
    }

    #[test]
    fn test_overaligned_geometry() {
        type B = Block<Wide, 4>;

        assert_eq!(B::STRIDE, 128);
        assert_eq!(B::SLOTS_OFFSET, 64);
        assert_eq!(B::SIZE, 64 + 4 * 128);
        assert_eq!(B::ALIGN, 1024);
    }

    #[test]
    fn test_slots_map_back_to_block() {
        type B = Block<u32, 16>;

        let layout = B::layout().unwrap();
        let raw = SystemBackend.acquire(layout).unwrap();
        let block = unsafe { B::new(raw) };

        for i in 0..16 {
            let slot = block.slot(i);
            let owner = unsafe { B::from_slot(slot) };

            assert!(block.contains(slot.as_ptr()));
            assert_eq!(owner.as_ptr(), block.as_ptr());
            assert_eq!(block.index_of(slot), i);
            assert!((slot.as_ptr() as usize % align_of::<u32>()) == 0);
        }

        assert!(!block.contains(block.as_ptr().cast()));
        assert!(!block.contains(unsafe { block.slot(15).as_ptr().add(1) }));

        unsafe { SystemBackend.release(block.into_raw(), layout) };
    }
}

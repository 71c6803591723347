use crate::error::AllocError;
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// Where a [`BlockAllocator`](super::BlockAllocator) gets its blocks from.
///
/// The backend is handed to the allocator when it is built and is only asked
/// for memory when every existing slot is taken. All blocks go back to it
/// when the allocator is dropped, never earlier.
///
/// Block layouts ask for an alignment equal to the block size rounded up to
/// a power of two, so a block just over a power of two asks for nearly twice
/// its size in alignment. A `BlockAllocator<u128, 256>` asks for 4128 byte
/// blocks aligned to 8192.
/// Backends that carve blocks out of a fixed region have to honor that.
///
/// # Safety
///
/// Memory returned by `acquire` must be valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and must stay valid
/// until it is passed to `release` with the same layout.
pub unsafe trait RawBackend {
    fn acquire(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    ///
    /// `ptr` must have come from `acquire` on this backend with the same
    /// `layout` and must not have been released already.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global Rust allocator.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemBackend;

unsafe impl RawBackend for SystemBackend {
    fn acquire(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() != 0);

        // SAFETY: block layouts are never zero sized
        let ptr = unsafe { alloc(layout) };

        NonNull::new(ptr).ok_or(AllocError::OutOfMemory {
            size: layout.size(),
            align: layout.align(),
        })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        dealloc(ptr.as_ptr(), layout)
    }
}

unsafe impl<B: RawBackend + ?Sized> RawBackend for &B {
    fn acquire(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).acquire(layout)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).release(ptr, layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_backend_alignment() {
        for i in 4..16 {
            let align = 2_usize.pow(i);
            let layout = Layout::from_size_align(align / 2 + 1, align).unwrap();
            let ptr = SystemBackend.acquire(layout).unwrap();

            assert!((ptr.as_ptr() as usize % align) == 0);

            unsafe { SystemBackend.release(ptr, layout) };
        }
    }

    #[test]
    fn test_backend_by_reference() {
        let backend = SystemBackend;
        let by_ref = &backend;
        let layout = Layout::new::<[u64; 8]>();
        let ptr = by_ref.acquire(layout).unwrap();

        unsafe {
            ptr.as_ptr().write_bytes(0, layout.size());
            by_ref.release(ptr, layout);
        }
    }
}

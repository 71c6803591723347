use super::error::AllocError;
use super::metrics::LinearMetrics;
use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;
use tracing::trace;

/// A bump allocator over a buffer owned by someone else.
///
/// Allocation advances a single offset into the buffer. There is no record of
/// individual allocations: memory comes back either all at once through
/// [`reset`](Self::reset), or in strict stack order through
/// [`free`](Self::free) and [`rewind`](Self::rewind).
///
/// Returned pointers are raw. Nothing stops the caller from handing the same
/// bytes out twice by freeing too much, and the bytes are never zeroed, so
/// what is written through them and for how long is entirely the caller's
/// business.
///
/// ```rust
/// use minalloc::LinearAllocator;
///
/// let mut buf = [0u8; 64];
/// let mut linear = LinearAllocator::from_buffer(&mut buf);
///
/// let a = linear.allocate(16).unwrap();
/// linear.free(16);
/// let b = linear.allocate(16).unwrap();
///
/// assert_eq!(a, b);
/// assert!(linear.allocate(64).is_none());
/// ```
#[derive(Debug)]
pub struct LinearAllocator<'buf> {
    data: NonNull<u8>,
    capacity: usize,
    offset: usize,
    peak: usize,
    _buffer: PhantomData<&'buf mut [u8]>,
}

// The allocator stands in for a `&'buf mut [u8]`.
unsafe impl Send for LinearAllocator<'_> {}

impl Default for LinearAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'buf> LinearAllocator<'buf> {
    /// Creates an allocator that is not bound to any buffer. Every non empty
    /// allocation fails until [`init`](Self::init) is called.
    pub fn new() -> Self {
        Self {
            data: NonNull::dangling(),
            capacity: 0,
            offset: 0,
            peak: 0,
            _buffer: PhantomData,
        }
    }

    pub fn from_buffer(buffer: &'buf mut [u8]) -> Self {
        let mut linear = Self::new();
        linear.init(buffer);
        linear
    }

    /// Creates an allocator over `size` bytes starting at `data`.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads and writes of `size` bytes for all of
    /// `'buf`, and nothing else may access that region while the allocator
    /// hands it out.
    pub unsafe fn from_raw_parts(data: NonNull<u8>, size: usize) -> Self {
        let mut linear = Self::new();
        linear.init_raw(data, size);
        linear
    }

    /// Binds the allocator to `buffer`, forgetting everything handed out
    /// before. The bytes of the buffer are left as they are.
    pub fn init(&mut self, buffer: &'buf mut [u8]) {
        let size = buffer.len();
        let data = NonNull::from(buffer).cast::<u8>();

        // SAFETY: the exclusive borrow covers `size` bytes for 'buf
        unsafe { self.init_raw(data, size) }
    }

    /// Raw counterpart of [`init`](Self::init).
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw_parts`](Self::from_raw_parts).
    pub unsafe fn init_raw(&mut self, data: NonNull<u8>, size: usize) {
        debug_assert!(size <= isize::MAX as usize);

        self.data = data;
        self.capacity = size;
        self.peak = 0;
        self.reset();
    }

    /// Hands out the next `size` bytes, or `None` if fewer than `size` bytes
    /// remain. A failed call leaves the allocator untouched.
    ///
    /// No alignment is applied: the result sits exactly `offset()` bytes into
    /// the buffer. Use [`allocate_layout`](Self::allocate_layout) when the
    /// memory will hold anything with alignment above one.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let end = match self.offset.checked_add(size) {
            Some(end) if end <= self.capacity => end,
            _ => {
                trace!(
                    requested = size,
                    remaining = self.remaining(),
                    "linear allocator exhausted"
                );
                return None;
            }
        };
        let ptr = self.at_offset(self.offset);

        self.bump_to(end);
        Some(ptr)
    }

    /// Like [`allocate`](Self::allocate), but reports how much room was left.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let remaining = self.remaining();

        self.allocate(size).ok_or(AllocError::Exhausted {
            requested: size,
            remaining,
        })
    }

    /// Hands out memory fitting `layout`, skipping forward to the next
    /// address aligned to `layout.align()`.
    ///
    /// The skipped padding counts as used. A later [`free`](Self::free) of
    /// `layout.size()` bytes does not give it back; take a [`mark`](Self::mark)
    /// before the allocation and [`rewind`](Self::rewind) to it instead.
    pub fn allocate_layout(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let base = self.data.as_ptr() as usize;
        let align_mask = layout.align() - 1;
        let start = match base
            .checked_add(self.offset)
            .and_then(|current| current.checked_add(align_mask))
        {
            Some(unaligned) => (unaligned & !align_mask) - base,
            None => return None,
        };

        match start.checked_add(layout.size()) {
            Some(end) if end <= self.capacity => {
                let ptr = self.at_offset(start);

                self.bump_to(end);
                Some(ptr)
            }
            _ => {
                trace!(
                    size = layout.size(),
                    align = layout.align(),
                    remaining = self.remaining(),
                    "linear allocator exhausted"
                );
                None
            }
        }
    }

    /// Gives back the last `size` bytes handed out, clamped at the start of
    /// the buffer.
    ///
    /// Only sizes of the most recent allocations, released in reverse order,
    /// keep the offset meaningful. Nothing checks this.
    #[inline]
    pub fn free(&mut self, size: usize) {
        self.offset -= size.min(self.offset);
    }

    /// Makes the whole buffer available again without touching its bytes.
    #[inline]
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// The current offset, to be handed to [`rewind`](Self::rewind) later.
    #[inline]
    pub fn mark(&self) -> usize {
        self.offset
    }

    /// Releases everything allocated since `mark` was taken. Marks ahead of
    /// the current offset are ignored.
    #[inline]
    pub fn rewind(&mut self, mark: usize) {
        self.offset = mark.min(self.offset);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }

    /// Whether `ptr` points into the bound buffer.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.data.as_ptr() as usize;
        let addr = ptr as usize;

        addr >= base && addr - base < self.capacity
    }

    pub fn metrics(&self) -> LinearMetrics {
        LinearMetrics {
            capacity: self.capacity,
            offset: self.offset,
            peak: self.peak,
        }
    }

    fn at_offset(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.capacity);

        // SAFETY: offset is at most one past the end of the bound buffer
        unsafe { NonNull::new_unchecked(self.data.as_ptr().add(offset)) }
    }

    fn bump_to(&mut self, end: usize) {
        self.offset = end;
        self.peak = self.peak.max(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_allocator() {
        let mut linear = LinearAllocator::new();

        assert_eq!(linear.capacity(), 0);
        assert!(linear.allocate(1).is_none());
        assert!(linear.allocate(0).is_some());
    }

    #[test]
    fn test_allocate_is_sequential() {
        let mut buf = [0u8; 32];
        let base = buf.as_ptr() as usize;
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        let a = linear.allocate(3).unwrap();
        let b = linear.allocate(5).unwrap();
        let c = linear.allocate(7).unwrap();

        assert_eq!(a.as_ptr() as usize, base);
        assert_eq!(b.as_ptr() as usize, base + 3);
        assert_eq!(c.as_ptr() as usize, base + 8);
        assert_eq!(linear.offset(), 15);
        assert_eq!(linear.remaining(), 17);
    }

    #[test]
    fn test_failed_allocate_leaves_state() {
        let mut buf = [0u8; 16];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        linear.allocate(10).unwrap();
        assert!(linear.allocate(7).is_none());
        assert_eq!(linear.offset(), 10);
        assert!(linear.allocate(6).is_some());
        assert_eq!(linear.remaining(), 0);
    }

    #[test]
    fn test_huge_request_does_not_overflow() {
        let mut buf = [0u8; 16];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        linear.allocate(1).unwrap();
        assert!(linear.allocate(usize::MAX).is_none());
        assert_eq!(linear.offset(), 1);
    }

    #[test]
    fn test_free_clamps_at_zero() {
        let mut buf = [0u8; 16];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        linear.allocate(4).unwrap();
        linear.free(100);

        assert_eq!(linear.offset(), 0);
    }

    #[test]
    fn test_try_allocate_reports_remaining() {
        let mut buf = [0u8; 16];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        linear.allocate(12).unwrap();

        let err = linear.try_allocate(8).unwrap_err();
        assert_eq!(
            err,
            AllocError::Exhausted {
                requested: 8,
                remaining: 4
            }
        );
        assert!(linear.try_allocate(4).is_ok());
    }

    #[test]
    fn test_allocate_layout_aligns() {
        let mut buf = [0u8; 256];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        linear.allocate(1).unwrap();

        for i in 0..5 {
            let align = 2_usize.pow(i);
            let layout = Layout::from_size_align(3, align).unwrap();
            let ptr = linear.allocate_layout(layout).unwrap();

            assert!((ptr.as_ptr() as usize % align) == 0);
        }
    }

    #[test]
    fn test_allocate_layout_padding_counts() {
        let mut buf = [0u64; 4];
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<u8>(), 32)
        };
        let mut linear = LinearAllocator::from_buffer(bytes);

        linear.allocate(1).unwrap();
        let mark = linear.mark();
        linear.allocate_layout(Layout::new::<u64>()).unwrap();

        assert_eq!(linear.offset(), 16);

        linear.rewind(mark);
        assert_eq!(linear.offset(), 1);

        // three u64 slots remain after the padding, not four
        assert!(linear.allocate_layout(Layout::new::<[u64; 4]>()).is_none());
        assert!(linear.allocate_layout(Layout::new::<[u64; 3]>()).is_some());
    }

    #[test]
    fn test_rewind_ahead_is_ignored() {
        let mut buf = [0u8; 16];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        linear.allocate(4).unwrap();
        linear.rewind(12);

        assert_eq!(linear.offset(), 4);
    }

    #[test]
    fn test_init_discards_bookkeeping() {
        let mut first = [0u8; 8];
        let mut second = [0u8; 32];
        let second_base = second.as_ptr() as usize;
        let mut linear = LinearAllocator::from_buffer(&mut first);

        linear.allocate(8).unwrap();
        linear.init(&mut second);

        assert_eq!(linear.offset(), 0);
        assert_eq!(linear.capacity(), 32);
        assert_eq!(linear.metrics().peak, 0);
        assert_eq!(linear.allocate(32).unwrap().as_ptr() as usize, second_base);
    }

    #[test]
    fn test_reset_keeps_bytes() {
        let mut buf = [0u8; 8];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        let ptr = linear.allocate(8).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0xAB, 8) };

        linear.reset();
        let again = linear.allocate(8).unwrap();

        assert_eq!(ptr, again);
        assert_eq!(unsafe { *again.as_ptr().add(7) }, 0xAB);
    }

    #[test]
    fn test_metrics_track_peak() {
        let mut buf = [0u8; 64];
        let mut linear = LinearAllocator::from_buffer(&mut buf);

        linear.allocate(40).unwrap();
        linear.free(30);
        linear.allocate(5).unwrap();

        let metrics = linear.metrics();
        assert_eq!(metrics.capacity, 64);
        assert_eq!(metrics.offset, 15);
        assert_eq!(metrics.peak, 40);
    }

    #[test]
    fn test_contains() {
        let mut buf = [0u8; 8];
        let base = buf.as_ptr();
        let linear = LinearAllocator::from_buffer(&mut buf);

        assert!(linear.contains(base));
        assert!(linear.contains(unsafe { base.add(7) }));
        assert!(!linear.contains(unsafe { base.add(8) }));
    }
}

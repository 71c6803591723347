/// A snapshot of a [`crate::LinearAllocator`]'s bookkeeping.
///
/// Obtained by calling [`crate::LinearAllocator::metrics`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinearMetrics {
    /// Size of the bound buffer in bytes.
    pub capacity: usize,

    /// Bytes currently handed out.
    pub offset: usize,

    /// Highest offset reached since the buffer was bound.
    pub peak: usize,
}

/// A snapshot of a [`crate::BlockAllocator`]'s bookkeeping.
///
/// Obtained by calling [`crate::BlockAllocator::metrics`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockMetrics {
    /// Number of blocks acquired from the backend.
    pub block_count: usize,

    /// Total slots across all blocks.
    pub capacity: usize,

    /// Slots currently holding a value.
    pub live: usize,

    /// Slots waiting on the free list.
    pub free: usize,

    /// Bytes requested from the backend for all blocks, including the
    /// per block liveness bitmap.
    pub reserved_bytes: usize,
}

use thiserror::Error;

/// Errors reported by the fallible (`try_*`) allocation paths.
///
/// The infallible paths never return these: linear exhaustion is signalled by
/// `None`, and a backend that cannot supply a new block is treated as fatal.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The linear allocator does not have `requested` bytes left.
    #[error("linear allocator exhausted: requested {requested} bytes, {remaining} remaining")]
    Exhausted {
        /// Bytes asked for.
        requested: usize,
        /// Bytes still available before the request.
        remaining: usize,
    },

    /// The raw backend could not supply a block.
    #[error("out of memory acquiring {size} bytes aligned to {align}")]
    OutOfMemory {
        /// Requested block size.
        size: usize,
        /// Requested block alignment.
        align: usize,
    },

    /// The block layout for the requested slot type and count is not representable.
    #[error("block layout overflows the address space")]
    LayoutOverflow,
}

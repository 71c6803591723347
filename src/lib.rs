//! Two small allocators for code that wants allocation cost it can predict.
//!
//! [`LinearAllocator`] bumps an offset through a buffer somebody else owns.
//! Memory comes back all at once with `reset`, or in stack order with `free`
//! and `rewind`. It is meant for per frame scratch space and similar short
//! lived data.
//!
//! [`BlockAllocator`] is a typed pool. It acquires blocks of `N` slots from a
//! [`RawBackend`] as it runs out, and recycles freed slots last in, first
//! out. Blocks are kept until the pool is dropped, at which point only the
//! values that are still live get dropped.
//!
//! ```rust
//! use minalloc::{BlockAllocator, LinearAllocator};
//!
//! let mut scratch = [0u8; 1024];
//! let mut frame = LinearAllocator::from_buffer(&mut scratch);
//! let bytes = frame.allocate(128).unwrap();
//! frame.reset();
//! assert_eq!(frame.allocate(128), Some(bytes));
//!
//! let mut pool: BlockAllocator<[f32; 3], 128> = BlockAllocator::new();
//! let particle = pool.allocate([0.0, 1.0, 0.0]);
//! unsafe { pool.free(particle) };
//! assert_eq!(pool.allocate([1.0; 3]), particle);
//! ```
//!
//! Neither allocator is thread safe. Both trust the caller: freeing the wrong
//! size, freeing twice, or freeing a pointer from somewhere else is undefined
//! behaviour, checked only by debug assertions.
mod block_allocator;
mod config;
mod error;
mod linear_allocator;
mod metrics;

pub use block_allocator::{BlockAllocator, RawBackend, SystemBackend};
pub use config::BlockConfig;
pub use error::AllocError;
pub use linear_allocator::LinearAllocator;
pub use metrics::{BlockMetrics, LinearMetrics};

mod allocator;
mod backend;
mod block;
mod block_meta;


pub use allocator::BlockAllocator;
pub use backend::{RawBackend, SystemBackend};

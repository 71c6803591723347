/// Construction settings for a [`crate::BlockAllocator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockConfig {
    /// Number of blocks acquired when the allocator is built. With the
    /// default of zero nothing is acquired until the first allocation.
    pub initial_blocks: usize,
    /// Extra free list capacity, in slots, reserved up front on top of what
    /// the initial blocks need. Growing the free list is the only heap
    /// traffic besides block acquisition, so reserving it keeps the first
    /// growth steps from reallocating it.
    pub free_list_reserve: usize,
}

pub const BLOCK_CONFIG_DEFAULT_INITIAL_BLOCKS: usize = 0;
pub const BLOCK_CONFIG_DEFAULT_FREE_LIST_RESERVE: usize = 0;

impl Default for BlockConfig {
    fn default() -> Self {
        BlockConfig {
            initial_blocks: BLOCK_CONFIG_DEFAULT_INITIAL_BLOCKS,
            free_list_reserve: BLOCK_CONFIG_DEFAULT_FREE_LIST_RESERVE,
        }
    }
}

use std::ptr::NonNull;

const WORD_BITS: usize = u64::BITS as usize;

/// The liveness bitmap kept at the head of every block, one bit per slot.
///
/// A set bit means the slot holds a value. Teardown only drops slots whose
/// bit is set, so a slot that was freed is never dropped again.
pub struct BlockMeta {
    words: NonNull<u64>,
    len: usize,
}

impl BlockMeta {
    pub const fn words_for(slots: usize) -> usize {
        slots.div_ceil(WORD_BITS)
    }

    /// Clears the bitmap of a freshly acquired block.
    ///
    /// # Safety
    ///
    /// `block_ptr` must be aligned for `u64` and valid for writes of
    /// `words_for(slots)` words for as long as the returned value is used.
    pub unsafe fn new(block_ptr: NonNull<u8>, slots: usize) -> Self {
        let meta = Self::from_block(block_ptr, slots);
        meta.reset();
        meta
    }

    /// Views the bitmap of an existing block.
    ///
    /// # Safety
    ///
    /// Same as [`BlockMeta::new`], and the bitmap must already be initialized.
    pub unsafe fn from_block(block_ptr: NonNull<u8>, slots: usize) -> Self {
        debug_assert!((block_ptr.as_ptr() as usize % std::mem::align_of::<u64>()) == 0);

        Self {
            words: block_ptr.cast(),
            len: Self::words_for(slots),
        }
    }

    pub fn set_live(&self, slot: usize) {
        let (word, bit) = Self::locate(slot);

        self.store(word, self.load(word) | bit);
    }

    pub fn clear_live(&self, slot: usize) {
        let (word, bit) = Self::locate(slot);

        self.store(word, self.load(word) & !bit);
    }

    pub fn is_live(&self, slot: usize) -> bool {
        let (word, bit) = Self::locate(slot);

        self.load(word) & bit != 0
    }

    pub fn reset(&self) {
        for word in 0..self.len {
            self.store(word, 0);
        }
    }

    pub fn live_count(&self) -> usize {
        (0..self.len)
            .map(|word| self.load(word).count_ones() as usize)
            .sum()
    }

    /// Indices of live slots, ascending.
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).flat_map(move |word| {
            let mut bits = self.load(word);

            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }

                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;

                Some(word * WORD_BITS + bit)
            })
        })
    }

    fn locate(slot: usize) -> (usize, u64) {
        (slot / WORD_BITS, 1 << (slot % WORD_BITS))
    }

    fn load(&self, word: usize) -> u64 {
        debug_assert!(word < self.len);

        unsafe { *self.words.as_ptr().add(word) }
    }

    fn store(&self, word: usize, value: u64) {
        debug_assert!(word < self.len);

        unsafe { *self.words.as_ptr().add(word) = value }
    }
}

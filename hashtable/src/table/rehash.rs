//! Growth: double the slot array and relocate every control word.
//!
//! Only control words move. Batches and ordinals are untouched, so callers
//! never observe growth except through `capacity()`.

use std::time::Instant;

use super::{BlockHashTable, allocate_control_blocks, control};
use crate::error::{HashTableError, Result};
use crate::hash::KeyHasher;
use crate::memory::ControlBlock;

impl<H: KeyHasher> BlockHashTable<H> {
    /// Double the capacity.
    ///
    /// The new control blocks are fully allocated before any word moves, so
    /// an allocation failure leaves the table as it was.
    pub(super) fn grow(&mut self) -> Result<()> {
        let old_capacity = self.capacity;
        if old_capacity >= self.config.max_capacity {
            tracing::warn!("hash table can not grow past {old_capacity} slots");
            return Err(HashTableError::MaxCapacityReached {
                capacity: old_capacity,
            });
        }

        let started = Instant::now();
        let new_capacity = old_capacity * 2;
        let mut blocks = allocate_control_blocks(
            &self.allocator,
            new_capacity / self.max_values_per_batch,
            self.max_values_per_batch,
        )?;
        relayout(&self.control_blocks, &mut blocks, self.bits_in_chunk, new_capacity);

        self.control_blocks = blocks;
        self.capacity = new_capacity;
        self.max_size = self.config.max_size_for(new_capacity);
        let elapsed = started.elapsed();
        self.counters.record_rehash(elapsed);

        tracing::debug!(
            "hash table grew from {old_capacity} to {new_capacity} slots in {elapsed:?} ({} keys)",
            self.size()
        );
        Ok(())
    }
}

/// Reinsert every occupied word of `old` into the empty blocks `new`.
///
/// Every word is distinct, so no key comparison is needed.
fn relayout(old: &[ControlBlock], new: &mut [ControlBlock], bits_in_chunk: u32, capacity: usize) {
    let slot_mask = (1 << bits_in_chunk) - 1;
    for block in old {
        for index in 0..block.slots() {
            let word = block.word(index);
            if control::is_empty(word) {
                continue;
            }
            let mut slot = control::home_slot(control::fragment(word), capacity);
            while !control::is_empty(new[slot >> bits_in_chunk].word(slot & slot_mask)) {
                slot = control::next_slot(slot, capacity);
            }
            new[slot >> bits_in_chunk].set_word(slot & slot_mask, word);
        }
    }
}

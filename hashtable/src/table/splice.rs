//! Splice: relieve a batch by moving its upper half into a new batch.
//!
//! Capacity does not change, so every moved key keeps its probe sequence;
//! only the ordinal in its control word is rewritten. The moved rows' old
//! ordinals and the unused tail of the previous last batch become gaps, so
//! `size()` is unchanged.

// Ordinals are bounded by the 32-bit control word encoding.
#![allow(clippy::cast_possible_truncation)]

use std::ops::Range;
use std::time::Instant;

use super::{BlockHashTable, Chunk, control, loaded_mut};
use crate::error::{HashTableError, Result};
use crate::hash::KeyHasher;
use crate::listener::{RecordMove, ResizeListener};

impl<H: KeyHasher> BlockHashTable<H> {
    /// Move the upper half of `batch_index` into a new batch and return its index.
    ///
    /// Moved keys are rehashed with the table's hasher and `seed`, which must
    /// match the hashes they were inserted with. The accumulators are moved
    /// through `listener` once the keys are in place.
    pub fn splice<L: ResizeListener + ?Sized>(
        &mut self,
        batch_index: usize,
        seed: u64,
        listener: &mut L,
    ) -> Result<usize> {
        let batches = self.chunks.len();
        let records = self
            .records_in_batch(batch_index)
            .ok_or(HashTableError::InvalidBatchIndex {
                batch_index,
                batches,
            })?;
        if records < 2 {
            return Err(HashTableError::SpliceNotPossible {
                batch_index,
                records,
            });
        }

        let started = Instant::now();
        let keep = records / 2;
        let moved = records - keep;
        let source = self.chunk(batch_index);
        let (variable_start, variable_bytes) = source.variable.as_ref().map_or((0, 0), |variable| {
            let start = source.fixed.variable_offset(keep);
            (start, variable.used() - start as usize)
        });

        let target = self.add_chunk(self.variable_block_max_length.max(variable_bytes), listener)?;
        let target_start = target << self.bits_in_chunk;
        assert!(
            u32::try_from(target_start + moved).is_ok(),
            "spliced ordinals do not fit a control word"
        );

        let (head, tail) = self.chunks.split_at_mut(target);
        let source = loaded_mut(head[batch_index].as_mut(), batch_index);
        let destination = loaded_mut(tail[0].as_mut(), target);
        if self.layout.is_fixed_only() {
            move_fixed_rows(source, destination, keep..records);
        } else {
            move_variable_rows(source, destination, keep..records, self.layout.data_width());
        }
        source.fixed.truncate(keep);
        if let Some(variable) = source.variable.as_mut() {
            variable.rewind(variable_start);
        }

        let source_start = batch_index << self.bits_in_chunk;
        for index in 0..moved {
            let new_ordinal = target_start + index;
            let fragment = control::fragment_of(self.hash_key(self.stored_key(new_ordinal), seed));
            self.remap_ordinal(
                fragment,
                (source_start + keep + index) as u32,
                new_ordinal as u32,
            );
        }

        self.gaps += target_start - self.current_ordinal + moved;
        self.current_ordinal = target_start + moved;

        let record_move = RecordMove {
            src_batch: batch_index,
            dst_batch: target,
            src_start: keep,
            dst_start: 0,
            count: moved,
        };
        listener.move_fixed_values_and_free_space(record_move);
        listener.move_variable_values_and_free_space(record_move);

        let freed = moved * self.layout.block_width() + variable_bytes;
        let elapsed = started.elapsed();
        self.counters.record_splice(elapsed, freed);
        tracing::debug!(
            "spliced {moved} of {records} records from batch {batch_index} into batch {target} in {elapsed:?} ({freed} bytes freed)"
        );
        Ok(target)
    }

    /// Point the control word holding `old` at `new`.
    ///
    /// # Panics
    /// Panics if the probe sequence of `fragment` does not reach `old`, which
    /// means the key was inserted with a different hash.
    fn remap_ordinal(&mut self, fragment: u32, old: u32, new: u32) {
        let mut slot = control::home_slot(fragment, self.capacity);
        loop {
            let word = self.control_word(slot);
            assert!(
                !control::is_empty(word),
                "ordinal {old} not on its probe sequence; was it hashed with a different seed?"
            );
            if control::ordinal(word) == old {
                assert_eq!(
                    control::fragment(word),
                    fragment,
                    "ordinal {old} is stored under a different hash"
                );
                self.set_control_word(slot, control::pack(new, fragment));
                return;
            }
            slot = control::next_slot(slot, self.capacity);
        }
    }
}

fn move_fixed_rows(source: &Chunk, destination: &mut Chunk, rows: Range<usize>) {
    for offset in rows {
        destination.fixed.append(source.fixed.row(offset), None);
    }
}

fn move_variable_rows(
    source: &Chunk,
    destination: &mut Chunk,
    rows: Range<usize>,
    data_width: usize,
) {
    let (Some(from), Some(to)) = (source.variable.as_ref(), destination.variable.as_mut()) else {
        unreachable!("variable layout without variable blocks");
    };
    for offset in rows {
        let entry_offset = to.append(from.entry(source.fixed.variable_offset(offset)));
        destination
            .fixed
            .append(&source.fixed.row(offset)[..data_width], Some(entry_offset));
    }
}

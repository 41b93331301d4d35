//! Probing, lookup and insertion.
//!
//! Probing starts at the home slot of the hash fragment and walks slots
//! backwards until it meets an empty slot or a slot whose fragment and key
//! bytes both match. There are no deletions, so there are no tombstones.

// Ordinals are bounded by the 32-bit control word encoding.
#![allow(clippy::cast_possible_truncation)]

use super::control;
use super::trace::RecordTrace;
use super::BlockHashTable;
use crate::error::{BatchError, HashTableError, Result};
use crate::hash::KeyHasher;
use crate::layout::KeyRef;
use crate::listener::{NoopResizeListener, RecordMove, ResizeListener, SpaceCheckListener};
use crate::memory::VariableBlock;

/// Outcome of a lookup or insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The key was already present.
    Found(u32),
    /// The key was added under a new ordinal.
    Inserted(u32),
    /// The key is absent, or its nulls make it incomparable.
    NotFound,
    /// The accumulators have no room for the record; the key was not added.
    Retry,
}

impl ProbeResult {
    /// The ordinal of a found or inserted key.
    #[must_use]
    pub const fn ordinal(self) -> Option<u32> {
        match self {
            Self::Found(ordinal) | Self::Inserted(ordinal) => Some(ordinal),
            Self::NotFound | Self::Retry => None,
        }
    }
}

enum Probe {
    Found(u32),
    Vacant(usize),
}

enum Step {
    Done(ProbeResult),
    /// The table grew; slot positions are stale and the probe must restart.
    Rehashed,
}

/// Adapts a resize listener for callers that do no space checks.
struct WithoutSpaceCheck<'a, L: ?Sized>(&'a mut L);

impl<L: ResizeListener + ?Sized> ResizeListener for WithoutSpaceCheck<'_, L> {
    fn add_batch(&mut self) -> Result<()> {
        self.0.add_batch()
    }

    fn commit_resize(&mut self) {
        self.0.commit_resize();
    }

    fn revert_resize(&mut self) {
        self.0.revert_resize();
    }

    fn verify_batch_count(&self, batches: usize) {
        self.0.verify_batch_count(batches);
    }

    fn move_fixed_values_and_free_space(&mut self, record_move: RecordMove) {
        self.0.move_fixed_values_and_free_space(record_move);
    }

    fn move_variable_values_and_free_space(&mut self, record_move: RecordMove) {
        self.0.move_variable_values_and_free_space(record_move);
    }
}

impl<L: ?Sized> SpaceCheckListener for WithoutSpaceCheck<'_, L> {
    fn has_space(&mut self, _batch_index: usize, _offset_in_batch: usize, _seed: u64) -> bool {
        true
    }
}

impl<H: KeyHasher> BlockHashTable<H> {
    /// Walk the probe sequence of `fragment` looking for `key`.
    ///
    /// Always terminates: growth keeps at least one slot empty.
    fn probe(&self, fragment: u32, key: KeyRef<'_>) -> Probe {
        let mut slot = control::home_slot(fragment, self.capacity);
        loop {
            let word = self.control_word(slot);
            if control::is_empty(word) {
                return Probe::Vacant(slot);
            }
            if control::fragment(word) == fragment {
                let ordinal = control::ordinal(word);
                if self.key_matches(ordinal, key) {
                    return Probe::Found(ordinal);
                }
            }
            slot = control::next_slot(slot, self.capacity);
        }
    }

    /// Words whose row has been released never match.
    fn key_matches(&self, ordinal: u32, key: KeyRef<'_>) -> bool {
        self.key_at(ordinal).is_some_and(|stored| {
            stored.fixed == &key.fixed[..self.layout.data_width()]
                && (self.layout.is_fixed_only() || stored.variable == key.variable)
        })
    }

    fn check_key(&self, key: KeyRef<'_>) -> Result<()> {
        let expected = self.layout.data_width();
        if key.fixed.len() < expected {
            return Err(HashTableError::KeyTooShort {
                expected,
                actual: key.fixed.len(),
            });
        }
        Ok(())
    }

    /// Look a key up without inserting it.
    ///
    /// Keys whose nulls the null comparator rejects are never found, even if
    /// identical bytes were inserted.
    #[must_use]
    pub fn lookup(&self, hash: u64, key: KeyRef<'_>) -> ProbeResult {
        if self.check_key(key).is_err() || !self.null_comparator.is_comparable(key.fixed) {
            return ProbeResult::NotFound;
        }
        match self.probe(control::fragment_of(hash), key) {
            Probe::Found(ordinal) => ProbeResult::Found(ordinal),
            Probe::Vacant(_) => ProbeResult::NotFound,
        }
    }

    /// The ordinal of `key`, if present and comparable.
    #[must_use]
    pub fn find(&self, hash: u64, key: KeyRef<'_>) -> Option<u32> {
        self.lookup(hash, key).ordinal()
    }

    /// Look up every key, writing `None` for absent or incomparable keys.
    ///
    /// Returns the number of keys found.
    ///
    /// # Panics
    /// Panics if the slices differ in length.
    pub fn find_all(&self, keys: &[KeyRef<'_>], hashes: &[u64], out: &mut [Option<u32>]) -> usize {
        assert_eq!(keys.len(), hashes.len(), "one hash per key");
        assert_eq!(keys.len(), out.len(), "one output per key");
        let mut found = 0;
        for ((key, &hash), slot) in keys.iter().zip(hashes).zip(out.iter_mut()) {
            *slot = self.find(hash, *key);
            found += usize::from(slot.is_some());
        }
        found
    }

    /// Return the ordinal of `key`, inserting it if absent.
    pub fn add(&mut self, hash: u64, key: KeyRef<'_>) -> Result<u32> {
        self.get_or_insert_with_retry(hash, key, &mut NoopResizeListener)
            .map(|result| match result {
                ProbeResult::Found(ordinal) | ProbeResult::Inserted(ordinal) => ordinal,
                other => unreachable!("insert without a space check returned {other:?}"),
            })
    }

    /// Add every key, writing ordinals into `out`.
    ///
    /// On failure, `BatchError::processed` records how many keys completed;
    /// their ordinals are in `out`.
    pub fn add_all(
        &mut self,
        keys: &[KeyRef<'_>],
        hashes: &[u64],
        out: &mut [u32],
    ) -> Result<usize, BatchError> {
        self.get_or_insert_all(keys, hashes, out, &mut NoopResizeListener)
    }

    /// Return the ordinal of `key`, inserting it if absent and keeping the
    /// accumulators in step through `listener`.
    ///
    /// Growth retries internally; the result is `Found` or `Inserted`.
    pub fn get_or_insert_with_retry<L: ResizeListener + ?Sized>(
        &mut self,
        hash: u64,
        key: KeyRef<'_>,
        listener: &mut L,
    ) -> Result<ProbeResult> {
        self.traced_insert(hash, key, 0, &mut WithoutSpaceCheck(listener))
    }

    /// Batch form of [`get_or_insert_with_retry`](Self::get_or_insert_with_retry).
    pub fn get_or_insert_all<L: ResizeListener + ?Sized>(
        &mut self,
        keys: &[KeyRef<'_>],
        hashes: &[u64],
        out: &mut [u32],
        listener: &mut L,
    ) -> Result<usize, BatchError> {
        assert_eq!(keys.len(), hashes.len(), "one hash per key");
        assert_eq!(keys.len(), out.len(), "one output per key");

        let mut listener = WithoutSpaceCheck(listener);
        let before = self.trace.is_some().then(|| self.snapshot());
        let mut records = Vec::new();
        let mut failure = None;
        for (index, (key, &hash)) in keys.iter().zip(hashes).enumerate() {
            match self.get_or_insert(hash, *key, 0, &mut listener) {
                Ok(result) => {
                    if let Some(ordinal) = result.ordinal() {
                        out[index] = ordinal;
                    }
                    if before.is_some() {
                        records.push(RecordTrace::new(index, result));
                    }
                }
                Err(source) => {
                    failure = Some(BatchError {
                        processed: index,
                        source,
                    });
                    break;
                }
            }
        }
        if let Some(before) = before {
            let error = failure.as_ref().map(|e| e.source.clone());
            self.finish_trace(before, records, error);
        }
        failure.map_or(Ok(keys.len()), Err)
    }

    /// Insert `key` only if the accumulators report room for it.
    ///
    /// Returns `Retry` when `listener.has_space` refuses the record; the table
    /// may have added a batch, but the key was not inserted.
    pub fn get_or_insert_with_accum_space_check<L>(
        &mut self,
        hash: u64,
        key: KeyRef<'_>,
        seed: u64,
        listener: &mut L,
    ) -> Result<ProbeResult>
    where
        L: ResizeListener + SpaceCheckListener + ?Sized,
    {
        self.traced_insert(hash, key, seed, listener)
    }

    fn traced_insert<L>(
        &mut self,
        hash: u64,
        key: KeyRef<'_>,
        seed: u64,
        listener: &mut L,
    ) -> Result<ProbeResult>
    where
        L: ResizeListener + SpaceCheckListener + ?Sized,
    {
        let Some(before) = self.trace.is_some().then(|| self.snapshot()) else {
            return self.get_or_insert(hash, key, seed, listener);
        };
        let result = self.get_or_insert(hash, key, seed, listener);
        match &result {
            Ok(outcome) => self.finish_trace(before, vec![RecordTrace::new(0, *outcome)], None),
            Err(e) => self.finish_trace(before, Vec::new(), Some(e.clone())),
        }
        result
    }

    fn get_or_insert<L>(
        &mut self,
        hash: u64,
        key: KeyRef<'_>,
        seed: u64,
        listener: &mut L,
    ) -> Result<ProbeResult>
    where
        L: ResizeListener + SpaceCheckListener + ?Sized,
    {
        self.check_key(key)?;
        let fragment = control::fragment_of(hash);
        loop {
            if let Step::Done(result) = self.try_insert(fragment, key, seed, listener)? {
                return Ok(result);
            }
        }
    }

    fn try_insert<L>(
        &mut self,
        fragment: u32,
        key: KeyRef<'_>,
        seed: u64,
        listener: &mut L,
    ) -> Result<Step>
    where
        L: ResizeListener + SpaceCheckListener + ?Sized,
    {
        let slot = match self.probe(fragment, key) {
            Probe::Found(ordinal) => return Ok(Step::Done(ProbeResult::Found(ordinal))),
            Probe::Vacant(slot) => slot,
        };

        if self.current_ordinal >= self.max_size {
            self.grow()?;
            return Ok(Step::Rehashed);
        }

        let ordinal = self.prepare_ordinal(key.variable.len(), listener)?;
        let (batch, offset) = self.split(ordinal);
        if !listener.has_space(batch, offset, seed) {
            return Ok(Step::Done(ProbeResult::Retry));
        }

        assert!(
            u32::try_from(ordinal).is_ok(),
            "ordinal {ordinal} does not fit a control word"
        );
        self.write_key(ordinal, key);
        self.set_control_word(slot, control::pack(ordinal as u32, fragment));
        self.current_ordinal = ordinal + 1;
        Ok(Step::Done(ProbeResult::Inserted(ordinal as u32)))
    }

    /// Find room for the next row and return its ordinal.
    ///
    /// May add a batch, grow a variable block, or skip ordinals to the next
    /// batch (recording them as gaps). `current_ordinal` is advanced past any
    /// skipped ordinals but not past the returned one.
    fn prepare_ordinal<L: ResizeListener + ?Sized>(
        &mut self,
        variable_len: usize,
        listener: &mut L,
    ) -> Result<usize> {
        loop {
            let ordinal = self.current_ordinal;
            let (batch, offset) = self.split(ordinal);
            if offset >= self.config.batch_size {
                self.skip_to_next_batch();
                continue;
            }

            debug_assert!(batch <= self.chunks.len(), "batch {batch} skipped");
            if batch == self.chunks.len() {
                let variable_capacity = self
                    .variable_block_max_length
                    .max(VariableBlock::entry_size(variable_len));
                self.add_chunk(variable_capacity, listener)?;
            }

            let enforce_limit = self.config.enforce_var_width_buffer_limit;
            let Some(variable) = self.chunk_mut(batch).variable.as_mut() else {
                return Ok(ordinal);
            };
            if !variable.fits(variable_len) {
                // An empty batch grows its block, or the row could never be placed.
                if enforce_limit && offset > 0 {
                    self.skip_to_next_batch();
                    continue;
                }
                variable.grow_to_fit(variable_len)?;
            }
            return Ok(ordinal);
        }
    }

    /// Leave the rest of the current batch unused.
    fn skip_to_next_batch(&mut self) {
        let next = (self.current_ordinal | self.chunk_mask) + 1;
        self.gaps += next - self.current_ordinal;
        self.current_ordinal = next;
    }

    fn write_key(&mut self, ordinal: usize, key: KeyRef<'_>) {
        let data = &key.fixed[..self.layout.data_width()];
        let (batch, offset) = self.split(ordinal);
        let chunk = self.chunk_mut(batch);
        let variable_offset = chunk
            .variable
            .as_mut()
            .map(|variable| variable.append(key.variable));
        let row = chunk.fixed.append(data, variable_offset);
        assert_eq!(row, offset, "row written out of ordinal order");
        if !self.layout.is_fixed_only() {
            self.counters.record_variable_key(key.variable.len());
        }
    }
}

//! Callbacks into the externally owned accumulator store.
//!
//! The table owns keys; an aggregation operator owns per-key accumulator
//! columns indexed by the same ordinals. Whenever the table changes its batch
//! layout it calls back synchronously so the accumulators stay in lockstep.
//! Listeners are passed per call; the table never stores one.

use crate::error::Result;

/// A contiguous run of records relocated from one batch to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMove {
    pub src_batch: usize,
    pub dst_batch: usize,
    pub src_start: usize,
    pub dst_start: usize,
    pub count: usize,
}

/// Keeps accumulator storage aligned with the table's batches.
///
/// # Protocol
///
/// When the table adds a batch it first allocates its own blocks, then calls
/// [`add_batch`](Self::add_batch). On success it calls
/// [`commit_resize`](Self::commit_resize) followed by
/// [`verify_batch_count`](Self::verify_batch_count); on failure it frees its
/// own blocks and calls [`revert_resize`](Self::revert_resize).
pub trait ResizeListener {
    /// Provisionally add storage for one more batch.
    fn add_batch(&mut self) -> Result<()>;

    /// Make the batch added by the last `add_batch` permanent.
    fn commit_resize(&mut self);

    /// Undo the last `add_batch`, including a partially applied one.
    fn revert_resize(&mut self);

    /// Assert the accumulator store holds exactly `batches` batches.
    fn verify_batch_count(&self, batches: usize);

    /// Move fixed-width accumulator values and release the source slots.
    fn move_fixed_values_and_free_space(&mut self, record_move: RecordMove);

    /// Move variable-width accumulator values and release the source bytes.
    fn move_variable_values_and_free_space(&mut self, record_move: RecordMove);
}

/// Just-in-time check that the accumulators can take a new record.
pub trait SpaceCheckListener {
    /// Whether the record at (`batch_index`, `offset_in_batch`) can be accumulated.
    fn has_space(&mut self, batch_index: usize, offset_in_batch: usize, seed: u64) -> bool;
}

/// Listener for tables without accumulators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResizeListener;

impl ResizeListener for NoopResizeListener {
    fn add_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit_resize(&mut self) {}

    fn revert_resize(&mut self) {}

    fn verify_batch_count(&self, _batches: usize) {}

    fn move_fixed_values_and_free_space(&mut self, _record_move: RecordMove) {}

    fn move_variable_values_and_free_space(&mut self, _record_move: RecordMove) {}
}

impl SpaceCheckListener for NoopResizeListener {
    fn has_space(&mut self, _batch_index: usize, _offset_in_batch: usize, _seed: u64) -> bool {
        true
    }
}

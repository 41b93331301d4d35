//! Batch-structured open-addressing hash table.
//!
//! Maps pivoted keys to dense 32-bit ordinals. Keys live in chunks ("batches")
//! of fixed and variable blocks; the hash slots live in separate control
//! blocks holding (ordinal, hash fragment) words.
//!
//! # Addressing
//!
//! - Ordinal `o` lives in batch `o >> bits_in_chunk` at offset `o & chunk_mask`
//! - Slot `s` lives in control block `s >> bits_in_chunk` at index `s & chunk_mask`
//!
//! Every control block holds `max_values_per_batch` slots, so capacity is
//! always a whole number of control blocks.
//!
//! # Invariants
//!
//! - `capacity` is a power of two and at least `max_values_per_batch`
//! - Every live ordinal is referenced by exactly one control word, reachable
//!   from the home slot of its fragment by walking slots backwards
//! - `size() == current_ordinal - gaps`
//! - Ordinals below `current_ordinal` that hold no row are counted in `gaps`
//!
//! # Growth and splice
//!
//! Growth doubles the slot array and relocates control words; ordinals never
//! change. Splice moves half of a batch into a new batch and rewrites the
//! affected control words; capacity never changes.

mod control;
mod insert;
mod iter;
mod rehash;
mod splice;
mod stats;
mod trace;

use std::sync::Arc;

pub use insert::ProbeResult;
pub use iter::KeyIterator;
pub use stats::{MemoryUsage, TableStats};
pub use trace::{InsertTrace, RecordOutcome, RecordTrace, TableSnapshot, TraceLog, TraceSession};

use crate::config::HashTableConfig;
use crate::error::{HashTableError, Result};
use crate::hash::{KeyHasher, XxKeyHasher};
use crate::layout::{KeyRef, PivotLayout, PivotedKeys};
use crate::listener::ResizeListener;
use crate::memory::{BufferAllocator, ControlBlock, FixedBlock, VariableBlock};
use crate::nulls::NullComparator;

use stats::Counters;

/// Storage for one batch of keys.
#[derive(Debug)]
struct Chunk {
    fixed: FixedBlock,
    /// `None` for fixed-only layouts.
    variable: Option<VariableBlock>,
}

impl Chunk {
    fn reset(&mut self) {
        self.fixed.truncate(0);
        if let Some(variable) = self.variable.as_mut() {
            variable.rewind(0);
        }
    }

    fn size_in_bytes(&self) -> usize {
        self.fixed.size_in_bytes() + self.variable.as_ref().map_or(0, VariableBlock::size_in_bytes)
    }
}

/// Borrow a batch that must not have been released.
fn loaded(slot: Option<&Chunk>, batch: usize) -> &Chunk {
    slot.unwrap_or_else(|| panic!("batch {batch} was released while still referenced"))
}

fn loaded_mut(slot: Option<&mut Chunk>, batch: usize) -> &mut Chunk {
    slot.unwrap_or_else(|| panic!("batch {batch} was released while still referenced"))
}

/// Open-addressing hash table over pivoted keys.
///
/// Single owner, not thread-safe. All memory is drawn from the shared
/// [`BufferAllocator`] and returned when the table (or a released batch) drops.
pub struct BlockHashTable<H = XxKeyHasher> {
    layout: PivotLayout,
    config: HashTableConfig,
    allocator: Arc<BufferAllocator>,
    hasher: H,
    null_comparator: NullComparator,

    max_values_per_batch: usize,
    bits_in_chunk: u32,
    chunk_mask: usize,
    variable_block_max_length: usize,

    control_blocks: Vec<ControlBlock>,
    capacity: usize,
    max_size: usize,

    chunks: Vec<Option<Chunk>>,
    current_ordinal: usize,
    gaps: usize,

    counters: Counters,
    trace: Option<TraceLog>,
}

impl BlockHashTable<XxKeyHasher> {
    /// Create a table using the default xxHash64-based key hasher.
    pub fn new(
        layout: PivotLayout,
        config: HashTableConfig,
        allocator: Arc<BufferAllocator>,
    ) -> Result<Self> {
        Self::with_hasher(layout, config, allocator, XxKeyHasher)
    }
}

impl<H: KeyHasher> BlockHashTable<H> {
    /// Create a table whose splices rehash keys with `hasher`.
    ///
    /// Allocates the control blocks for the minimum capacity; batches are
    /// allocated lazily on first insert.
    pub fn with_hasher(
        layout: PivotLayout,
        config: HashTableConfig,
        allocator: Arc<BufferAllocator>,
        hasher: H,
    ) -> Result<Self> {
        config.validate()?;

        let max_values_per_batch = config.max_values_per_batch();
        let capacity = config.min_capacity();
        let control_blocks =
            allocate_control_blocks(&allocator, capacity / max_values_per_batch, max_values_per_batch)?;

        tracing::debug!(
            "created hash table (capacity={capacity}, batch_size={}, block_width={}, variable_count={})",
            config.batch_size,
            layout.block_width(),
            layout.variable_count()
        );

        Ok(Self {
            max_values_per_batch,
            bits_in_chunk: max_values_per_batch.trailing_zeros(),
            chunk_mask: max_values_per_batch - 1,
            variable_block_max_length: config.variable_block_max_length(&layout),
            max_size: config.max_size_for(capacity),
            capacity,
            control_blocks,
            chunks: Vec::new(),
            current_ordinal: 0,
            gaps: 0,
            counters: Counters::default(),
            trace: None,
            layout,
            config,
            allocator,
            hasher,
            null_comparator: NullComparator::None,
        })
    }

    /// Install the null comparability policy used by `find`.
    ///
    /// # Panics
    /// Panics if the comparator inspects bytes beyond the key's data width.
    pub fn set_null_comparator(&mut self, null_comparator: NullComparator) {
        assert!(
            null_comparator.bytes_required() <= self.layout.data_width(),
            "null comparator inspects {} bytes but keys have {}",
            null_comparator.bytes_required(),
            self.layout.data_width()
        );
        self.null_comparator = null_comparator;
    }

    #[must_use]
    pub const fn layout(&self) -> &PivotLayout {
        &self.layout
    }

    #[must_use]
    pub const fn config(&self) -> &HashTableConfig {
        &self.config
    }

    #[must_use]
    pub const fn hasher(&self) -> &H {
        &self.hasher
    }

    #[must_use]
    pub const fn allocator(&self) -> &Arc<BufferAllocator> {
        &self.allocator
    }

    #[must_use]
    pub const fn null_comparator(&self) -> &NullComparator {
        &self.null_comparator
    }

    /// Hash `key` with the table's hasher, as a splice with `seed` would.
    #[must_use]
    pub fn hash_key(&self, key: KeyRef<'_>, seed: u64) -> u64 {
        self.hasher.hash_key(
            key,
            self.layout.data_width(),
            self.layout.is_fixed_only(),
            seed,
        )
    }

    /// Number of live keys.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.current_ordinal - self.gaps
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of hash slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ordinal count at which the next insert grows the table.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of batches, including released ones.
    #[must_use]
    pub fn blocks(&self) -> usize {
        self.chunks.len()
    }

    /// Ordinals skipped without holding a key.
    #[must_use]
    pub const fn gaps(&self) -> usize {
        self.gaps
    }

    /// The next ordinal to be handed out, ignoring gaps it may skip.
    #[must_use]
    pub const fn current_ordinal(&self) -> usize {
        self.current_ordinal
    }

    #[must_use]
    pub const fn max_values_per_batch(&self) -> usize {
        self.max_values_per_batch
    }

    #[must_use]
    pub const fn variable_block_max_length(&self) -> usize {
        self.variable_block_max_length
    }

    /// Records stored in `batch`; `Some(0)` if it was released.
    #[must_use]
    pub fn records_in_batch(&self, batch: usize) -> Option<usize> {
        self.chunks
            .get(batch)
            .map(|slot| slot.as_ref().map_or(0, |chunk| chunk.fixed.records()))
    }

    /// Split an ordinal into (batch, offset).
    const fn split(&self, ordinal: usize) -> (usize, usize) {
        (ordinal >> self.bits_in_chunk, ordinal & self.chunk_mask)
    }

    fn chunk(&self, batch: usize) -> &Chunk {
        loaded(self.chunks[batch].as_ref(), batch)
    }

    fn chunk_mut(&mut self, batch: usize) -> &mut Chunk {
        loaded_mut(self.chunks[batch].as_mut(), batch)
    }

    fn control_word(&self, slot: usize) -> u64 {
        self.control_blocks[slot >> self.bits_in_chunk].word(slot & self.chunk_mask)
    }

    fn set_control_word(&mut self, slot: usize, word: u64) {
        self.control_blocks[slot >> self.bits_in_chunk].set_word(slot & self.chunk_mask, word);
    }

    /// The stored key at `ordinal`. The ordinal must hold a row.
    fn stored_key(&self, ordinal: usize) -> KeyRef<'_> {
        let (batch, offset) = self.split(ordinal);
        let chunk = self.chunk(batch);
        let row = chunk.fixed.row(offset);
        let data = &row[..self.layout.data_width()];
        match &chunk.variable {
            None => KeyRef::fixed(data),
            Some(variable) => KeyRef::new(data, variable.entry(chunk.fixed.variable_offset(offset))),
        }
    }

    /// The stored key at `ordinal`, if it refers to a row that is still held.
    #[must_use]
    pub fn key_at(&self, ordinal: u32) -> Option<KeyRef<'_>> {
        let ordinal = ordinal as usize;
        if ordinal >= self.current_ordinal {
            return None;
        }
        let (batch, offset) = self.split(ordinal);
        let chunk = self.chunks.get(batch)?.as_ref()?;
        (offset < chunk.fixed.records()).then(|| self.stored_key(ordinal))
    }

    /// Allocate the blocks of a new batch without registering it.
    ///
    /// Nothing stays allocated if any block fails.
    fn allocate_chunk(&self, variable_capacity: usize) -> Result<Chunk> {
        let fixed = FixedBlock::new(&self.allocator, self.layout.block_width(), self.config.batch_size)?;
        let variable = if self.layout.is_fixed_only() {
            None
        } else {
            Some(VariableBlock::new(&self.allocator, variable_capacity)?)
        };
        Ok(Chunk { fixed, variable })
    }

    /// Append a batch, growing the accumulator store in lockstep.
    fn add_chunk<L: ResizeListener + ?Sized>(
        &mut self,
        variable_capacity: usize,
        listener: &mut L,
    ) -> Result<usize> {
        let chunk = self.allocate_chunk(variable_capacity)?;
        if let Err(e) = listener.add_batch() {
            listener.revert_resize();
            tracing::warn!("accumulators failed to add batch {}: {e}", self.chunks.len());
            return Err(e);
        }
        listener.commit_resize();
        self.chunks.push(Some(chunk));
        listener.verify_batch_count(self.chunks.len());
        tracing::debug!("added batch {}", self.chunks.len() - 1);
        Ok(self.chunks.len() - 1)
    }

    /// Make sure the first batch exists before any insert.
    pub fn preallocate_single_batch<L: ResizeListener + ?Sized>(
        &mut self,
        listener: &mut L,
    ) -> Result<()> {
        if self.chunks.is_empty() {
            self.add_chunk(self.variable_block_max_length, listener)?;
        }
        Ok(())
    }

    /// Free the storage of one batch.
    ///
    /// The batch keeps its index. Its keys are reported absent afterwards.
    /// Returns the number of bytes released.
    pub fn release_batch(&mut self, batch: usize) -> Result<usize> {
        let batches = self.chunks.len();
        let slot = self
            .chunks
            .get_mut(batch)
            .ok_or(HashTableError::InvalidBatchIndex {
                batch_index: batch,
                batches,
            })?;
        let released = slot.take().map_or(0, |chunk| chunk.size_in_bytes());
        tracing::debug!("released batch {batch} ({released} bytes)");
        Ok(released)
    }

    /// Drop every key and shrink back to the minimum capacity.
    ///
    /// Batch 0 is kept (or reallocated if it was released); all other batches
    /// are freed. Returns the number of batches freed.
    pub fn reset_to_minimum_size(&mut self) -> Result<usize> {
        // Allocate before touching anything so a failure leaves the table as is.
        let replacement = match self.chunks.first() {
            Some(None) => Some(self.allocate_chunk(self.variable_block_max_length)?),
            _ => None,
        };

        let freed = self.chunks.len().saturating_sub(1);
        self.chunks.truncate(1);
        if let Some(chunk) = replacement {
            self.chunks[0] = Some(chunk);
        } else if let Some(Some(chunk)) = self.chunks.first_mut() {
            chunk.reset();
        }

        let min_capacity = self.config.min_capacity();
        self.control_blocks
            .truncate(min_capacity / self.max_values_per_batch);
        for block in &mut self.control_blocks {
            block.clear();
        }
        self.capacity = min_capacity;
        self.max_size = self.config.max_size_for(min_capacity);
        self.current_ordinal = 0;
        self.gaps = 0;

        tracing::debug!("reset hash table to {min_capacity} slots, freed {freed} batches");
        Ok(freed)
    }

    /// Re-materialize the keys at `ordinals` into `out`, in the given order.
    ///
    /// Every ordinal is checked before anything is written.
    ///
    /// # Panics
    /// Panics if `out` uses a different layout.
    pub fn copy_keys_to_buffer(&self, ordinals: &[u32], out: &mut PivotedKeys) -> Result<()> {
        assert_eq!(
            out.layout(),
            self.layout,
            "destination buffer uses a different layout"
        );
        if let Some(&ordinal) = ordinals.iter().find(|&&o| self.key_at(o).is_none()) {
            return Err(HashTableError::InvalidOrdinal { ordinal });
        }
        let data_width = self.layout.data_width();
        for &ordinal in ordinals {
            let key = self.stored_key(ordinal as usize);
            out.push(&key.fixed[..data_width], key.variable);
        }
        Ok(())
    }
}

impl<H> Drop for BlockHashTable<H> {
    fn drop(&mut self) {
        tracing::debug!(
            "closing hash table ({} keys, {} batches, {} slots)",
            self.current_ordinal - self.gaps,
            self.chunks.len(),
            self.capacity
        );
    }
}

impl<H> std::fmt::Debug for BlockHashTable<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHashTable")
            .field("layout", &self.layout)
            .field("capacity", &self.capacity)
            .field("current_ordinal", &self.current_ordinal)
            .field("gaps", &self.gaps)
            .field("batches", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

/// Allocate `count` empty control blocks of `slots` slots each, all or nothing.
fn allocate_control_blocks(
    allocator: &Arc<BufferAllocator>,
    count: usize,
    slots: usize,
) -> Result<Vec<ControlBlock>> {
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        blocks.push(ControlBlock::new(allocator, slots)?);
    }
    Ok(blocks)
}

//! Helpers shared by unit tests.

use std::sync::Arc;

use crate::config::HashTableConfig;
use crate::error::{HashTableError, Result};
use crate::layout::{KeyRef, PivotLayout};
use crate::listener::{RecordMove, ResizeListener, SpaceCheckListener};
use crate::memory::BufferAllocator;
use crate::table::{BlockHashTable, ProbeResult};

/// Small tables: one batch of `batch_size` rows and the minimum capacity.
pub fn small_config(batch_size: usize) -> HashTableConfig {
    HashTableConfig::default()
        .with_initial_capacity(16)
        .with_batch_size(batch_size)
}

/// A table over 8-byte fixed keys.
pub fn fixed_table(batch_size: usize) -> BlockHashTable {
    BlockHashTable::new(
        PivotLayout::fixed(8),
        small_config(batch_size),
        BufferAllocator::unbounded(),
    )
    .expect("create table")
}

/// A table over 8-byte fixed keys drawing from `allocator`.
pub fn fixed_table_in(config: HashTableConfig, allocator: &Arc<BufferAllocator>) -> BlockHashTable {
    BlockHashTable::new(PivotLayout::fixed(8), config, Arc::clone(allocator)).expect("create table")
}

/// A table over keys with 8 fixed bytes and one variable component.
pub fn variable_table(config: HashTableConfig) -> BlockHashTable {
    BlockHashTable::new(
        PivotLayout::variable(12, 1),
        config,
        BufferAllocator::unbounded(),
    )
    .expect("create table")
}

pub fn key_bytes(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Hash a key the way the table does during a splice with seed 0.
pub fn hash(table: &BlockHashTable, key: KeyRef<'_>) -> u64 {
    table.hash_key(key, 0)
}

/// Strict variable-width limit with room for two 24-byte entries per batch.
pub fn strict_config() -> HashTableConfig {
    small_config(8)
        .with_enforce_var_width_buffer_limit(true)
        .with_variable_block_max_length(64)
}

/// Insert `0..count` as fixed keys and return their ordinals.
pub fn add_range(table: &mut BlockHashTable, count: u64) -> Vec<u32> {
    (0..count)
        .map(|value| {
            let bytes = key_bytes(value);
            let key = KeyRef::fixed(&bytes);
            let key_hash = hash(table, key);
            table.add(key_hash, key).expect("add key")
        })
        .collect()
}

/// Look up a fixed key inserted by [`add_range`].
pub fn find_value(table: &BlockHashTable, value: u64) -> Option<u32> {
    let bytes = key_bytes(value);
    let key = KeyRef::fixed(&bytes);
    table.find(hash(table, key), key)
}

pub fn tail(value: u64) -> Vec<u8> {
    format!("tail-{value}").into_bytes()
}

pub fn add_variable(table: &mut BlockHashTable, fixed: &[u8], variable: &[u8]) -> u32 {
    let key = KeyRef::new(fixed, variable);
    let key_hash = hash(table, key);
    table.add(key_hash, key).expect("add key")
}

pub fn find_variable(table: &BlockHashTable, fixed: &[u8], variable: &[u8]) -> Option<u32> {
    let key = KeyRef::new(fixed, variable);
    table.find(hash(table, key), key)
}

/// Insert a fixed key through `listener` with retries.
pub fn add_with(
    table: &mut BlockHashTable,
    value: u64,
    listener: &mut RecordingListener,
) -> ProbeResult {
    let bytes = key_bytes(value);
    let key = KeyRef::fixed(&bytes);
    let key_hash = hash(table, key);
    table
        .get_or_insert_with_retry(key_hash, key, listener)
        .expect("insert key")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    AddBatch,
    Commit,
    Revert,
    MoveFixed(RecordMove),
    MoveVariable(RecordMove),
    HasSpace {
        batch_index: usize,
        offset_in_batch: usize,
        seed: u64,
    },
}

/// Accumulator stand-in that records every callback and tracks its batch count.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub events: Vec<ListenerEvent>,
    pub batches: usize,
    pending: bool,
    /// Fail the next `add_batch` after provisionally adding the batch.
    pub fail_add_batch: bool,
    /// Refuse every space check.
    pub deny_space: bool,
}

impl RecordingListener {
    /// A listener whose `add_batch` fails.
    pub fn failing_add_batch() -> Self {
        Self {
            fail_add_batch: true,
            ..Self::default()
        }
    }

    /// A listener that refuses space until `deny_space` is cleared.
    pub fn denying_space() -> Self {
        Self {
            deny_space: true,
            ..Self::default()
        }
    }
}

impl ResizeListener for RecordingListener {
    fn add_batch(&mut self) -> Result<()> {
        self.events.push(ListenerEvent::AddBatch);
        self.batches += 1;
        self.pending = true;
        if self.fail_add_batch {
            return Err(HashTableError::Listener("accumulator budget exhausted".to_string()));
        }
        Ok(())
    }

    fn commit_resize(&mut self) {
        self.events.push(ListenerEvent::Commit);
        self.pending = false;
    }

    fn revert_resize(&mut self) {
        self.events.push(ListenerEvent::Revert);
        if self.pending {
            self.batches -= 1;
            self.pending = false;
        }
    }

    fn verify_batch_count(&self, batches: usize) {
        assert_eq!(self.batches, batches, "accumulator batch count out of step");
    }

    fn move_fixed_values_and_free_space(&mut self, record_move: RecordMove) {
        self.events.push(ListenerEvent::MoveFixed(record_move));
    }

    fn move_variable_values_and_free_space(&mut self, record_move: RecordMove) {
        self.events.push(ListenerEvent::MoveVariable(record_move));
    }
}

impl SpaceCheckListener for RecordingListener {
    fn has_space(&mut self, batch_index: usize, offset_in_batch: usize, seed: u64) -> bool {
        self.events.push(ListenerEvent::HasSpace {
            batch_index,
            offset_in_batch,
            seed,
        });
        !self.deny_space
    }
}

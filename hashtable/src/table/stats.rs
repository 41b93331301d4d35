//! Instrumentation counters and memory accounting.

use std::fmt;
use std::time::Duration;

use super::BlockHashTable;
use crate::hash::KeyHasher;

/// Running counters kept by the table.
#[derive(Debug, Default)]
pub(super) struct Counters {
    rehash_count: u64,
    rehash_time: Duration,
    splice_count: u64,
    splice_time: Duration,
    spliced_freed_bytes: usize,
    max_variable_key_length: usize,
    cumulative_variable_key_length: u64,
}

impl Counters {
    pub(super) fn record_rehash(&mut self, elapsed: Duration) {
        self.rehash_count += 1;
        self.rehash_time += elapsed;
    }

    pub(super) fn record_splice(&mut self, elapsed: Duration, freed_bytes: usize) {
        self.splice_count += 1;
        self.splice_time += elapsed;
        self.spliced_freed_bytes += freed_bytes;
    }

    pub(super) fn record_variable_key(&mut self, len: usize) {
        self.max_variable_key_length = self.max_variable_key_length.max(len);
        self.cumulative_variable_key_length += len as u64;
    }
}

/// Bytes held by each kind of block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub control_bytes: usize,
    pub fixed_bytes: usize,
    pub variable_bytes: usize,
    /// Allocated but not yet written fixed row bytes.
    pub unused_fixed_bytes: usize,
    /// Allocated but not yet written variable bytes.
    pub unused_variable_bytes: usize,
}

impl MemoryUsage {
    /// Total allocated bytes.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.control_bytes + self.fixed_bytes + self.variable_bytes
    }
}

/// Point-in-time summary of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub size: usize,
    pub capacity: usize,
    pub batches: usize,
    pub gaps: usize,
    pub rehash_count: u64,
    pub rehash_time: Duration,
    pub splice_count: u64,
    pub splice_time: Duration,
    pub spliced_freed_bytes: usize,
    pub memory: MemoryUsage,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "keys: {} (gaps: {}), capacity: {}, batches: {}",
            self.size, self.gaps, self.capacity, self.batches
        )?;
        writeln!(
            f,
            "rehashes: {} in {:?}, splices: {} in {:?} ({} bytes freed)",
            self.rehash_count,
            self.rehash_time,
            self.splice_count,
            self.splice_time,
            self.spliced_freed_bytes
        )?;
        write!(
            f,
            "memory: {} bytes (control: {}, fixed: {}, variable: {}, unused: {})",
            self.memory.total(),
            self.memory.control_bytes,
            self.memory.fixed_bytes,
            self.memory.variable_bytes,
            self.memory.unused_fixed_bytes + self.memory.unused_variable_bytes
        )
    }
}

impl<H: KeyHasher> BlockHashTable<H> {
    #[must_use]
    pub const fn rehash_count(&self) -> u64 {
        self.counters.rehash_count
    }

    #[must_use]
    pub const fn rehash_time(&self) -> Duration {
        self.counters.rehash_time
    }

    #[must_use]
    pub const fn splice_count(&self) -> u64 {
        self.counters.splice_count
    }

    #[must_use]
    pub const fn splice_time(&self) -> Duration {
        self.counters.splice_time
    }

    /// Bytes vacated in source batches by splices.
    #[must_use]
    pub const fn spliced_freed_bytes(&self) -> usize {
        self.counters.spliced_freed_bytes
    }

    /// Longest variable-width tail inserted so far.
    #[must_use]
    pub const fn max_variable_key_length(&self) -> usize {
        self.counters.max_variable_key_length
    }

    /// Sum of all variable-width tail lengths inserted so far.
    #[must_use]
    pub const fn cumulative_variable_key_length(&self) -> u64 {
        self.counters.cumulative_variable_key_length
    }

    #[must_use]
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage {
            control_bytes: self.control_blocks.iter().map(|block| block.size_in_bytes()).sum(),
            ..MemoryUsage::default()
        };
        for chunk in self.chunks.iter().flatten() {
            usage.fixed_bytes += chunk.fixed.size_in_bytes();
            usage.unused_fixed_bytes += chunk.fixed.unused_bytes();
            if let Some(variable) = &chunk.variable {
                usage.variable_bytes += variable.size_in_bytes();
                usage.unused_variable_bytes += variable.unused_bytes();
            }
        }
        usage
    }

    /// Total bytes held by the table.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.memory_usage().total()
    }

    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats {
            size: self.size(),
            capacity: self.capacity,
            batches: self.chunks.len(),
            gaps: self.gaps,
            rehash_count: self.counters.rehash_count,
            rehash_time: self.counters.rehash_time,
            splice_count: self.counters.splice_count,
            splice_time: self.counters.splice_time,
            spliced_freed_bytes: self.counters.spliced_freed_bytes,
            memory: self.memory_usage(),
        }
    }
}

//! Error types for the block hash table.
//!
//! Capacity exhaustion is the only fatal, non-retryable condition. Allocation
//! failures leave the table in its last consistent state and are surfaced so a
//! higher-level operator can decide whether to spill or give up. Internal
//! consistency violations are not represented here: they panic.

use crate::config::ConfigError;

/// Errors returned by hash table operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashTableError {
    /// No larger power-of-two capacity is available.
    MaxCapacityReached { capacity: usize },
    /// The allocator budget cannot satisfy a request.
    OutOfMemory {
        requested: usize,
        available: usize,
        limit: usize,
    },
    /// The accumulator store rejected a resize.
    Listener(String),
    /// The batch holds too few records to be split.
    SpliceNotPossible { batch_index: usize, records: usize },
    /// The batch index is out of range.
    InvalidBatchIndex { batch_index: usize, batches: usize },
    /// The ordinal does not refer to a live key.
    InvalidOrdinal { ordinal: u32 },
    /// The fixed-width part of a probe key is shorter than the layout requires.
    KeyTooShort { expected: usize, actual: usize },
    /// The table configuration is inconsistent.
    Config(ConfigError),
}

impl HashTableError {
    /// Whether the table can not continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MaxCapacityReached { .. })
    }

    /// Whether this error was caused by the memory budget.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

impl std::fmt::Display for HashTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxCapacityReached { capacity } => {
                write!(f, "hash table reached its maximum capacity of {capacity} slots")
            }
            Self::OutOfMemory {
                requested,
                available,
                limit,
            } => write!(
                f,
                "unable to allocate {requested} bytes ({available} of {limit} bytes available)"
            ),
            Self::Listener(msg) => write!(f, "resize listener failed: {msg}"),
            Self::SpliceNotPossible {
                batch_index,
                records,
            } => write!(
                f,
                "batch {batch_index} holds {records} records and can not be spliced"
            ),
            Self::InvalidBatchIndex {
                batch_index,
                batches,
            } => write!(f, "batch {batch_index} out of bounds (batches: {batches})"),
            Self::InvalidOrdinal { ordinal } => write!(f, "ordinal {ordinal} is not live"),
            Self::KeyTooShort { expected, actual } => {
                write!(f, "fixed key is {actual} bytes, expected at least {expected}")
            }
            Self::Config(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl std::error::Error for HashTableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for HashTableError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Failure of a vectorized call after some records completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Records fully processed before the failure.
    pub processed: usize,
    /// The error that aborted the batch.
    pub source: HashTableError,
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch aborted after {} records: {}",
            self.processed, self.source
        )
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = HashTableError> = std::result::Result<T, E>;

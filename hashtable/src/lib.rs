// Life of an insert:
// 1. The pivoting layer packs a row into fixed bytes plus a variable tail
// 2. The caller hashes the pivoted key and hands hash + key to the table
// 3. The table probes its control words:
//     - Match: return the existing ordinal
//     - Empty slot: grow if over the load factor, else find room in the
//       current batch (adding a batch through the resize listener if needed),
//       write the key and publish the control word
// 4. The caller indexes its accumulators with the returned ordinal
//
// System components:
//  - Budgeted allocator and raw blocks (control, fixed, variable)
//  - Hash table engine: probe/insert, growth, splice
//  - Listener traits keeping external accumulators in lockstep

pub mod config;
pub mod error;
pub mod hash;
pub mod layout;
pub mod listener;
pub mod memory;
pub mod nulls;
pub mod table;

#[cfg(test)]
mod simulation;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, HashTableConfig};
pub use error::{BatchError, HashTableError, Result};
pub use hash::{KeyHasher, XxKeyHasher};
pub use layout::{KeyRef, PivotLayout, PivotedKeys};
pub use listener::{NoopResizeListener, RecordMove, ResizeListener, SpaceCheckListener};
pub use memory::BufferAllocator;
pub use nulls::NullComparator;
pub use table::{
    BlockHashTable, InsertTrace, KeyIterator, MemoryUsage, ProbeResult, RecordOutcome,
    RecordTrace, TableSnapshot, TableStats, TraceLog, TraceSession,
};

//! Owned memory for table storage.
//!
//! All block memory is drawn from a shared, budgeted [`BufferAllocator`].
//! Blocks release their bytes when dropped, so every allocation is freed
//! exactly once whether a chunk is released individually or the whole table
//! is dropped.

mod allocator;
mod block;

pub use allocator::{Buffer, BufferAllocator};
pub use block::{
    CONTROL_WIDTH, ControlBlock, EMPTY_CONTROL_WORD, FixedBlock, LENGTH_PREFIX, RawBlock,
    VariableBlock,
};

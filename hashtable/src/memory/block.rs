//! Raw memory blocks and their three specializations.
//!
//! A [`RawBlock`] is a contiguous allocation with a capacity and a used
//! length. All reads and writes are bounds-checked little-endian accessors;
//! an out-of-range access is a bug in the caller and panics.
//!
//! - [`ControlBlock`]: array of 8-byte control words, one per hash slot
//! - [`FixedBlock`]: fixed-width key rows, written sequentially
//! - [`VariableBlock`]: length-prefixed variable-width key bytes, append-only

// Offsets inside a block are bounded by the block size, which the table keeps
// well below u32::MAX.
#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use crate::error::Result;
use crate::memory::allocator::{Buffer, BufferAllocator};

/// Size of a control word in bytes.
pub const CONTROL_WIDTH: usize = 8;

/// Size of the length prefix in front of every variable-width entry.
pub const LENGTH_PREFIX: usize = 4;

/// Control word value of an unoccupied slot.
pub const EMPTY_CONTROL_WORD: u64 = u64::MAX;

/// A contiguous allocation with a used length.
#[derive(Debug)]
pub struct RawBlock {
    buffer: Buffer,
    used: usize,
}

impl RawBlock {
    /// Allocate a block of `capacity` bytes, every byte set to `fill`.
    pub fn new(allocator: &Arc<BufferAllocator>, capacity: usize, fill: u8) -> Result<Self> {
        let buffer = if fill == 0 {
            allocator.allocate(capacity)?
        } else {
            allocator.allocate_filled(capacity, fill)?
        };
        Ok(Self { buffer, used: 0 })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    /// Move the used cursor. `used` must not exceed the capacity.
    pub fn set_used(&mut self, used: usize) {
        assert!(
            used <= self.capacity(),
            "used length {used} exceeds block capacity {}",
            self.capacity()
        );
        self.used = used;
    }

    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.buffer.as_bytes()[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.buffer.as_bytes_mut()[offset..offset + len]
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes_mut(offset, bytes.len()).copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.read_bytes(offset, 4));
        u32::from_le_bytes(word)
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.read_bytes(offset, 8));
        u64::from_le_bytes(word)
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn fill(&mut self, value: u8) {
        self.buffer.as_bytes_mut().fill(value);
    }

    const fn allocator(&self) -> &Arc<BufferAllocator> {
        self.buffer.allocator()
    }
}

/// Fixed-size array of control words.
#[derive(Debug)]
pub struct ControlBlock {
    raw: RawBlock,
}

impl ControlBlock {
    /// Allocate a block of `slots` empty slots.
    pub fn new(allocator: &Arc<BufferAllocator>, slots: usize) -> Result<Self> {
        // EMPTY_CONTROL_WORD is all ones, so a 0xFF fill empties every slot.
        let mut raw = RawBlock::new(allocator, slots * CONTROL_WIDTH, 0xFF)?;
        raw.set_used(raw.capacity());
        Ok(Self { raw })
    }

    #[must_use]
    pub fn slots(&self) -> usize {
        self.raw.capacity() / CONTROL_WIDTH
    }

    #[must_use]
    pub fn word(&self, slot: usize) -> u64 {
        self.raw.read_u64(slot * CONTROL_WIDTH)
    }

    pub fn set_word(&mut self, slot: usize, word: u64) {
        self.raw.write_u64(slot * CONTROL_WIDTH, word);
    }

    /// Mark every slot empty.
    pub fn clear(&mut self) {
        self.raw.fill(0xFF);
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.raw.capacity()
    }
}

/// Fixed-width key rows for one chunk.
///
/// Rows are appended in ordinal order. Row `i` lives at byte `i * width`.
#[derive(Debug)]
pub struct FixedBlock {
    raw: RawBlock,
    width: usize,
}

impl FixedBlock {
    /// Allocate room for `max_records` rows of `width` bytes.
    pub fn new(allocator: &Arc<BufferAllocator>, width: usize, max_records: usize) -> Result<Self> {
        assert!(width > 0, "fixed block width must be positive");
        let raw = RawBlock::new(allocator, width * max_records, 0)?;
        Ok(Self { raw, width })
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of rows written.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.raw.used() / self.width
    }

    #[must_use]
    pub fn max_records(&self) -> usize {
        self.raw.capacity() / self.width
    }

    #[must_use]
    pub fn row(&self, offset: usize) -> &[u8] {
        assert!(
            offset < self.records(),
            "row {offset} not written (records: {})",
            self.records()
        );
        self.raw.read_bytes(offset * self.width, self.width)
    }

    /// Append a row and return its offset.
    ///
    /// `data` fills the leading bytes of the row; when `variable_offset` is
    /// given it is stored in the trailing 4 bytes.
    pub fn append(&mut self, data: &[u8], variable_offset: Option<u32>) -> usize {
        let offset = self.records();
        assert!(
            offset < self.max_records(),
            "fixed block full ({} records)",
            self.max_records()
        );
        let start = offset * self.width;
        self.raw.write_bytes(start, data);
        if let Some(var_offset) = variable_offset {
            self.raw
                .write_u32(start + self.width - LENGTH_PREFIX, var_offset);
        }
        self.raw.set_used(start + self.width);
        offset
    }

    /// Read the variable-block offset stored at the end of a row.
    #[must_use]
    pub fn variable_offset(&self, offset: usize) -> u32 {
        self.raw
            .read_u32(offset * self.width + self.width - LENGTH_PREFIX)
    }

    /// Drop every row at or after `records`.
    pub fn truncate(&mut self, records: usize) {
        assert!(records <= self.records(), "can not truncate forward");
        self.raw.set_used(records * self.width);
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.raw.capacity()
    }

    #[must_use]
    pub fn unused_bytes(&self) -> usize {
        self.raw.remaining()
    }
}

/// Append-only store of length-prefixed variable-width keys for one chunk.
#[derive(Debug)]
pub struct VariableBlock {
    raw: RawBlock,
}

impl VariableBlock {
    pub fn new(allocator: &Arc<BufferAllocator>, capacity: usize) -> Result<Self> {
        Ok(Self {
            raw: RawBlock::new(allocator, capacity, 0)?,
        })
    }

    /// Bytes needed to store an entry of `len` bytes.
    #[must_use]
    pub const fn entry_size(len: usize) -> usize {
        LENGTH_PREFIX + len
    }

    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        Self::entry_size(len) <= self.raw.remaining()
    }

    /// Append an entry and return the offset of its length prefix.
    pub fn append(&mut self, bytes: &[u8]) -> u32 {
        assert!(
            self.fits(bytes.len()),
            "variable block overflow: {} bytes requested, {} remaining",
            Self::entry_size(bytes.len()),
            self.raw.remaining()
        );
        let offset = self.raw.used();
        self.raw.write_u32(offset, bytes.len() as u32);
        self.raw.write_bytes(offset + LENGTH_PREFIX, bytes);
        self.raw.set_used(offset + Self::entry_size(bytes.len()));
        offset as u32
    }

    /// The bytes of the entry whose length prefix starts at `offset`.
    #[must_use]
    pub fn entry(&self, offset: u32) -> &[u8] {
        let offset = offset as usize;
        let len = self.raw.read_u32(offset) as usize;
        self.raw.read_bytes(offset + LENGTH_PREFIX, len)
    }

    /// Rewind the write cursor, discarding every entry at or after `offset`.
    pub fn rewind(&mut self, offset: u32) {
        let offset = offset as usize;
        assert!(offset <= self.raw.used(), "can not rewind forward");
        self.raw.set_used(offset);
    }

    /// Reallocate so an entry of `len` bytes fits, at least doubling the capacity.
    ///
    /// On allocation failure the block is left untouched.
    pub fn grow_to_fit(&mut self, len: usize) -> Result<()> {
        let needed = self.raw.used() + Self::entry_size(len);
        if needed <= self.raw.capacity() {
            return Ok(());
        }
        let new_capacity = needed.max(self.raw.capacity() * 2);
        let mut grown = RawBlock::new(self.raw.allocator(), new_capacity, 0)?;
        let used = self.raw.used();
        grown.write_bytes(0, self.raw.read_bytes(0, used));
        grown.set_used(used);
        tracing::debug!(
            "variable block grown from {} to {new_capacity} bytes",
            self.raw.capacity()
        );
        self.raw = grown;
        Ok(())
    }

    #[must_use]
    pub const fn used(&self) -> usize {
        self.raw.used()
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.raw.capacity()
    }

    #[must_use]
    pub fn unused_bytes(&self) -> usize {
        self.raw.remaining()
    }
}

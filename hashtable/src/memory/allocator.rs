//! Budgeted buffer allocator for table storage.
//!
//! Every control, fixed and variable block is carved out of a [`Buffer`]
//! obtained here. The allocator only does accounting against a configured
//! limit; the bytes themselves come from the global allocator.
//!
//! # Invariants
//!
//! - `allocated() <= limit()` at all times
//! - A buffer's reservation is returned exactly once, when the buffer drops
//! - `peak()` is monotonically non-decreasing

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{HashTableError, Result};

/// Shared allocator with an upper limit on outstanding bytes.
///
/// Tables hold an `Arc` to it, so several tables may draw from one budget.
#[derive(Debug)]
pub struct BufferAllocator {
    /// Upper bound on outstanding bytes.
    limit: usize,
    /// Bytes currently handed out.
    allocated: AtomicUsize,
    /// High-water mark of `allocated`.
    peak: AtomicUsize,
}

impl BufferAllocator {
    /// Create an allocator that refuses requests beyond `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Arc<Self> {
        tracing::debug!("created buffer allocator (limit={limit})");
        Arc::new(Self {
            limit,
            allocated: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Create an allocator without an effective limit.
    #[must_use]
    pub fn unbounded() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    /// Allocate a zeroed buffer of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::OutOfMemory`] if the request would exceed the limit.
    /// Nothing is reserved in that case.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn allocate(self: &Arc<Self>, len: usize) -> Result<Buffer> {
        self.reserve(len)?;
        Ok(Buffer {
            data: vec![0u8; len].into_boxed_slice(),
            allocator: Arc::clone(self),
        })
    }

    /// Allocate a buffer of `len` bytes with every byte set to `fill`.
    pub fn allocate_filled(self: &Arc<Self>, len: usize, fill: u8) -> Result<Buffer> {
        let mut buffer = self.allocate(len)?;
        buffer.as_bytes_mut().fill(fill);
        Ok(buffer)
    }

    fn reserve(&self, len: usize) -> Result<()> {
        let reserved = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(len).filter(|&next| next <= self.limit)
            });
        match reserved {
            Ok(previous) => {
                self.peak.fetch_max(previous + len, Ordering::Relaxed);
                Ok(())
            }
            Err(used) => {
                let available = self.limit.saturating_sub(used);
                tracing::warn!(
                    "allocation of {len} bytes refused ({available} of {} bytes available)",
                    self.limit
                );
                Err(HashTableError::OutOfMemory {
                    requested: len,
                    available,
                    limit: self.limit,
                })
            }
        }
    }

    fn release(&self, len: usize) {
        let previous = self.allocated.fetch_sub(len, Ordering::Relaxed);
        assert!(
            previous >= len,
            "Buffer allocator underflow: releasing {len} bytes with {previous} outstanding"
        );
    }

    /// Bytes currently outstanding.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Highest number of bytes ever outstanding at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Configured limit in bytes.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes that can still be allocated.
    #[must_use]
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.allocated())
    }
}

/// An owned allocation. The reservation is returned to the allocator on drop.
pub struct Buffer {
    data: Box<[u8]>,
    allocator: Arc<BufferAllocator>,
}

impl Buffer {
    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The allocator this buffer was drawn from.
    #[must_use]
    pub const fn allocator(&self) -> &Arc<BufferAllocator> {
        &self.allocator
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.allocator.release(self.data.len());
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

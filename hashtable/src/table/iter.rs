//! Replay of stored keys in ordinal order.

use super::BlockHashTable;
use crate::hash::KeyHasher;
use crate::layout::KeyRef;

/// Iterator over every stored key, yielding ordinal 0 first.
///
/// Borrows the table, so no insert can interleave with iteration.
#[derive(Debug)]
pub struct KeyIterator<'a, H> {
    table: &'a BlockHashTable<H>,
    next: usize,
    end: usize,
}

impl<'a, H: KeyHasher> Iterator for KeyIterator<'a, H> {
    type Item = KeyRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.end {
            return None;
        }
        let key = self.table.stored_key(self.next);
        self.next += 1;
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl<H: KeyHasher> ExactSizeIterator for KeyIterator<'_, H> {}

impl<H: KeyHasher> BlockHashTable<H> {
    /// Iterate over every key in ordinal order.
    ///
    /// # Panics
    /// Panics unless the table is configured so that no gaps can occur and
    /// none have been created by a splice.
    #[must_use]
    pub fn key_iterator(&self) -> KeyIterator<'_, H> {
        assert_eq!(
            self.config.batch_size, self.max_values_per_batch,
            "key iteration requires a power-of-two batch size"
        );
        assert!(
            !self.config.enforce_var_width_buffer_limit,
            "key iteration is not supported with the variable width limit"
        );
        assert_eq!(self.gaps, 0, "key iteration requires a table without gaps");
        KeyIterator {
            table: self,
            next: 0,
            end: self.current_ordinal,
        }
    }
}

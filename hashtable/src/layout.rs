//! Pivoted key layout.
//!
//! The pivoting layer packs each key into a fixed-width row and, when the key
//! has variable-width components, a variable-width tail. The table treats both
//! as opaque bytes; only the widths below matter to it.
//!
//! Fixed row layout (`block_width` bytes):
//! - `data_width` bytes of pivoted fixed-width fields (validity bits first)
//! - 4-byte little-endian offset into the variable area, only when the layout
//!   has variable-width components
//!
//! Variable area: a 4-byte little-endian length prefix followed by the raw
//! bytes, one entry per row, appended in row order.

// Variable areas are bounded well below u32::MAX.
#![allow(clippy::cast_possible_truncation)]

use crate::memory::LENGTH_PREFIX;

/// Describes the shape of pivoted key rows. Supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PivotLayout {
    block_width: usize,
    variable_count: usize,
}

impl PivotLayout {
    /// Size of the trailing variable-offset field in a fixed row.
    pub const VARIABLE_OFFSET_SIZE: usize = 4;

    /// Layout for keys made only of fixed-width fields.
    ///
    /// # Panics
    /// Panics if `block_width` is 0.
    #[must_use]
    pub fn fixed(block_width: usize) -> Self {
        assert!(block_width > 0, "block width must be positive");
        Self {
            block_width,
            variable_count: 0,
        }
    }

    /// Layout for keys with `variable_count` variable-width components.
    ///
    /// `block_width` includes the trailing 4-byte variable offset.
    ///
    /// # Panics
    /// Panics if `variable_count` is 0 or the width has no room for the offset.
    #[must_use]
    pub fn variable(block_width: usize, variable_count: usize) -> Self {
        assert!(variable_count > 0, "variable layout needs a variable component");
        assert!(
            block_width >= Self::VARIABLE_OFFSET_SIZE,
            "block width {block_width} has no room for the variable offset"
        );
        Self {
            block_width,
            variable_count,
        }
    }

    /// Width of a stored fixed row.
    #[must_use]
    pub const fn block_width(&self) -> usize {
        self.block_width
    }

    /// Width of the pivoted fixed-width key data (excludes the offset field).
    #[must_use]
    pub const fn data_width(&self) -> usize {
        if self.is_fixed_only() {
            self.block_width
        } else {
            self.block_width - Self::VARIABLE_OFFSET_SIZE
        }
    }

    #[must_use]
    pub const fn variable_count(&self) -> usize {
        self.variable_count
    }

    #[must_use]
    pub const fn is_fixed_only(&self) -> bool {
        self.variable_count == 0
    }
}

/// A borrowed probe key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRef<'a> {
    /// Pivoted fixed-width bytes; at least `data_width` long.
    pub fixed: &'a [u8],
    /// Variable-width tail; empty for fixed-only layouts.
    pub variable: &'a [u8],
}

impl<'a> KeyRef<'a> {
    #[must_use]
    pub const fn new(fixed: &'a [u8], variable: &'a [u8]) -> Self {
        Self { fixed, variable }
    }

    /// A key without a variable-width tail.
    #[must_use]
    pub const fn fixed(fixed: &'a [u8]) -> Self {
        Self {
            fixed,
            variable: &[],
        }
    }
}

/// An owned buffer of pivoted keys.
///
/// Used to feed vectorized calls and as the destination when stored keys are
/// re-materialized.
#[derive(Debug, Clone)]
pub struct PivotedKeys {
    layout: PivotLayout,
    fixed: Vec<u8>,
    variable: Vec<u8>,
    count: usize,
}

impl PivotedKeys {
    #[must_use]
    pub const fn new(layout: PivotLayout) -> Self {
        Self {
            layout,
            fixed: Vec::new(),
            variable: Vec::new(),
            count: 0,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> PivotLayout {
        self.layout
    }

    /// Append a key. `data` must be exactly `data_width` bytes.
    ///
    /// # Panics
    /// Panics if `data` has the wrong width, or a fixed-only layout is given a
    /// variable tail.
    pub fn push(&mut self, data: &[u8], variable: &[u8]) {
        assert_eq!(
            data.len(),
            self.layout.data_width(),
            "pivoted key data has the wrong width"
        );
        self.fixed.extend_from_slice(data);
        if self.layout.is_fixed_only() {
            assert!(variable.is_empty(), "fixed-only layout given variable bytes");
        } else {
            let offset = self.variable.len() as u32;
            self.fixed.extend_from_slice(&offset.to_le_bytes());
            self.variable
                .extend_from_slice(&(variable.len() as u32).to_le_bytes());
            self.variable.extend_from_slice(variable);
        }
        self.count += 1;
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.fixed.clear();
        self.variable.clear();
        self.count = 0;
    }

    /// The full fixed row (including the offset field) of key `index`.
    #[must_use]
    pub fn row(&self, index: usize) -> &[u8] {
        let width = self.layout.block_width();
        &self.fixed[index * width..(index + 1) * width]
    }

    /// Key `index` as a probe key.
    #[must_use]
    pub fn key(&self, index: usize) -> KeyRef<'_> {
        let row = self.row(index);
        let data_width = self.layout.data_width();
        if self.layout.is_fixed_only() {
            return KeyRef::fixed(row);
        }
        let mut offset = [0u8; 4];
        offset.copy_from_slice(&row[data_width..data_width + PivotLayout::VARIABLE_OFFSET_SIZE]);
        let offset = u32::from_le_bytes(offset) as usize;
        let mut len = [0u8; 4];
        len.copy_from_slice(&self.variable[offset..offset + LENGTH_PREFIX]);
        let len = u32::from_le_bytes(len) as usize;
        let start = offset + LENGTH_PREFIX;
        KeyRef::new(&row[..data_width], &self.variable[start..start + len])
    }

    /// Every key, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<KeyRef<'_>> {
        (0..self.count).map(|index| self.key(index)).collect()
    }

    /// The fixed rows, `block_width` bytes each.
    #[must_use]
    pub fn fixed_bytes(&self) -> &[u8] {
        &self.fixed
    }

    /// The length-prefixed variable area.
    #[must_use]
    pub fn variable_bytes(&self) -> &[u8] {
        &self.variable
    }
}

//! Null comparability policy.
//!
//! Pivoted rows begin with validity bits (1 = value present). Some operators
//! must treat keys with a null in certain positions as never matching anything,
//! the way SQL equality treats nulls. A [`NullComparator`] names the validity
//! bits that must all be set for a key to be comparable; `find` skips keys
//! that fail the check without probing.
//!
//! The mode is picked from the highest required bit so the common cases read a
//! single 4- or 8-byte word.

// Bit positions are bounded by the row width.
#![allow(clippy::cast_possible_truncation)]

/// Decides whether a key's null bit-pattern makes it comparable at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NullComparator {
    /// Every key is comparable.
    #[default]
    None,
    /// All required bits live in the first 4 bytes.
    Four { mask: u32 },
    /// All required bits live in the first 8 bytes.
    Eight { mask: u64 },
    /// Required bits span several 8-byte words: `(byte offset, mask)` pairs.
    Bitset { words: Vec<(usize, u64)> },
}

impl NullComparator {
    /// Build a comparator requiring every listed validity bit to be set.
    #[must_use]
    pub fn from_required_bits(bits: &[usize]) -> Self {
        let Some(&highest) = bits.iter().max() else {
            return Self::None;
        };
        if highest < 32 {
            let mask = bits.iter().fold(0u32, |mask, &bit| mask | (1 << bit));
            return Self::Four { mask };
        }
        if highest < 64 {
            let mask = bits.iter().fold(0u64, |mask, &bit| mask | (1 << bit));
            return Self::Eight { mask };
        }

        let mut words: Vec<(usize, u64)> = Vec::new();
        for &bit in bits {
            let offset = (bit / 64) * 8;
            let bit_mask = 1u64 << (bit % 64);
            match words.iter_mut().find(|(o, _)| *o == offset) {
                Some((_, mask)) => *mask |= bit_mask,
                None => words.push((offset, bit_mask)),
            }
        }
        words.sort_unstable_by_key(|&(offset, _)| offset);
        Self::Bitset { words }
    }

    /// Whether the key with these fixed bytes can match any other key.
    #[must_use]
    pub fn is_comparable(&self, fixed: &[u8]) -> bool {
        match self {
            Self::None => true,
            Self::Four { mask } => (read_word(fixed, 0, 4) as u32 & mask) == *mask,
            Self::Eight { mask } => (read_word(fixed, 0, 8) & mask) == *mask,
            Self::Bitset { words } => words
                .iter()
                .all(|&(offset, mask)| (read_word(fixed, offset, 8) & mask) == mask),
        }
    }

    /// Number of leading fixed bytes the comparator inspects.
    #[must_use]
    pub fn bytes_required(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Four { mask } => (32 - mask.leading_zeros() as usize).div_ceil(8),
            Self::Eight { mask } => (64 - mask.leading_zeros() as usize).div_ceil(8),
            Self::Bitset { words } => words.last().map_or(0, |&(offset, mask)| {
                offset + (64 - mask.leading_zeros() as usize).div_ceil(8)
            }),
        }
    }
}

/// Read a little-endian word of `width` bytes, zero-padding past the end of `bytes`.
fn read_word(bytes: &[u8], offset: usize, width: usize) -> u64 {
    let mut word = [0u8; 8];
    let end = bytes.len().min(offset + width);
    if offset < end {
        word[..end - offset].copy_from_slice(&bytes[offset..end]);
    }
    u64::from_le_bytes(word)
}

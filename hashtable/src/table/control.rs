//! Control word encoding.
//!
//! A control word packs the ordinal of the slot's occupant in the high 32 bits
//! and a 32-bit hash fragment in the low 32 bits. The fragment is the low half
//! of the caller's 64-bit hash; it both picks the home slot and filters
//! candidates before the key bytes are compared.

// Fragments are the deliberately truncated low half of the hash.
#![allow(clippy::cast_possible_truncation)]

use crate::memory::EMPTY_CONTROL_WORD;

/// Pack an ordinal and a hash fragment.
pub const fn pack(ordinal: u32, fragment: u32) -> u64 {
    ((ordinal as u64) << 32) | fragment as u64
}

pub const fn ordinal(word: u64) -> u32 {
    (word >> 32) as u32
}

pub const fn fragment(word: u64) -> u32 {
    word as u32
}

/// The fragment of a 64-bit hash.
pub const fn fragment_of(hash: u64) -> u32 {
    hash as u32
}

pub const fn is_empty(word: u64) -> bool {
    word == EMPTY_CONTROL_WORD
}

/// Home slot of `fragment` in a table of `capacity` slots (a power of two).
pub const fn home_slot(fragment: u32, capacity: usize) -> usize {
    fragment as usize & (capacity - 1)
}

/// The slot probed after `slot`. Probing walks backwards and wraps.
pub const fn next_slot(slot: usize, capacity: usize) -> usize {
    slot.wrapping_sub(1) & (capacity - 1)
}

//! Key hashing.
//!
//! Callers normally hash pivoted rows themselves and hand the 64-bit hash to
//! the table. The table only hashes on its own when it relocates rows during a
//! splice, and must then reproduce exactly what the caller computed; both
//! sides therefore share a [`KeyHasher`] and a seed.

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::layout::KeyRef;

/// 64-bit mixing hash over pivoted key bytes.
pub trait KeyHasher {
    /// Hash the fixed-width bytes of a key without variable components.
    fn hash_fixed(&self, fixed: &[u8], seed: u64) -> u64;

    /// Hash a key with both fixed-width and variable-width bytes.
    fn hash_variable(&self, fixed: &[u8], variable: &[u8], seed: u64) -> u64;

    /// Hash `key` the way the table does for a layout with the given data width.
    fn hash_key(&self, key: KeyRef<'_>, data_width: usize, fixed_only: bool, seed: u64) -> u64 {
        let fixed = &key.fixed[..data_width];
        if fixed_only {
            self.hash_fixed(fixed, seed)
        } else {
            self.hash_variable(fixed, key.variable, seed)
        }
    }
}

/// Default hasher built on xxHash64.
#[derive(Debug, Clone, Copy, Default)]
pub struct XxKeyHasher;

impl KeyHasher for XxKeyHasher {
    fn hash_fixed(&self, fixed: &[u8], seed: u64) -> u64 {
        XxHash64::oneshot(seed, fixed)
    }

    fn hash_variable(&self, fixed: &[u8], variable: &[u8], seed: u64) -> u64 {
        let mut hasher = XxHash64::with_seed(seed);
        hasher.write(fixed);
        hasher.write(variable);
        hasher.finish()
    }
}

//! Key hashing and key display canonicalization.
//!
//! All table engines share one hash function: XXH3-64 with a per-store
//! seed. The seed is drawn once at [`Store::open`](crate::store::Store::open)
//! (unless pinned via configuration), captured by every engine the store
//! creates, and persisted inside snapshots so a restored table reproduces
//! the exact same slot layout.
//!
//! Keys compare by full byte equality. The cached 64-bit hash carried in
//! each entry is an optimization for bucket scans and probe walks — it is
//! never a surrogate for equality.

use std::fmt;

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Hash a key with the given per-store seed.
#[inline]
pub fn hash_key(seed: u64, key: &[u8]) -> u64 {
    xxh3_64_with_seed(key, seed)
}

/// Draw a fresh random hash seed.
///
/// Used at store creation when [`StoreConfig::hash_seed`]
/// (crate::store::StoreConfig::hash_seed) is `None`.
pub fn random_seed() -> u64 {
    rand::random()
}

/// Hex rendering of a key for logs and probe traces.
///
/// Long keys are truncated to their first 16 bytes with a length marker,
/// keeping trace lines bounded regardless of key size.
pub struct HexKey<'a>(pub &'a [u8]);

impl fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{byte:02x}")?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{byte:02x}")?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}

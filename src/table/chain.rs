//! Separate-chaining table engine.
//!
//! A bucket vector of length `B` (always a power of two); each bucket owns
//! an ordered sequence of entries. An entry lives in bucket
//! `hash & (B - 1)`; insertion order within a bucket is preserved, order
//! across buckets is undefined.
//!
//! ## Invariants
//!
//! - No duplicate keys within a bucket (hence the table).
//! - `len` equals the sum of bucket lengths.
//! - After every mutator, `len / B <= load_high`; crossing the ceiling
//!   doubles `B` and re-buckets every entry atomically with respect to the
//!   caller.
//! - The table never shrinks: deletes keep bucket storage stable at the
//!   cost of memory.

use tracing::{debug, trace};

use crate::hash::{HexKey, hash_key};
use crate::metrics::ProbeHistogram;

use super::{Entry, PutResult, TableError};

/// Separate-chaining hash table over byte keys.
#[derive(Debug)]
pub struct ChainTable {
    /// Bucket vector; length is always a power of two.
    buckets: Vec<Vec<Entry>>,

    /// Live entry count.
    len: usize,

    /// Hash seed captured at creation, persisted in snapshots.
    seed: u64,

    /// Growth trigger: resize when `len / B` would exceed this.
    load_high: f64,

    /// Resizes performed by this instance.
    resizes: u64,

    /// Per-operation probe lengths (entries compared per bucket scan).
    probes: ProbeHistogram,
}

impl ChainTable {
    /// Create an empty table with `capacity` buckets.
    ///
    /// `capacity` must be a nonzero power of two.
    pub fn new(capacity: usize, seed: u64, load_high: f64) -> Result<Self, TableError> {
        debug_assert!(capacity.is_power_of_two());

        let mut buckets: Vec<Vec<Entry>> = Vec::new();
        buckets
            .try_reserve_exact(capacity)
            .map_err(|_| TableError::OutOfMemory(capacity))?;
        buckets.resize_with(capacity, Vec::new);

        Ok(Self {
            buckets,
            len: 0,
            seed,
            load_high,
            resizes: 0,
            probes: ProbeHistogram::new(),
        })
    }

    #[inline]
    fn bucket_index(&self, hash: u64) -> usize {
        (hash & (self.buckets.len() as u64 - 1)) as usize
    }

    /// Insert or replace a key.
    ///
    /// Replacement happens in place; insertion appends to the bucket after
    /// growing the table if the new entry would cross `load_high`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<PutResult, TableError> {
        let hash = hash_key(self.seed, &key);
        let idx = self.bucket_index(hash);

        let mut scanned = 0usize;
        for entry in &mut self.buckets[idx] {
            scanned += 1;
            if entry.hash == hash && entry.key == key {
                self.probes.record(scanned as f64);
                let old = std::mem::replace(&mut entry.value, value);
                trace!(bucket = idx, key = %HexKey(&key), "chain put replaced");
                return Ok(PutResult::Replaced(old));
            }
        }
        self.probes.record(scanned as f64);

        if (self.len + 1) as f64 / self.buckets.len() as f64 > self.load_high {
            self.grow()?;
        }

        let idx = self.bucket_index(hash);
        self.buckets[idx].push(Entry { key, value, hash });
        self.len += 1;
        Ok(PutResult::Inserted)
    }

    /// Look up a key, recording the bucket scan length.
    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        let hash = hash_key(self.seed, key);
        let idx = self.bucket_index(hash);

        let mut scanned = 0usize;
        let mut found = None;
        for (i, entry) in self.buckets[idx].iter().enumerate() {
            scanned += 1;
            if entry.hash == hash && entry.key.as_slice() == key {
                found = Some(i);
                break;
            }
        }
        self.probes.record(scanned as f64);

        found.map(|i| self.buckets[idx][i].value.as_slice())
    }

    /// Look up a key without recording statistics.
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        let hash = hash_key(self.seed, key);
        self.buckets[self.bucket_index(hash)]
            .iter()
            .find(|entry| entry.hash == hash && entry.key.as_slice() == key)
            .map(|entry| entry.value.as_slice())
    }

    /// Remove a key, compacting its bucket.
    pub fn delete(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let hash = hash_key(self.seed, key);
        let idx = self.bucket_index(hash);

        let pos = self.buckets[idx]
            .iter()
            .position(|entry| entry.hash == hash && entry.key.as_slice() == key);
        let scanned = pos.map_or(self.buckets[idx].len(), |p| p + 1);
        self.probes.record(scanned as f64);

        pos.map(|p| {
            self.len -= 1;
            trace!(bucket = idx, key = %HexKey(key), "chain delete");
            self.buckets[idx].remove(p).value
        })
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bucket count.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// The hash seed this table was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Lazy iteration in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.buckets
            .iter()
            .flatten()
            .map(|entry| (entry.key.as_slice(), entry.value.as_slice()))
    }

    /// Ensure `n` live entries fit without crossing `load_high`.
    pub fn reserve(&mut self, n: usize) -> Result<(), TableError> {
        let mut target = self.buckets.len();
        while n as f64 / target as f64 > self.load_high {
            target *= 2;
        }
        if target > self.buckets.len() {
            self.rehash_into(target)?;
        }
        Ok(())
    }

    /// Longest bucket — the worst-case scan length.
    pub fn max_probe(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Resizes performed by this instance.
    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    /// The per-instance probe-length histogram.
    pub fn probes(&self) -> &ProbeHistogram {
        &self.probes
    }

    fn grow(&mut self) -> Result<(), TableError> {
        let target = self.buckets.len() * 2;
        self.rehash_into(target)
    }

    /// Re-bucket every entry into a fresh vector of `target` buckets.
    ///
    /// The new vector is fully allocated before any entry moves, so an
    /// allocation failure leaves the table untouched.
    fn rehash_into(&mut self, target: usize) -> Result<(), TableError> {
        debug_assert!(target.is_power_of_two());

        let mut fresh: Vec<Vec<Entry>> = Vec::new();
        fresh
            .try_reserve_exact(target)
            .map_err(|_| TableError::OutOfMemory(target))?;
        fresh.resize_with(target, Vec::new);

        let mask = target as u64 - 1;
        for bucket in &mut self.buckets {
            for entry in bucket.drain(..) {
                fresh[(entry.hash & mask) as usize].push(entry);
            }
        }
        self.buckets = fresh;
        self.resizes += 1;
        debug!(capacity = target, len = self.len, "chain table resized");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Migration plumbing
    // --------------------------------------------------------------------------------------------

    /// Take the whole bucket at `idx`.
    pub(crate) fn drain_bucket(&mut self, idx: usize) -> Vec<Entry> {
        let taken = std::mem::take(&mut self.buckets[idx]);
        self.len -= taken.len();
        taken
    }

    /// Remove a key without touching statistics.
    pub(crate) fn evict(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let hash = hash_key(self.seed, key);
        let idx = self.bucket_index(hash);
        let pos = self.buckets[idx]
            .iter()
            .position(|entry| entry.hash == hash && entry.key.as_slice() == key)?;
        self.len -= 1;
        Some(self.buckets[idx].remove(pos).value)
    }

    /// Borrow the bucket a hash maps to, with its index.
    pub(crate) fn bucket_for(&self, hash: u64) -> (usize, &[Entry]) {
        let idx = self.bucket_index(hash);
        (idx, &self.buckets[idx])
    }

    /// Insert an entry with a pre-computed hash; the key must be absent.
    pub(crate) fn insert_entry(&mut self, entry: Entry) -> Result<(), TableError> {
        if (self.len + 1) as f64 / self.buckets.len() as f64 > self.load_high {
            self.grow()?;
        }
        let idx = self.bucket_index(entry.hash);
        if self.buckets[idx]
            .iter()
            .any(|e| e.hash == entry.hash && e.key == entry.key)
        {
            return Err(TableError::Invariant(format!(
                "duplicate key {} during entry transfer",
                HexKey(&entry.key)
            )));
        }
        self.buckets[idx].push(entry);
        self.len += 1;
        Ok(())
    }
}

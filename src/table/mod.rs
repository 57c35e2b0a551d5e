//! Table engines and their shared entry model.
//!
//! Two concrete engines back the store:
//!
//! - [`chain::ChainTable`] — separate chaining: a bucket vector of ordered
//!   entry lists. Cheap inserts, pointer-stable buckets, no tombstones.
//! - [`robinhood::RobinHoodTable`] — open addressing with Robin Hood
//!   displacement balancing, tombstoned deletes, and threshold-driven
//!   compaction. Short, cache-friendly probe walks for read-heavy loads.
//!
//! Both engines share [`Entry`] (key, value, cached hash), the same seeded
//! hash function, and the same load ceiling semantics, which is what makes
//! entries portable between them during a migration: a cached hash computed
//! under one engine is valid in the other.
//!
//! [`Engine`] is the tagged union the supervisor dispatches through. Each
//! operation resolves statically per variant; there is no trait object in
//! the hot path.
//!
//! ## Concurrency model
//!
//! Single writer, enforced by the type system: every mutator takes
//! `&mut self`. Lookups also take `&mut self` because they feed the
//! probe-length histogram. Borrowed read-only views for the tracer and the
//! snapshot dumper go through [`Engine::peek`], [`Engine::iter`], and the
//! `pub(crate)` slot/bucket accessors, all `&self`.

pub mod chain;
pub mod robinhood;


pub use chain::ChainTable;
pub use robinhood::{RobinHoodTable, Slot};

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by table engine mutators.
#[derive(Debug, Error)]
pub enum TableError {
    /// Allocation failed while growing or rebuilding; the table remains in
    /// its pre-call state.
    #[error("out of memory: failed to reserve {0} table slots")]
    OutOfMemory(usize),

    /// An internal invariant check failed. Never expected; the supervisor
    /// poisons the store when it sees this.
    #[error("table invariant violated: {0}")]
    Invariant(String),
}

// ------------------------------------------------------------------------------------------------
// Shared types
// ------------------------------------------------------------------------------------------------

/// A stored key-value pair with its cached hash.
///
/// The hash is computed once at insert time with the table's seed and
/// reused for every bucket index / probe walk afterwards. It is an
/// optimization only — equality is always full byte comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key bytes.
    pub key: Vec<u8>,

    /// The value bytes. Never inspected by the engines.
    pub value: Vec<u8>,

    /// Cached `hash_key(seed, key)`.
    pub hash: u64,
}

/// Outcome of a `put`.
#[derive(Debug, PartialEq, Eq)]
pub enum PutResult {
    /// The key was not present; a new entry was created.
    Inserted,

    /// The key was present; its value was replaced in place and the old
    /// value is returned.
    Replaced(Vec<u8>),
}

/// Identifies which engine family a table belongs to.
///
/// Also the engine tag persisted in snapshots and reported in metrics
/// ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Separate chaining.
    Chaining,

    /// Open-addressed Robin Hood.
    RobinHood,
}

impl EngineKind {
    /// Stable lowercase name for logs and externally serialized ticks.
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Chaining => "chaining",
            EngineKind::RobinHood => "robinhood",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine — tagged union with static dispatch
// ------------------------------------------------------------------------------------------------

/// A concrete table engine.
///
/// The supervisor owns one (two while a migration is in flight) and
/// dispatches every operation through this enum.
#[derive(Debug)]
pub enum Engine {
    /// Separate chaining engine.
    Chaining(ChainTable),

    /// Robin Hood open-addressing engine.
    RobinHood(RobinHoodTable),
}

impl Engine {
    /// Create an empty engine of the given kind.
    ///
    /// `capacity` must be a power of two (the supervisor rounds config
    /// values up before calling).
    pub fn new(
        kind: EngineKind,
        capacity: usize,
        seed: u64,
        load_high: f64,
        tombstone_ratio: f64,
    ) -> Result<Self, TableError> {
        match kind {
            EngineKind::Chaining => Ok(Engine::Chaining(ChainTable::new(
                capacity, seed, load_high,
            )?)),
            EngineKind::RobinHood => Ok(Engine::RobinHood(RobinHoodTable::new(
                capacity,
                seed,
                load_high,
                tombstone_ratio,
            )?)),
        }
    }

    /// Which engine family this is.
    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Chaining(_) => EngineKind::Chaining,
            Engine::RobinHood(_) => EngineKind::RobinHood,
        }
    }

    /// Insert or replace a key.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<PutResult, TableError> {
        match self {
            Engine::Chaining(t) => t.put(key, value),
            Engine::RobinHood(t) => t.put(key, value),
        }
    }

    /// Look up a key. Updates the probe-length histogram.
    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        match self {
            Engine::Chaining(t) => t.get(key),
            Engine::RobinHood(t) => t.get(key),
        }
    }

    /// Look up a key without touching any statistics.
    ///
    /// Used by the tracer and by read-only diagnostics; regular reads go
    /// through [`Engine::get`].
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        match self {
            Engine::Chaining(t) => t.peek(key),
            Engine::RobinHood(t) => t.peek(key),
        }
    }

    /// Remove a key, returning its value.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TableError> {
        match self {
            Engine::Chaining(t) => Ok(t.delete(key)),
            Engine::RobinHood(t) => t.delete(key),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        match self {
            Engine::Chaining(t) => t.len(),
            Engine::RobinHood(t) => t.len(),
        }
    }

    /// True when no live entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket count (chaining) or slot count (Robin Hood).
    pub fn capacity(&self) -> usize {
        match self {
            Engine::Chaining(t) => t.capacity(),
            Engine::RobinHood(t) => t.capacity(),
        }
    }

    /// The hash seed this engine was created with.
    pub fn seed(&self) -> u64 {
        match self {
            Engine::Chaining(t) => t.seed(),
            Engine::RobinHood(t) => t.seed(),
        }
    }

    /// Lazy iteration over live `(key, value)` pairs.
    ///
    /// Order is bucket order / slot order and is not stable across grows,
    /// compactions, or migrations.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
        match self {
            Engine::Chaining(t) => Box::new(t.iter()),
            Engine::RobinHood(t) => Box::new(t.iter()),
        }
    }

    /// Pre-size the engine for `n` live entries.
    pub fn reserve(&mut self, n: usize) -> Result<(), TableError> {
        match self {
            Engine::Chaining(t) => t.reserve(n),
            Engine::RobinHood(t) => t.reserve(n),
        }
    }

    /// Live load factor including tombstones, `(len + tombstones) / capacity`.
    pub fn load_factor(&self) -> f64 {
        (self.len() + self.tombstones()) as f64 / self.capacity() as f64
    }

    /// Tombstone count (always 0 for chaining).
    pub fn tombstones(&self) -> usize {
        match self {
            Engine::Chaining(_) => 0,
            Engine::RobinHood(t) => t.tombstones(),
        }
    }

    /// `tombstones / capacity` (always 0.0 for chaining).
    pub fn tombstone_ratio(&self) -> f64 {
        match self {
            Engine::Chaining(_) => 0.0,
            Engine::RobinHood(t) => t.tombstone_ratio(),
        }
    }

    /// Worst-case probe cost: longest bucket (chaining) or maximum probe
    /// distance over occupied slots (Robin Hood).
    pub fn max_probe(&self) -> usize {
        match self {
            Engine::Chaining(t) => t.max_probe(),
            Engine::RobinHood(t) => t.max_probe(),
        }
    }

    /// Reclaim tombstones by rebuilding in place (no-op for chaining).
    pub fn compact(&mut self) -> Result<(), TableError> {
        match self {
            Engine::Chaining(_) => Ok(()),
            Engine::RobinHood(t) => t.compact(),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Migration plumbing (supervisor only)
    // --------------------------------------------------------------------------------------------

    /// Take every entry stored at bucket/slot `idx`, leaving probe chains
    /// intact on the source side (Robin Hood slots become tombstones).
    pub(crate) fn drain_index(&mut self, idx: usize) -> Vec<Entry> {
        match self {
            Engine::Chaining(t) => t.drain_bucket(idx),
            Engine::RobinHood(t) => t.drain_slot(idx).into_iter().collect(),
        }
    }

    /// Guarantee room for `extra` more entries, performing any fallible
    /// allocation now so subsequent [`Engine::insert_entry`] calls cannot
    /// fail on memory.
    pub(crate) fn prepare_for(&mut self, extra: usize) -> Result<(), TableError> {
        match self {
            Engine::Chaining(t) => {
                let need = t.len() + extra;
                t.reserve(need)
            }
            Engine::RobinHood(t) => t.make_room(extra),
        }
    }

    /// Remove a key on behalf of a migration write, bypassing statistics
    /// and compaction triggers.
    pub(crate) fn evict(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        match self {
            Engine::Chaining(t) => t.evict(key),
            Engine::RobinHood(t) => t.evict(key),
        }
    }

    /// Insert an entry carried over from the other engine, reusing its
    /// cached hash. The key must not already be present.
    pub(crate) fn insert_entry(&mut self, entry: Entry) -> Result<(), TableError> {
        match self {
            Engine::Chaining(t) => t.insert_entry(entry),
            Engine::RobinHood(t) => t.insert_entry(entry),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Engine-local statistics (folded into ticks by the supervisor)
    // --------------------------------------------------------------------------------------------

    /// Resize operations performed by this engine instance.
    pub(crate) fn resizes(&self) -> u64 {
        match self {
            Engine::Chaining(t) => t.resizes(),
            Engine::RobinHood(t) => t.resizes(),
        }
    }

    /// Compactions performed by this engine instance (0 for chaining).
    pub(crate) fn compactions(&self) -> u64 {
        match self {
            Engine::Chaining(_) => 0,
            Engine::RobinHood(t) => t.compactions(),
        }
    }

    /// The engine-local probe-length histogram.
    pub(crate) fn probes(&self) -> &crate::metrics::ProbeHistogram {
        match self {
            Engine::Chaining(t) => t.probes(),
            Engine::RobinHood(t) => t.probes(),
        }
    }
}

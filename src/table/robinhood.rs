//! Open-addressed Robin Hood table engine.
//!
//! A slot vector of length `C` (always a power of two). Each slot is
//! [`Slot::Empty`], [`Slot::Occupied`], or [`Slot::Tombstone`]. An entry's
//! ideal slot is `hash & (C - 1)`; its probe distance is the number of
//! slots between the ideal slot and where it actually sits, modulo `C`.
//! Probe distances are recomputed from the cached hash rather than stored,
//! keeping the slot union small.
//!
//! ## Probe algorithm
//!
//! - **Insert** walks forward from the ideal slot. A probing entry that is
//!   poorer (greater current distance) than an occupant displaces it and
//!   the occupant continues probing — the Robin Hood rule. The first
//!   tombstone seen on the walk is remembered; once the key is known to be
//!   absent, the new entry reclaims that tombstone instead of extending
//!   the chain.
//! - **Lookup** stops at the first empty slot, skips tombstones, and
//!   gives up early once an occupant is richer than the probe (no entry
//!   with a greater distance can appear later).
//! - **Delete** replaces the slot with a tombstone and never shifts —
//!   tombstones preserve probe-chain continuity.
//!
//! ## Tombstone hygiene
//!
//! Every mutator checks `tombstones / C` against the configured ratio and
//! compacts immediately when the threshold is reached — the check lives in
//! the mutator path, not only on supervisor ticks, so interleaved
//! inserts and deletes cannot outrun it. Compaction rebuilds the slot
//! vector, reinserting live entries in increasing original probe distance
//! order to minimize final displacements.
//!
//! Growth doubles `C` when the load including tombstones would cross
//! `load_high`; grown tables start tombstone-free.

use tracing::{debug, trace};

use crate::hash::{HexKey, hash_key};
use crate::metrics::ProbeHistogram;

use super::{Entry, PutResult, TableError};

/// One open-addressing slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Never written, or reclaimed by a rebuild. Terminates lookups.
    Empty,

    /// Holds a live entry.
    Occupied(Entry),

    /// A deleted entry. Traversable but never matching.
    Tombstone,
}

/// Probe distance of a hash placed at `idx` in a table of `capacity` slots.
#[inline]
fn probe_distance(idx: usize, hash: u64, capacity: usize) -> usize {
    let ideal = (hash as usize) & (capacity - 1);
    (idx + capacity - ideal) & (capacity - 1)
}

/// Open-addressed Robin Hood hash table over byte keys.
#[derive(Debug)]
pub struct RobinHoodTable {
    /// Slot vector; length is always a power of two.
    slots: Vec<Slot>,

    /// Live entry count (tombstones excluded).
    len: usize,

    /// Tombstoned slot count.
    tombstones: usize,

    /// Hash seed captured at creation, persisted in snapshots.
    seed: u64,

    /// Growth trigger: `(len + tombstones) / C` must stay at or under this.
    load_high: f64,

    /// Compaction trigger: rebuild once `tombstones / C` reaches this.
    tombstone_ratio_threshold: f64,

    /// Resizes performed by this instance.
    resizes: u64,

    /// Compactions performed by this instance.
    compactions: u64,

    /// Per-operation probe lengths (slots visited per walk).
    probes: ProbeHistogram,
}

impl RobinHoodTable {
    /// Create an empty table with `capacity` slots.
    ///
    /// `capacity` must be a nonzero power of two.
    pub fn new(
        capacity: usize,
        seed: u64,
        load_high: f64,
        tombstone_ratio_threshold: f64,
    ) -> Result<Self, TableError> {
        debug_assert!(capacity.is_power_of_two());

        let mut slots: Vec<Slot> = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| TableError::OutOfMemory(capacity))?;
        slots.resize_with(capacity, || Slot::Empty);

        Ok(Self {
            slots,
            len: 0,
            tombstones: 0,
            seed,
            load_high,
            tombstone_ratio_threshold,
            resizes: 0,
            compactions: 0,
            probes: ProbeHistogram::new(),
        })
    }

    /// Insert or replace a key.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<PutResult, TableError> {
        self.ensure_room()?;
        let hash = hash_key(self.seed, &key);
        trace!(key = %HexKey(&key), "robinhood put");
        let result = self.insert_hashed(Entry { key, value, hash }, true)?;
        self.maybe_compact_after_mutation()?;
        Ok(result)
    }

    /// Look up a key, recording the probe walk length.
    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        let (found, steps) = self.locate(key);
        self.probes.record(steps as f64);
        match found {
            Some(idx) => match &self.slots[idx] {
                Slot::Occupied(entry) => Some(entry.value.as_slice()),
                _ => None,
            },
            None => None,
        }
    }

    /// Look up a key without recording statistics.
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        match self.locate(key).0 {
            Some(idx) => match &self.slots[idx] {
                Slot::Occupied(entry) => Some(entry.value.as_slice()),
                _ => None,
            },
            None => None,
        }
    }

    /// Remove a key by tombstoning its slot.
    ///
    /// May trigger an in-place compaction when the tombstone ratio crosses
    /// its threshold, which is why deletion is fallible.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TableError> {
        let (found, steps) = self.locate(key);
        self.probes.record(steps as f64);

        let mut old = None;
        if let Some(idx) = found
            && let Slot::Occupied(entry) = std::mem::replace(&mut self.slots[idx], Slot::Tombstone)
        {
            self.len -= 1;
            self.tombstones += 1;
            trace!(slot = idx, key = %HexKey(key), "robinhood delete");
            old = Some(entry.value);
        }

        self.maybe_compact_after_mutation()?;
        Ok(old)
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The hash seed this table was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Tombstoned slot count.
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// `tombstones / capacity`.
    pub fn tombstone_ratio(&self) -> f64 {
        self.tombstones as f64 / self.slots.len() as f64
    }

    /// Maximum probe distance over occupied slots.
    pub fn max_probe(&self) -> usize {
        let capacity = self.slots.len();
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Slot::Occupied(entry) => Some(probe_distance(idx, entry.hash, capacity)),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Lazy iteration in slot order.
    ///
    /// Order is not stable across grows or compactions; callers needing
    /// order must sort externally.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(entry) => Some((entry.key.as_slice(), entry.value.as_slice())),
            _ => None,
        })
    }

    /// Ensure `n` live entries fit without crossing `load_high`.
    pub fn reserve(&mut self, n: usize) -> Result<(), TableError> {
        let mut target = self.slots.len();
        while n as f64 / target as f64 > self.load_high {
            target *= 2;
        }
        if target > self.slots.len() {
            self.rebuild_into(target, false)?;
            self.resizes += 1;
        }
        Ok(())
    }

    /// Rebuild in place, dropping all tombstones.
    ///
    /// Keeps the current capacity unless the live size alone would cross
    /// `load_high`, in which case the next sufficient power of two is
    /// used. Live entries are reinserted poorest-first (ascending original
    /// probe distance), which minimizes displacement work during the
    /// rebuild.
    pub fn compact(&mut self) -> Result<(), TableError> {
        let mut target = self.slots.len();
        while self.len as f64 / target as f64 > self.load_high {
            target *= 2;
        }
        let dropped = self.tombstones;
        self.rebuild_into(target, true)?;
        self.compactions += 1;
        debug!(
            capacity = target,
            len = self.len,
            dropped,
            "robinhood table compacted"
        );
        Ok(())
    }

    /// Resizes performed by this instance.
    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    /// Compactions performed by this instance.
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    /// The per-instance probe-length histogram.
    pub fn probes(&self) -> &ProbeHistogram {
        &self.probes
    }

    // --------------------------------------------------------------------------------------------
    // Probe walks
    // --------------------------------------------------------------------------------------------

    /// Shared lookup walk. Returns the matching slot index (if any) and
    /// the number of slots visited.
    fn locate(&self, key: &[u8]) -> (Option<usize>, usize) {
        let hash = hash_key(self.seed, key);
        let capacity = self.slots.len();
        let mask = capacity - 1;
        let mut idx = (hash as usize) & mask;
        let mut dist = 0usize;
        let mut steps = 0usize;

        loop {
            steps += 1;
            match &self.slots[idx] {
                Slot::Empty => return (None, steps),
                Slot::Tombstone => {}
                Slot::Occupied(entry) => {
                    if entry.hash == hash && entry.key.as_slice() == key {
                        return (Some(idx), steps);
                    }
                    if probe_distance(idx, entry.hash, capacity) < dist {
                        // The occupant is richer than this probe; under the
                        // Robin Hood rule the key cannot appear further on.
                        return (None, steps);
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
            if dist >= capacity {
                return (None, steps);
            }
        }
    }

    /// Robin Hood insertion of an entry whose hash is already computed.
    fn insert_hashed(&mut self, mut entry: Entry, record: bool) -> Result<PutResult, TableError> {
        let capacity = self.slots.len();
        let mask = capacity - 1;
        let mut idx = (entry.hash as usize) & mask;
        let mut dist = 0usize;
        let mut first_tombstone: Option<usize> = None;
        let mut steps = 0usize;

        loop {
            steps += 1;
            match &mut self.slots[idx] {
                Slot::Empty => {
                    let target = first_tombstone.unwrap_or(idx);
                    if first_tombstone.is_some() {
                        self.tombstones -= 1;
                    }
                    self.slots[target] = Slot::Occupied(entry);
                    self.len += 1;
                    if record {
                        self.probes.record(steps as f64);
                    }
                    return Ok(PutResult::Inserted);
                }
                Slot::Tombstone => {
                    // Remember the first tombstone but keep probing: the key
                    // may still exist further along the chain.
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Occupied(existing) => {
                    if existing.hash == entry.hash && existing.key == entry.key {
                        let old = std::mem::replace(&mut existing.value, entry.value);
                        if record {
                            self.probes.record(steps as f64);
                        }
                        return Ok(PutResult::Replaced(old));
                    }
                    let existing_dist = probe_distance(idx, existing.hash, capacity);
                    if dist > existing_dist {
                        // Past this point the key cannot exist (lookup would
                        // have cut off here), so placement is decided now.
                        if record {
                            self.probes.record(steps as f64);
                        }
                        if let Some(target) = first_tombstone {
                            // Reclaim the tombstone instead of displacing:
                            // `target` lies on this key's own probe path, so
                            // the placement stays reachable. See DESIGN.md
                            // for the displacement-point reclaim decision.
                            self.tombstones -= 1;
                            self.slots[target] = Slot::Occupied(entry);
                            self.len += 1;
                            return Ok(PutResult::Inserted);
                        }
                        // Robin Hood swap: the richer occupant donates its
                        // slot and continues probing from its own distance.
                        std::mem::swap(existing, &mut entry);
                        self.len += 1;
                        self.slide(entry, idx, existing_dist)?;
                        return Ok(PutResult::Inserted);
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
            if dist >= capacity {
                return Err(TableError::Invariant(
                    "probe distance reached capacity during insert".into(),
                ));
            }
        }
    }

    /// Re-home a displaced entry, continuing the probe from the slot it
    /// was evicted from. Displaced entries reclaim tombstones and may
    /// displace still-richer occupants in turn.
    fn slide(&mut self, mut entry: Entry, from: usize, from_dist: usize) -> Result<(), TableError> {
        let capacity = self.slots.len();
        let mask = capacity - 1;
        let mut idx = (from + 1) & mask;
        let mut dist = from_dist + 1;
        let mut first_tombstone: Option<usize> = None;
        let mut walked = 0usize;

        loop {
            match &mut self.slots[idx] {
                Slot::Empty => {
                    let target = first_tombstone.unwrap_or(idx);
                    if first_tombstone.is_some() {
                        self.tombstones -= 1;
                    }
                    self.slots[target] = Slot::Occupied(entry);
                    return Ok(());
                }
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Occupied(existing) => {
                    let existing_dist = probe_distance(idx, existing.hash, capacity);
                    if dist > existing_dist {
                        if let Some(target) = first_tombstone {
                            // Same rule as the initial walk: the tombstone is
                            // on this entry's continued path, so it is a
                            // legal home.
                            self.tombstones -= 1;
                            self.slots[target] = Slot::Occupied(entry);
                            return Ok(());
                        }
                        std::mem::swap(existing, &mut entry);
                        dist = existing_dist;
                        first_tombstone = None;
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
            walked += 1;
            if walked > capacity {
                return Err(TableError::Invariant(
                    "displacement chain exceeded capacity".into(),
                ));
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Growth and compaction
    // --------------------------------------------------------------------------------------------

    /// Make room for one more entry, growing (or compacting, when the
    /// pressure is tombstones rather than live entries) as needed.
    fn ensure_room(&mut self) -> Result<(), TableError> {
        let capacity = self.slots.len();
        if (self.len + self.tombstones + 1) as f64 / capacity as f64 <= self.load_high {
            return Ok(());
        }
        if (self.len + 1) as f64 / capacity as f64 > self.load_high {
            let mut target = capacity * 2;
            while (self.len + 1) as f64 / target as f64 > self.load_high {
                target *= 2;
            }
            self.rebuild_into(target, false)?;
            self.resizes += 1;
            debug!(capacity = target, len = self.len, "robinhood table resized");
        } else {
            // Live entries fit; the pressure is tombstones.
            self.compact()?;
        }
        Ok(())
    }

    /// Mutator-path compaction trigger.
    ///
    /// Checked inside every mutator, not only on supervisor ticks, so the
    /// tombstone ratio bound holds even mid insert sequence.
    fn maybe_compact_after_mutation(&mut self) -> Result<(), TableError> {
        if self.tombstones as f64 / self.slots.len() as f64 >= self.tombstone_ratio_threshold {
            self.compact()?;
        }
        Ok(())
    }

    /// Rebuild the slot vector at `target` capacity.
    ///
    /// All tombstones vanish. With `poorest_first` set, live entries are
    /// reinserted in ascending original probe distance order (compaction);
    /// otherwise in slot order (growth). The fresh vector is fully
    /// allocated before any entry moves, so an allocation failure leaves
    /// the table untouched.
    fn rebuild_into(&mut self, target: usize, poorest_first: bool) -> Result<(), TableError> {
        debug_assert!(target.is_power_of_two());

        let mut fresh: Vec<Slot> = Vec::new();
        fresh
            .try_reserve_exact(target)
            .map_err(|_| TableError::OutOfMemory(target))?;
        fresh.resize_with(target, || Slot::Empty);

        let old_capacity = self.slots.len();
        let old = std::mem::replace(&mut self.slots, fresh);

        let mut live: Vec<(usize, Entry)> = Vec::with_capacity(self.len);
        for (idx, slot) in old.into_iter().enumerate() {
            if let Slot::Occupied(entry) = slot {
                live.push((probe_distance(idx, entry.hash, old_capacity), entry));
            }
        }
        if poorest_first {
            live.sort_by_key(|(dist, _)| *dist);
        }

        self.len = 0;
        self.tombstones = 0;
        for (_, entry) in live {
            if let PutResult::Replaced(_) = self.insert_hashed(entry, false)? {
                return Err(TableError::Invariant(
                    "duplicate key discovered during rebuild".into(),
                ));
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Migration plumbing
    // --------------------------------------------------------------------------------------------

    /// Guarantee room for `extra` more entries without further allocation,
    /// compacting or growing as the pressure dictates.
    ///
    /// Lets the migration executor front-load all fallible allocation for
    /// a batch, so the subsequent transfers cannot drop entries.
    pub(crate) fn make_room(&mut self, extra: usize) -> Result<(), TableError> {
        let capacity = self.slots.len();
        if (self.len + self.tombstones + extra) as f64 / capacity as f64 <= self.load_high {
            return Ok(());
        }
        let mut target = capacity;
        while (self.len + extra) as f64 / target as f64 > self.load_high {
            target *= 2;
        }
        if target > capacity {
            self.rebuild_into(target, false)?;
            self.resizes += 1;
        } else {
            self.compact()?;
        }
        Ok(())
    }

    /// Take the entry at slot `idx`, leaving a tombstone so probe chains
    /// through the slot stay intact for the remaining entries.
    pub(crate) fn drain_slot(&mut self, idx: usize) -> Option<Entry> {
        match &self.slots[idx] {
            Slot::Occupied(_) => {
                if let Slot::Occupied(entry) =
                    std::mem::replace(&mut self.slots[idx], Slot::Tombstone)
                {
                    self.len -= 1;
                    self.tombstones += 1;
                    Some(entry)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Remove a key without statistics or compaction triggers.
    pub(crate) fn evict(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let (found, _) = self.locate(key);
        let idx = found?;
        if let Slot::Occupied(entry) = std::mem::replace(&mut self.slots[idx], Slot::Tombstone) {
            self.len -= 1;
            self.tombstones += 1;
            Some(entry.value)
        } else {
            None
        }
    }

    /// Insert an entry with a pre-computed hash; the key must be absent.
    pub(crate) fn insert_entry(&mut self, entry: Entry) -> Result<(), TableError> {
        self.ensure_room()?;
        match self.insert_hashed(entry, false)? {
            PutResult::Inserted => Ok(()),
            PutResult::Replaced(_) => Err(TableError::Invariant(
                "duplicate key during entry transfer".into(),
            )),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Read-only views for the tracer and the snapshot codec
    // --------------------------------------------------------------------------------------------

    /// Borrow the raw slot vector.
    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Rebuild a table from snapshot data: exact slot layout, recomputed
    /// probe bookkeeping. The caller has already validated slot tags,
    /// sizes, and duplicates.
    pub(crate) fn from_layout(
        slots: Vec<Slot>,
        len: usize,
        tombstones: usize,
        seed: u64,
        load_high: f64,
        tombstone_ratio_threshold: f64,
    ) -> Self {
        Self {
            slots,
            len,
            tombstones,
            seed,
            load_high,
            tombstone_ratio_threshold,
            resizes: 0,
            compactions: 0,
            probes: ProbeHistogram::new(),
        }
    }
}

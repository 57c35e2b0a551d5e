//! # Adaptive store supervisor
//!
//! The public facade of the crate. A [`Store`] owns the active table
//! engine, watches a rolling window of operation counters, and — in
//! adaptive mode — migrates entries to whichever engine fits the observed
//! workload, batch by batch, without ever taking the store offline.
//!
//! ## Policy
//!
//! Every `policy_interval_ops` operations (or `policy_interval_ms`
//! milliseconds, whichever comes first) the supervisor evaluates the
//! window. With `r` the read share of the window, `t` the tombstone ratio,
//! and `lf` the load factor:
//!
//! | From | Condition | To |
//! |------|-----------|----|
//! | Chaining | `r ≥ 0.75` and `size ≥ 1024` | Robin Hood |
//! | Robin Hood | `r ≤ 0.4` and window puts > window gets | Chaining |
//! | Robin Hood | `t ≥ tombstone_ratio` and no grow needed | in-place compact |
//! | Any | `lf > load_high` | grow current engine |
//!
//! Engine switches obey hysteresis: after a switch starts, no further
//! switch is considered for eight policy windows. Forced modes
//! (`fast-insert`, `fast-lookup`, `memory-tight`) pin the engine; the
//! compact and grow rows still apply to them.
//!
//! ## Migration
//!
//! A switch creates the destination engine and enters the
//! `Migrating { dst, cursor }` state. Every operation entering the store
//! first transfers up to `migration_batch` entries from the source
//! (reads advance the cursor too, so a read-only workload still completes
//! its migration). Reads consult the destination first, then the source;
//! writes land in the destination and atomically evict the key from the
//! source. When the cursor has swept the source and it is empty, the
//! destination becomes active and the source is freed.
//!
//! Cancellation is cooperative: a [`CancelToken`] is checked at batch
//! boundaries, and aborting folds destination entries back into the
//! source — no key is ever absent or duplicated. A failed migration
//! aborts the same way, counts in `migrations_failed_total`, and reports
//! its reason on the next tick; the operation that triggered the batch is
//! never failed by it.
//!
//! ## Poisoning
//!
//! An [`Invariant`](StoreError::Invariant) error from an engine marks the
//! store poisoned: every subsequent operation fails fast with the same
//! message. Out-of-memory errors do not poison — the engines guarantee
//! their pre-call state survives a failed allocation.

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hash::random_seed;
use crate::metrics::{Counters, Gauges, MetricsTick, ProbeHistogram, now_ms, sanitize};
use crate::snapshot::{self, DEFAULT_MAX_PAYLOAD_BYTES, LoadParams, SnapshotError};
use crate::table::{Engine, EngineKind, Entry, PutResult, TableError};
use crate::trace::{ProbeTrace, TraceOp, TraceTerminal, trace_engine};

// ------------------------------------------------------------------------------------------------
// Policy constants
// ------------------------------------------------------------------------------------------------

/// Read share at or above which a chaining store switches to Robin Hood.
const READ_HEAVY_RATIO: f64 = 0.75;

/// Read share at or below which a Robin Hood store switches to chaining
/// (when the window is also write-dominated).
const WRITE_HEAVY_RATIO: f64 = 0.4;

/// Minimum live size before a switch to Robin Hood is worthwhile.
const SWITCH_MIN_SIZE: usize = 1024;

/// No two engine switches within this many policy windows.
const HYSTERESIS_WINDOWS: u64 = 8;

/// Load ceiling forced by [`Mode::MemoryTight`].
const MEMORY_TIGHT_LOAD_HIGH: f64 = 0.75;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller-provided configuration or arguments are invalid.
    #[error("bad input: {0}")]
    BadInput(String),

    /// An allocation failed; the store remains in its pre-call state.
    #[error("out of memory: failed to reserve {0} table slots")]
    OutOfMemory(usize),

    /// An internal invariant check failed. The store is poisoned: every
    /// subsequent operation fails fast with this same error.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Snapshot dump or load failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl From<TableError> for StoreError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::OutOfMemory(n) => StoreError::OutOfMemory(n),
            TableError::Invariant(msg) => StoreError::Invariant(msg),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Engine selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Pin the chaining engine (cheap inserts).
    FastInsert,

    /// Pin the Robin Hood engine (cheap lookups).
    FastLookup,

    /// Pin Robin Hood with a lower load ceiling (0.75) for tighter probe
    /// distributions under memory pressure.
    MemoryTight,

    /// Let the policy engine pick and switch at runtime.
    #[default]
    Adaptive,
}

impl Mode {
    /// The engine this mode pins, if any.
    fn forced_kind(self) -> Option<EngineKind> {
        match self {
            Mode::FastInsert => Some(EngineKind::Chaining),
            Mode::FastLookup | Mode::MemoryTight => Some(EngineKind::RobinHood),
            Mode::Adaptive => None,
        }
    }

    /// The engine a fresh store starts on. Adaptive stores start on
    /// chaining: early life is usually insert-dominated, and the policy
    /// will move on once reads take over.
    fn initial_kind(self) -> EngineKind {
        self.forced_kind().unwrap_or(EngineKind::Chaining)
    }
}

/// Configuration for a [`Store`] instance. Passed to [`Store::open`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Engine selection policy.
    pub mode: Mode,

    /// Initial bucket/slot count; rounded up to a power of two.
    pub initial_capacity: usize,

    /// Growth / compaction load ceiling. [`Mode::MemoryTight`] overrides
    /// this to 0.75.
    pub load_high: f64,

    /// Robin Hood tombstone ratio that triggers compaction.
    pub tombstone_ratio: f64,

    /// Policy evaluation cadence in operations.
    pub policy_interval_ops: u64,

    /// Policy evaluation cadence in milliseconds (whichever of the two
    /// cadences fires first wins).
    pub policy_interval_ms: u64,

    /// Entries transferred per piggybacked migration step.
    pub migration_batch: usize,

    /// Snapshot payload cap, enforced before and after decompression.
    pub max_payload_bytes: u64,

    /// Fixed hash seed for reproducible layouts; `None` draws a random
    /// seed at open.
    pub hash_seed: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Adaptive,
            initial_capacity: 64,
            load_high: 0.85,
            tombstone_ratio: 0.20,
            policy_interval_ops: 4096,
            policy_interval_ms: 1000,
            migration_batch: 256,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            hash_seed: None,
        }
    }
}

impl StoreConfig {
    /// Reject configurations no engine can honor.
    fn validate(&self) -> Result<(), StoreError> {
        if self.initial_capacity == 0 {
            return Err(StoreError::BadInput(
                "initial_capacity must be nonzero".into(),
            ));
        }
        if !(self.load_high > 0.0 && self.load_high <= 1.0) {
            return Err(StoreError::BadInput(format!(
                "load_high {} outside (0, 1]",
                self.load_high
            )));
        }
        if !(self.tombstone_ratio > 0.0 && self.tombstone_ratio <= 1.0) {
            return Err(StoreError::BadInput(format!(
                "tombstone_ratio {} outside (0, 1]",
                self.tombstone_ratio
            )));
        }
        if self.policy_interval_ops == 0 {
            return Err(StoreError::BadInput(
                "policy_interval_ops must be nonzero".into(),
            ));
        }
        if self.policy_interval_ms == 0 {
            return Err(StoreError::BadInput(
                "policy_interval_ms must be nonzero".into(),
            ));
        }
        if self.migration_batch == 0 {
            return Err(StoreError::BadInput(
                "migration_batch must be nonzero".into(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(StoreError::BadInput(
                "max_payload_bytes must be nonzero".into(),
            ));
        }
        Ok(())
    }

    fn effective_load_high(&self) -> f64 {
        match self.mode {
            Mode::MemoryTight => MEMORY_TIGHT_LOAD_HIGH,
            _ => self.load_high,
        }
    }

    fn load_params(&self) -> LoadParams {
        LoadParams {
            max_payload_bytes: self.max_payload_bytes,
            load_high: self.effective_load_high(),
            tombstone_ratio: self.tombstone_ratio,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Cancel token
// ------------------------------------------------------------------------------------------------

/// Cooperative cancellation handle for in-flight migrations.
///
/// Checked at batch boundaries only; cancellation folds the migration
/// back into the source engine without losing or duplicating a key.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the migration this token is attached to.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.inner.store(false, Ordering::SeqCst);
    }
}

// ------------------------------------------------------------------------------------------------
// Store
// ------------------------------------------------------------------------------------------------

/// In-flight migration state: the destination engine and the sweep cursor
/// over the source's buckets/slots. The source is the store's active
/// engine until completion.
#[derive(Debug)]
struct Migration {
    dst: Engine,
    cursor: usize,
}

/// The adaptive key-value store.
///
/// Single-writer: every operation that observes or advances internal
/// state takes `&mut self`. See the module documentation for the policy
/// and migration machinery.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,

    /// Effective load ceiling (mode override applied).
    load_high: f64,

    /// Hash seed shared by every engine this store creates, so cached
    /// hashes survive migrations.
    seed: u64,

    /// The engine serving operations (the migration source while one is
    /// in flight).
    active: Engine,

    /// In-flight migration, if any.
    migration: Option<Migration>,

    /// Lifetime operation counters.
    counters: Counters,

    /// Probe observations of engines that have since been retired.
    retired_probes: ProbeHistogram,
    retired_resizes: u64,
    retired_compactions: u64,

    /// Rolling policy window.
    window_gets: u64,
    window_puts: u64,
    window_dels: u64,
    window_started: Instant,

    /// Operations accepted over the store's lifetime.
    ops_total: u64,

    /// `ops_total` at the moment the last engine switch started.
    last_switch_at: Option<u64>,

    /// Set on the first invariant failure; fail-fast thereafter.
    poisoned: Option<String>,

    /// Migration cancel token, checked at batch boundaries.
    cancel: CancelToken,

    /// Reason of the most recent migration abort.
    last_migration_abort: Option<String>,
}

impl Store {
    /// Open a fresh store.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let load_high = config.effective_load_high();
        let seed = config.hash_seed.unwrap_or_else(random_seed);
        let capacity = config.initial_capacity.next_power_of_two();
        let kind = config.mode.initial_kind();
        let active = Engine::new(kind, capacity, seed, load_high, config.tombstone_ratio)?;
        info!(
            mode = ?config.mode,
            engine = kind.as_str(),
            capacity,
            "store opened"
        );
        Ok(Self {
            config,
            load_high,
            seed,
            active,
            migration: None,
            counters: Counters::default(),
            retired_probes: ProbeHistogram::new(),
            retired_resizes: 0,
            retired_compactions: 0,
            window_gets: 0,
            window_puts: 0,
            window_dels: 0,
            window_started: Instant::now(),
            ops_total: 0,
            last_switch_at: None,
            poisoned: None,
            cancel: CancelToken::new(),
            last_migration_abort: None,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Core operations
    // --------------------------------------------------------------------------------------------

    /// Insert or replace a key.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<PutResult, StoreError> {
        self.begin_op()?;
        self.counters.puts_total += 1;
        self.window_puts += 1;

        let result = match self.migration.as_mut() {
            Some(mig) => {
                // Write to the destination, then atomically evict the
                // source copy. The destination insert goes first so a
                // failed put cannot lose the source entry.
                match mig.dst.put(key.clone(), value) {
                    Ok(dst_result) => {
                        let src_old = self.active.evict(&key);
                        match (dst_result, src_old) {
                            (PutResult::Inserted, Some(old)) => Ok(PutResult::Replaced(old)),
                            (other, _) => Ok(other),
                        }
                    }
                    Err(err) => Err(err),
                }
            }
            None => self.active.put(key, value),
        };
        let result = self.lift(result)?;

        self.maybe_evaluate_policy();
        Ok(result)
    }

    /// Look up a key, returning an owned copy of its value.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.begin_op()?;
        self.counters.gets_total += 1;
        self.window_gets += 1;

        let value = if let Some(mig) = self.migration.as_mut() {
            match mig.dst.get(key) {
                Some(v) => Some(v.to_vec()),
                None => self.active.get(key).map(<[u8]>::to_vec),
            }
        } else {
            self.active.get(key).map(<[u8]>::to_vec)
        };

        if value.is_some() {
            self.counters.hits_total += 1;
        } else {
            self.counters.misses_total += 1;
        }

        self.maybe_evaluate_policy();
        Ok(value)
    }

    /// Remove a key, returning its value.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.begin_op()?;
        self.counters.dels_total += 1;
        self.window_dels += 1;

        let old = match self.migration.as_mut() {
            Some(mig) => match mig.dst.delete(key) {
                Ok(Some(v)) => Ok(Some(v)),
                Ok(None) => self.active.delete(key),
                Err(err) => Err(err),
            },
            None => self.active.delete(key),
        };
        let old = self.lift(old)?;

        self.maybe_evaluate_policy();
        Ok(old)
    }

    /// Live entry count across both engines.
    pub fn len(&self) -> usize {
        self.active.len() + self.migration.as_ref().map_or(0, |m| m.dst.len())
    }

    /// True when no live entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the active engine.
    pub fn capacity(&self) -> usize {
        self.active.capacity()
    }

    /// Which engine currently serves operations.
    pub fn active_engine(&self) -> EngineKind {
        self.active.kind()
    }

    /// The hash seed shared by this store's engines.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether an engine migration is currently in flight.
    pub fn migration_in_flight(&self) -> bool {
        self.migration.is_some()
    }

    /// Lazy iteration over live `(key, value)` pairs.
    ///
    /// During a migration the destination is yielded first, then the
    /// not-yet-migrated remainder of the source; no key appears twice.
    /// Order is engine order and not stable across grows, compactions, or
    /// migrations.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.migration
            .iter()
            .flat_map(|m| m.dst.iter())
            .chain(self.active.iter())
    }

    /// Manually compact the active engine (no-op for chaining).
    pub fn compact(&mut self) -> Result<(), StoreError> {
        self.fail_if_poisoned()?;
        let result = self.active.compact();
        self.lift(result)
    }

    /// Pre-size the active engine for `n` live entries.
    pub fn reserve(&mut self, n: usize) -> Result<(), StoreError> {
        self.fail_if_poisoned()?;
        let result = self.active.reserve(n);
        self.lift(result)
    }

    // --------------------------------------------------------------------------------------------
    // Snapshots
    // --------------------------------------------------------------------------------------------

    /// Serialize the store into `writer`, returning the bytes written.
    ///
    /// An in-flight migration is drained to completion first so the dump
    /// captures a single consistent engine. The dump itself holds only a
    /// shared borrow of that engine (the read barrier).
    pub fn snapshot_dump<W: Write>(
        &mut self,
        writer: &mut W,
        compress: bool,
    ) -> Result<u64, StoreError> {
        self.fail_if_poisoned()?;
        self.finish_migration();
        Ok(snapshot::dump(&self.active, writer, compress)?)
    }

    /// Reconstruct a store from a snapshot frame.
    ///
    /// Engine kind, capacity, seed, and contents come from the snapshot;
    /// policy knobs come from `config`. If `config.mode` pins an engine
    /// other than the snapshotted one, a migration towards the pinned
    /// engine starts immediately.
    pub fn snapshot_load<R: Read>(reader: &mut R, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let params = config.load_params();
        let engine = snapshot::load(reader, &params)?;
        let seed = engine.seed();
        let load_high = config.effective_load_high();
        let mut store = Self {
            config,
            load_high,
            seed,
            active: engine,
            migration: None,
            counters: Counters::default(),
            retired_probes: ProbeHistogram::new(),
            retired_resizes: 0,
            retired_compactions: 0,
            window_gets: 0,
            window_puts: 0,
            window_dels: 0,
            window_started: Instant::now(),
            ops_total: 0,
            last_switch_at: None,
            poisoned: None,
            cancel: CancelToken::new(),
            last_migration_abort: None,
        };
        if let Some(kind) = store.config.mode.forced_kind()
            && kind != store.active.kind()
        {
            store.start_migration(kind);
        }
        Ok(store)
    }

    /// Dump to a file path (conventionally `.snap`, or `.snap.gz` when
    /// compressed — the header flag is authoritative, the suffix is
    /// advisory). The file is fsynced before returning.
    pub fn dump_to_path<P: AsRef<Path>>(
        &mut self,
        path: P,
        compress: bool,
    ) -> Result<u64, StoreError> {
        let mut file = File::create(path).map_err(SnapshotError::Io)?;
        let bytes = self.snapshot_dump(&mut file, compress)?;
        file.sync_all().map_err(SnapshotError::Io)?;
        Ok(bytes)
    }

    /// Load from a file path.
    pub fn load_from_path<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StoreError> {
        let mut file = File::open(path).map_err(SnapshotError::Io)?;
        Self::snapshot_load(&mut file, config)
    }

    // --------------------------------------------------------------------------------------------
    // Observability
    // --------------------------------------------------------------------------------------------

    /// Emit a sanitized metrics tick.
    ///
    /// Counters fold in the engine-local resize/compaction counts of every
    /// engine the store has ever owned, so they are monotonic across
    /// migrations. Gauges describe the active engine (plus the total live
    /// size while a migration is in flight).
    pub fn tick(&self) -> MetricsTick {
        let mut counters = self.counters;
        counters.resizes_total = self.retired_resizes + self.active.resizes();
        counters.compactions_total = self.retired_compactions + self.active.compactions();

        let mut histogram = self.retired_probes.clone();
        histogram.merge(self.active.probes());
        if let Some(mig) = &self.migration {
            counters.resizes_total += mig.dst.resizes();
            counters.compactions_total += mig.dst.compactions();
            histogram.merge(mig.dst.probes());
        }

        let gauges = Gauges {
            size: self.len() as u64,
            capacity: self.active.capacity() as u64,
            tombstones: self.active.tombstones() as u64,
            load_factor: sanitize(self.active.load_factor()),
            tombstone_ratio: sanitize(self.active.tombstone_ratio()),
            max_probe: self.active.max_probe() as u64,
        };

        MetricsTick {
            timestamp_ms: now_ms(),
            engine: self.active.kind(),
            counters,
            gauges,
            probe_histogram: histogram.cumulative(),
            last_migration_abort: self.last_migration_abort.clone(),
        }
    }

    /// Record the probe path a `get` or `put` would take, without
    /// performing it.
    ///
    /// During a migration the destination is traced first, falling back
    /// to the source for an unmatched `get` — the same routing a real
    /// operation uses. With `apply = true` the traced operation is then
    /// performed through the normal path (counters, migration advance,
    /// policy included); a `put` apply requires `value`.
    pub fn trace(
        &mut self,
        op: TraceOp,
        key: &[u8],
        value: Option<Vec<u8>>,
        apply: bool,
    ) -> Result<ProbeTrace, StoreError> {
        self.fail_if_poisoned()?;

        let trace = match (&self.migration, op) {
            (Some(mig), TraceOp::Get) => {
                let dst_trace = trace_engine(&mig.dst, op, key);
                if dst_trace.terminal == TraceTerminal::Match {
                    dst_trace
                } else {
                    trace_engine(&self.active, op, key)
                }
            }
            (Some(mig), TraceOp::Put) => trace_engine(&mig.dst, op, key),
            (None, _) => trace_engine(&self.active, op, key),
        };

        if apply {
            match op {
                TraceOp::Get => {
                    self.get(key)?;
                }
                TraceOp::Put => {
                    let value = value.ok_or_else(|| {
                        StoreError::BadInput("applying a put trace requires a value".into())
                    })?;
                    self.put(key.to_vec(), value)?;
                }
            }
        }
        Ok(trace)
    }

    /// A handle that cancels the current (or next) migration when fired.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation of any in-flight migration; honored at the
    /// next batch boundary.
    pub fn request_cancel(&mut self) {
        self.cancel.cancel();
    }

    // --------------------------------------------------------------------------------------------
    // Internal plumbing
    // --------------------------------------------------------------------------------------------

    fn fail_if_poisoned(&self) -> Result<(), StoreError> {
        match &self.poisoned {
            Some(msg) => Err(StoreError::Invariant(msg.clone())),
            None => Ok(()),
        }
    }

    /// Shared prologue of every operation: fail fast when poisoned, count
    /// the op, and advance any in-flight migration by one batch before
    /// the op acts.
    fn begin_op(&mut self) -> Result<(), StoreError> {
        self.fail_if_poisoned()?;
        self.ops_total += 1;
        self.advance_migration();
        Ok(())
    }

    /// Map a table error, poisoning the store on invariant failures.
    fn lift<T>(&mut self, result: Result<T, TableError>) -> Result<T, StoreError> {
        result.map_err(|err| {
            if let TableError::Invariant(msg) = &err {
                self.poisoned = Some(msg.clone());
            }
            err.into()
        })
    }

    // --------------------------------------------------------------------------------------------
    // Migration executor
    // --------------------------------------------------------------------------------------------

    /// Transfer up to one batch of entries from source to destination,
    /// honoring cancellation and completing the swap when the source is
    /// drained. Failures abort the migration; they are reported on the
    /// metrics stream, never to the caller of the piggybacking op.
    fn advance_migration(&mut self) {
        if self.migration.is_none() {
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel.clear();
            self.abort_migration("cancelled by caller");
            return;
        }

        let batch = self.config.migration_batch;
        let src_capacity = self.active.capacity();
        let mut moved = 0usize;
        while moved < batch {
            let Some(mig) = self.migration.as_mut() else {
                return;
            };
            if mig.cursor >= src_capacity {
                break;
            }
            let cursor = mig.cursor;
            mig.cursor += 1;

            let mut entries = self.active.drain_index(cursor).into_iter();
            while let Some(entry) = entries.next() {
                moved += 1;
                let Some(mig) = self.migration.as_mut() else {
                    return;
                };
                // Fallible allocation happens before the entry moves, so
                // a failure strands nothing in flight.
                if let Err(err) = mig.dst.prepare_for(1) {
                    let reason = format!("destination allocation failed: {err}");
                    self.restore_to_source(std::iter::once(entry).chain(entries));
                    self.abort_migration(&reason);
                    return;
                }
                let Some(mig) = self.migration.as_mut() else {
                    return;
                };
                if let Err(err) = mig.dst.insert_entry(entry) {
                    // Duplicate key: the destination already owns it, so
                    // nothing was lost; hand the remainder back and abort.
                    let reason = format!("entry transfer failed: {err}");
                    self.restore_to_source(entries);
                    self.abort_migration(&reason);
                    return;
                }
            }
        }

        let done = self
            .migration
            .as_ref()
            .is_some_and(|mig| mig.cursor >= src_capacity && self.active.is_empty());
        if done && let Some(mig) = self.migration.take() {
            self.retire_active(mig.dst);
            self.counters.migrations_total += 1;
            info!(engine = self.active.kind().as_str(), "migration complete");
        }
    }

    /// Swap in a new active engine, folding the old engine's statistics
    /// into the retired accumulators so emitted counters stay monotonic.
    fn retire_active(&mut self, next: Engine) {
        let old = std::mem::replace(&mut self.active, next);
        self.retired_resizes += old.resizes();
        self.retired_compactions += old.compactions();
        self.retired_probes.merge(old.probes());
    }

    /// Return entries to the source engine, poisoning the store if one
    /// cannot be taken back (that would be silent data loss).
    fn restore_to_source(&mut self, entries: impl Iterator<Item = Entry>) {
        for entry in entries {
            let restored = self
                .active
                .prepare_for(1)
                .and_then(|()| self.active.insert_entry(entry));
            if let Err(err) = restored {
                self.poisoned = Some(format!("migration rollback lost an entry: {err}"));
                return;
            }
        }
    }

    /// Abort an in-flight migration, folding the destination back into
    /// the source. Entries that originated in the source always fit back;
    /// fresh writes grow the source exactly as a put would have.
    fn abort_migration(&mut self, reason: &str) {
        let Some(mut mig) = self.migration.take() else {
            return;
        };
        warn!(reason, "migration aborted");

        for idx in 0..mig.dst.capacity() {
            let entries = mig.dst.drain_index(idx);
            self.restore_to_source(entries.into_iter());
            if self.poisoned.is_some() {
                break;
            }
        }

        self.retired_resizes += mig.dst.resizes();
        self.retired_compactions += mig.dst.compactions();
        self.retired_probes.merge(mig.dst.probes());
        self.counters.migrations_failed_total += 1;
        self.last_migration_abort = Some(reason.to_string());
    }

    /// Drain an in-flight migration to completion (used by snapshot dump).
    fn finish_migration(&mut self) {
        loop {
            let Some(before) = self.migration.as_ref().map(|m| m.cursor) else {
                return;
            };
            self.advance_migration();
            let Some(after) = self.migration.as_ref().map(|m| m.cursor) else {
                return;
            };
            if after == before && after >= self.active.capacity() {
                // No forward progress possible; should be unreachable.
                self.abort_migration("stalled while draining for snapshot");
                return;
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Policy engine
    // --------------------------------------------------------------------------------------------

    /// Evaluate the policy once per interval (ops or wall clock,
    /// whichever fires first), then reset the window.
    fn maybe_evaluate_policy(&mut self) {
        let window_ops = self.window_gets + self.window_puts + self.window_dels;
        let ops_due = window_ops >= self.config.policy_interval_ops;
        let time_due =
            self.window_started.elapsed() >= Duration::from_millis(self.config.policy_interval_ms);
        if !ops_due && !time_due {
            return;
        }

        self.evaluate_policy(window_ops);

        self.window_gets = 0;
        self.window_puts = 0;
        self.window_dels = 0;
        self.window_started = Instant::now();
    }

    fn evaluate_policy(&mut self, window_ops: u64) {
        // Engine-health rows apply in every mode.
        if self.active.load_factor() > self.load_high {
            let want = self.active.len() + 1;
            if let Err(err) = self.active.reserve(want) {
                warn!(%err, "policy-driven grow failed");
            }
        }
        if self.active.kind() == EngineKind::RobinHood
            && self.active.tombstone_ratio() >= self.config.tombstone_ratio
            && let Err(err) = self.active.compact()
        {
            warn!(%err, "policy-driven compaction failed");
        }

        // Switch rows apply only in adaptive mode, one migration at a time.
        if self.config.mode != Mode::Adaptive || self.migration.is_some() || window_ops == 0 {
            return;
        }

        let r = self.window_gets as f64 / window_ops as f64;
        let target = match self.active.kind() {
            EngineKind::Chaining if r >= READ_HEAVY_RATIO && self.len() >= SWITCH_MIN_SIZE => {
                Some(EngineKind::RobinHood)
            }
            EngineKind::RobinHood
                if r <= WRITE_HEAVY_RATIO && self.window_puts > self.window_gets =>
            {
                Some(EngineKind::Chaining)
            }
            _ => None,
        };
        let Some(target) = target else { return };

        if let Some(at) = self.last_switch_at
            && self.ops_total.saturating_sub(at) < HYSTERESIS_WINDOWS * self.config.policy_interval_ops
        {
            debug!(target = target.as_str(), "switch suppressed by hysteresis");
            return;
        }

        self.start_migration(target);
    }

    /// Create the destination engine and enter the migrating state.
    fn start_migration(&mut self, target: EngineKind) {
        let mut capacity = self.config.initial_capacity.next_power_of_two();
        while self.len() as f64 / capacity as f64 > self.load_high {
            capacity *= 2;
        }

        match Engine::new(
            target,
            capacity,
            self.seed,
            self.load_high,
            self.config.tombstone_ratio,
        ) {
            Ok(dst) => {
                info!(
                    from = self.active.kind().as_str(),
                    to = target.as_str(),
                    capacity,
                    entries = self.len(),
                    "migration started"
                );
                self.migration = Some(Migration { dst, cursor: 0 });
                self.last_switch_at = Some(self.ops_total);
            }
            Err(err) => {
                let reason = format!("destination creation failed: {err}");
                warn!(%reason, "migration not started");
                self.counters.migrations_failed_total += 1;
                self.last_migration_abort = Some(reason);
            }
        }
    }
}

//! Metrics tap — counters, gauges, and the probe-length histogram.
//!
//! Each engine instance owns a [`ProbeHistogram`] plus resize/compaction
//! counters; the supervisor owns the operation counters and stitches
//! everything into a [`MetricsTick`] on demand (pull-based emission).
//!
//! ## Sanitization rules
//!
//! - Histogram observations that are NaN, infinite, or negative are
//!   **dropped** — not recorded as zero.
//! - Gauges that would be non-finite (a ratio over a zero capacity, a
//!   poisoned intermediate) are emitted as `None`, the "unknown" sentinel,
//!   rather than propagating NaN into downstream serializers.
//!
//! Emitted histogram buckets are cumulative and monotonic, so a scraper
//! can diff consecutive ticks without re-sorting.
//!
//! The external HTTP server owns the wire format (one JSON object per
//! line); this module only produces the structured record.


use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::table::EngineKind;

// ------------------------------------------------------------------------------------------------
// Probe-length histogram
// ------------------------------------------------------------------------------------------------

/// Upper bounds of the fixed histogram buckets.
///
/// An observation `v` lands in the first bucket with `v <= bound`; anything
/// above the last bound lands in the overflow bucket.
pub const PROBE_BUCKET_BOUNDS: [f64; 10] =
    [0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0];

/// Number of buckets including the `+∞` overflow bucket.
pub const PROBE_BUCKET_COUNT: usize = PROBE_BUCKET_BOUNDS.len() + 1;

/// Fixed-bucket histogram of probe lengths.
///
/// Stored as per-bucket counts; emitted cumulative via
/// [`ProbeHistogram::cumulative`]. The bucket layout is fixed at compile
/// time, so the histogram has no unbounded reservoir to cap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeHistogram {
    counts: [u64; PROBE_BUCKET_COUNT],
    observations: u64,
}

impl ProbeHistogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one probe-length observation.
    ///
    /// NaN, infinite, and negative values are dropped.
    pub fn record(&mut self, value: f64) {
        if !value.is_finite() || value < 0.0 {
            trace!(value, "dropping unusable histogram observation");
            return;
        }
        let idx = PROBE_BUCKET_BOUNDS
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(PROBE_BUCKET_COUNT - 1);
        self.counts[idx] += 1;
        self.observations += 1;
    }

    /// Total observations recorded (dropped values excluded).
    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Cumulative bucket counts: `out[i]` is the number of observations
    /// `<= PROBE_BUCKET_BOUNDS[i]`; the final element equals
    /// [`ProbeHistogram::observations`].
    pub fn cumulative(&self) -> [u64; PROBE_BUCKET_COUNT] {
        let mut out = [0u64; PROBE_BUCKET_COUNT];
        let mut running = 0u64;
        for (slot, count) in out.iter_mut().zip(self.counts.iter()) {
            running += count;
            *slot = running;
        }
        out
    }

    /// Fold another histogram into this one.
    ///
    /// Used when an engine is retired so emitted buckets stay monotonic
    /// across migrations.
    pub fn merge(&mut self, other: &ProbeHistogram) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
        self.observations += other.observations;
    }
}

// ------------------------------------------------------------------------------------------------
// Counters and gauges
// ------------------------------------------------------------------------------------------------

/// Monotonic operation counters for the lifetime of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Total `put` operations.
    pub puts_total: u64,
    /// Total `get` operations.
    pub gets_total: u64,
    /// Total `delete` operations.
    pub dels_total: u64,
    /// `get` operations that found a value.
    pub hits_total: u64,
    /// `get` operations that found nothing.
    pub misses_total: u64,
    /// Table resizes across all engines this store has owned.
    pub resizes_total: u64,
    /// Tombstone compactions across all engines this store has owned.
    pub compactions_total: u64,
    /// Completed engine migrations.
    pub migrations_total: u64,
    /// Migrations that aborted before completion.
    pub migrations_failed_total: u64,
}

/// Point-in-time gauges of the active engine.
///
/// Ratio gauges are `None` when they cannot be computed finitely — the
/// "unknown" sentinel required of emitted ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct Gauges {
    /// Live entries.
    pub size: u64,
    /// Buckets or slots.
    pub capacity: u64,
    /// Tombstoned slots (0 for chaining).
    pub tombstones: u64,
    /// `(size + tombstones) / capacity`, if finite.
    pub load_factor: Option<f64>,
    /// `tombstones / capacity`, if finite.
    pub tombstone_ratio: Option<f64>,
    /// Worst-case probe cost.
    pub max_probe: u64,
}

/// Replace a non-finite float with the `None` sentinel.
pub fn sanitize(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

// ------------------------------------------------------------------------------------------------
// Metrics tick
// ------------------------------------------------------------------------------------------------

/// One pull-based metrics emission.
///
/// The supervisor assembles a tick on demand; external servers serialize
/// it (the core never writes a wire format for ticks).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsTick {
    /// Milliseconds since the UNIX epoch at emission time.
    pub timestamp_ms: u64,
    /// Which engine is currently active.
    pub engine: EngineKind,
    /// Monotonic counters.
    pub counters: Counters,
    /// Sanitized gauges.
    pub gauges: Gauges,
    /// Cumulative probe-length buckets, bounds per [`PROBE_BUCKET_BOUNDS`]
    /// plus a final `+∞` bucket.
    pub probe_histogram: [u64; PROBE_BUCKET_COUNT],
    /// Reason of the most recent migration abort, if any occurred since
    /// the store was opened.
    pub last_migration_abort: Option<String>,
}

/// Wall-clock timestamp for tick emission, in milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

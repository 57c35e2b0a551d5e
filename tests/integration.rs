//! Integration tests for the public `Store` API.
//!
//! These tests exercise the full stack (supervisor → engines → metrics →
//! snapshot codec → tracer) through the public `morphkv` surface only.
//! No internal modules are referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: open in every mode, CRUD, iteration, length
//! - **Growth**: forced small capacities growing under load
//! - **Tombstones**: threshold-triggered compaction with survivors intact
//! - **Adaptation**: read-heavy workloads migrating chaining → Robin Hood
//! - **Snapshots**: buffer and file round trips, gzip, tamper detection
//! - **Tracing**: probe paths with match terminals, side-effect freedom
//!
//! ## See also
//! - `store::tests` — supervisor-level unit tests
//! - `table::tests` — engine-level unit tests and property suites
//! - `snapshot::tests` — frame corruption matrix

use std::io::Cursor;

use morphkv::{
    EngineKind, Mode, PutResult, SnapshotError, Store, StoreConfig, StoreError, TraceOp,
    TraceTerminal,
};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Deterministic layouts for every scenario.
fn seeded(mode: Mode) -> StoreConfig {
    StoreConfig {
        mode,
        hash_seed: Some(0x0DDB_A11),
        ..StoreConfig::default()
    }
}

fn key(i: u32) -> Vec<u8> {
    format!("K{i:05}").into_bytes()
}

fn value(i: u32) -> Vec<u8> {
    format!("V{i:05}").into_bytes()
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Open in fast-lookup mode with a small table, write two keys, read one
/// back, delete it, and confirm the other survives.
///
/// # Expected behavior
/// `get` after `del` is absent; `len` counts the single survivor.
#[test]
fn basic_put_get_delete_lifecycle() {
    init_tracing();

    let mut store = Store::open(StoreConfig {
        initial_capacity: 8,
        ..seeded(Mode::FastLookup)
    })
    .unwrap();

    assert_eq!(
        store.put(b"K1".to_vec(), b"V1".to_vec()).unwrap(),
        PutResult::Inserted
    );
    assert_eq!(
        store.put(b"K2".to_vec(), b"V2".to_vec()).unwrap(),
        PutResult::Inserted
    );
    assert_eq!(store.get(b"K1").unwrap(), Some(b"V1".to_vec()));
    assert_eq!(store.delete(b"K1").unwrap(), Some(b"V1".to_vec()));
    assert_eq!(store.get(b"K1").unwrap(), None);
    assert_eq!(store.len(), 1);
}

/// # Scenario
/// Every mode serves the same CRUD sequence identically.
#[test]
fn all_modes_serve_identical_crud() {
    init_tracing();

    for mode in [
        Mode::FastInsert,
        Mode::FastLookup,
        Mode::MemoryTight,
        Mode::Adaptive,
    ] {
        let mut store = Store::open(seeded(mode)).unwrap();
        for i in 0..200 {
            store.put(key(i), value(i)).unwrap();
        }
        for i in (0..200).step_by(3) {
            assert_eq!(store.delete(&key(i)).unwrap(), Some(value(i)));
        }
        for i in 0..200 {
            let expect = if i % 3 == 0 { None } else { Some(value(i)) };
            assert_eq!(store.get(&key(i)).unwrap(), expect, "mode {mode:?} key {i}");
        }
        assert_eq!(store.iter().count(), store.len());
    }
}

// ================================================================================================
// Growth
// ================================================================================================

/// # Scenario
/// open(fast-lookup, capacity 4, load_high 0.85); insert K1..K8.
///
/// # Expected behavior
/// At least one grow happened; final capacity ≥ 16; all eight keys
/// retrievable.
#[test]
fn small_table_grows_under_insertion() {
    init_tracing();

    let mut store = Store::open(StoreConfig {
        initial_capacity: 4,
        load_high: 0.85,
        ..seeded(Mode::FastLookup)
    })
    .unwrap();

    for i in 1..=8 {
        store.put(key(i), value(i)).unwrap();
    }

    assert!(store.capacity() >= 16, "capacity {}", store.capacity());
    assert!(store.tick().counters.resizes_total >= 1);
    for i in 1..=8 {
        assert_eq!(store.get(&key(i)).unwrap(), Some(value(i)));
    }
}

// ================================================================================================
// Tombstones
// ================================================================================================

/// # Scenario
/// open(fast-lookup, tombstone_ratio 0.25); insert K1..K100 (the table
/// settles at 128 slots), then delete K1..K40.
///
/// # Expected behavior
/// The delete that brings the ratio to 0.25 (the 32nd) triggers an
/// in-place compaction inside the mutator path: the compaction resets
/// the ratio to 0.0, the ratio never sits at or above the threshold at
/// rest, and all surviving keys stay retrievable.
#[test]
fn tombstone_threshold_compacts_inside_mutator_path() {
    init_tracing();

    let mut store = Store::open(StoreConfig {
        tombstone_ratio: 0.25,
        ..seeded(Mode::FastLookup)
    })
    .unwrap();

    for i in 1..=100 {
        store.put(key(i), value(i)).unwrap();
    }
    assert_eq!(store.capacity(), 128);

    for i in 1..=40 {
        store.delete(&key(i)).unwrap();
        let ratio = store.tick().gauges.tombstone_ratio.unwrap();
        assert!(ratio < 0.25, "ratio {ratio} at rest after delete {i}");
    }

    let tick = store.tick();
    assert!(tick.counters.compactions_total >= 1);
    assert_eq!(tick.gauges.tombstones, 8, "40 deletes, compacted at 32");
    assert_eq!(store.len(), 60);
    for i in 41..=100 {
        assert_eq!(store.get(&key(i)).unwrap(), Some(value(i)), "survivor {i}");
    }

    // A put right after a fresh compaction keeps the ratio at zero.
    store.put(b"post".to_vec(), b"compact".to_vec()).unwrap();
    assert!(store.tick().gauges.tombstone_ratio.unwrap() < 0.25);
}

// ================================================================================================
// Adaptation
// ================================================================================================

/// # Scenario
/// open(adaptive); bulk-insert a key set, then hammer it with reads.
///
/// # Expected behavior
/// The supervisor migrates to Robin Hood exactly once; every key remains
/// readable before, during, and after the migration.
#[test]
fn read_heavy_adaptive_store_migrates_to_robinhood() {
    init_tracing();

    let mut store = Store::open(seeded(Mode::Adaptive)).unwrap();
    assert_eq!(store.active_engine(), EngineKind::Chaining);

    for i in 0..10_000 {
        store.put(key(i), value(i)).unwrap();
    }
    for round in 0..9u32 {
        for i in 0..10_000 {
            assert_eq!(
                store.get(&key(i)).unwrap(),
                Some(value(i)),
                "round {round} key {i}"
            );
        }
    }

    assert_eq!(store.active_engine(), EngineKind::RobinHood);
    assert_eq!(store.tick().counters.migrations_total, 1);
    assert_eq!(store.len(), 10_000);
}

// ================================================================================================
// Snapshots
// ================================================================================================

/// # Scenario
/// open(fast-insert); dump compressed to a buffer; truncate the last
/// byte; load.
///
/// # Expected behavior
/// The loader reports a checksum mismatch — never a partial store.
#[test]
fn truncated_compressed_snapshot_fails_checksum() {
    init_tracing();

    let mut store = Store::open(seeded(Mode::FastInsert)).unwrap();
    for i in 0..100 {
        store.put(key(i), value(i)).unwrap();
    }

    let mut buf = Vec::new();
    store.snapshot_dump(&mut buf, true).unwrap();
    buf.truncate(buf.len() - 1);

    match Store::snapshot_load(&mut Cursor::new(&buf), seeded(Mode::FastInsert)) {
        Err(StoreError::Snapshot(SnapshotError::ChecksumMismatch)) => {}
        other => panic!("expected checksum mismatch, got {other:?}"),
    }
}

/// # Scenario
/// Round-trip each engine kind through a snapshot file, compressed and
/// not, using the advisory suffixes.
#[test]
fn snapshot_files_roundtrip_for_both_engines() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    for (mode, name) in [
        (Mode::FastInsert, "chain"),
        (Mode::FastLookup, "robinhood"),
    ] {
        for (compress, suffix) in [(false, "snap"), (true, "snap.gz")] {
            let mut store = Store::open(seeded(mode)).unwrap();
            for i in 0..300 {
                store.put(key(i), value(i)).unwrap();
            }
            for i in 0..30 {
                store.delete(&key(i)).unwrap();
            }

            let path = tmp.path().join(format!("{name}.{suffix}"));
            store.dump_to_path(&path, compress).unwrap();

            let mut restored = Store::load_from_path(&path, seeded(mode)).unwrap();
            assert_eq!(restored.active_engine(), store.active_engine());
            assert_eq!(restored.len(), 270);
            for i in 30..300 {
                assert_eq!(restored.get(&key(i)).unwrap(), Some(value(i)));
            }
            for i in 0..30 {
                assert_eq!(restored.get(&key(i)).unwrap(), None);
            }
        }
    }
}

/// # Scenario
/// Flip a single bit in every header field region of a dumped frame.
///
/// # Expected behavior
/// Every flip produces a `BadSnapshot`-class error on load; none loads.
#[test]
fn any_header_bit_flip_is_detected() {
    init_tracing();

    let mut store = Store::open(seeded(Mode::FastLookup)).unwrap();
    for i in 0..50 {
        store.put(key(i), value(i)).unwrap();
    }
    let mut pristine = Vec::new();
    store.snapshot_dump(&mut pristine, false).unwrap();

    // 0..54 covers magic, version, flags, reserved, checksum_len,
    // payload_len, and the checksum itself.
    for offset in 0..54 {
        let mut tampered = pristine.clone();
        tampered[offset] ^= 0x01;
        let result = Store::snapshot_load(&mut Cursor::new(&tampered), seeded(Mode::FastLookup));
        assert!(
            matches!(result, Err(StoreError::Snapshot(_))),
            "flip at header offset {offset} was not detected"
        );
    }
}

// ================================================================================================
// Tracing
// ================================================================================================

/// # Scenario
/// Populate a Robin Hood table until probe chains form, then trace the
/// deepest key.
///
/// # Expected behavior
/// The trace ends in a match, its path length witnesses the `max_probe`
/// gauge, and tracing leaves `len()` untouched.
#[test]
fn probe_trace_witnesses_longest_chain_without_side_effects() {
    init_tracing();

    let mut store = Store::open(seeded(Mode::FastLookup)).unwrap();
    for i in 0..54 {
        store.put(key(i), value(i)).unwrap();
    }
    let len_before = store.len();
    let max_probe = store.tick().gauges.max_probe as usize;
    assert!(max_probe >= 1, "no chains at 84% load");

    let mut deepest = 0usize;
    for i in 0..54 {
        let trace = store.trace(TraceOp::Get, &key(i), None, false).unwrap();
        assert_eq!(trace.terminal, TraceTerminal::Match, "key {i}");
        deepest = deepest.max(trace.path_len());
    }
    assert_eq!(deepest, max_probe + 1);
    assert_eq!(store.len(), len_before, "tracing mutated the store");
    assert_eq!(store.tick().gauges.max_probe as usize, max_probe);
}

/// # Scenario
/// Trace a put with `apply = true`.
///
/// # Expected behavior
/// The trace reports where the entry would land; the apply then actually
/// inserts it.
#[test]
fn applied_put_trace_inserts_the_entry() {
    init_tracing();

    let mut store = Store::open(seeded(Mode::FastLookup)).unwrap();
    for i in 0..20 {
        store.put(key(i), value(i)).unwrap();
    }

    let trace = store
        .trace(TraceOp::Put, b"applied", Some(b"yes".to_vec()), true)
        .unwrap();
    assert!(matches!(
        trace.terminal,
        TraceTerminal::WouldInsertAt(_) | TraceTerminal::WouldDisplace(_)
    ));
    assert_eq!(store.get(b"applied").unwrap(), Some(b"yes".to_vec()));
    assert_eq!(store.len(), 21);

    // Applying a put trace without a value is a caller error.
    match store.trace(TraceOp::Put, b"no-value", None, true) {
        Err(StoreError::BadInput(_)) => {}
        other => panic!("expected BadInput, got {other:?}"),
    }
}

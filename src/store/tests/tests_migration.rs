//! Migration state machine: liveness of reads, write routing,
//! completion, and cancellation.

use crate::store::{Mode, Store, StoreConfig};
use crate::table::EngineKind;

const KEYS: u32 = 1200;

/// Tiny batches keep a migration in flight long enough to observe.
fn slow_migration_config() -> StoreConfig {
    StoreConfig {
        mode: Mode::Adaptive,
        policy_interval_ops: 64,
        policy_interval_ms: 600_000,
        migration_batch: 8,
        hash_seed: Some(0x5EED_3000),
        ..StoreConfig::default()
    }
}

fn key(i: u32) -> Vec<u8> {
    format!("key-{i:05}").into_bytes()
}

fn value(i: u32) -> Vec<u8> {
    format!("val-{i:05}").into_bytes()
}

/// Build a chaining store and push it into a Robin Hood migration.
fn migrating_store() -> Store {
    let mut store = Store::open(slow_migration_config()).unwrap();
    for i in 0..KEYS {
        store.put(key(i), value(i)).unwrap();
    }
    assert_eq!(store.active_engine(), EngineKind::Chaining);

    // The window left over from the fill is mixed; 150 gets guarantee at
    // least one pure-read window, which starts the switch. Small batches
    // keep it from completing here.
    for i in 0..150u32 {
        store.get(&key(i)).unwrap();
    }
    assert!(store.migration_in_flight(), "switch did not start");
    store
}

#[test]
fn every_key_stays_readable_throughout_migration() {
    let mut store = migrating_store();

    // Sweep all keys repeatedly while the migration advances underneath;
    // every key must be found at every stage.
    let mut completed_during_sweep = false;
    for round in 0..4 {
        for i in 0..KEYS {
            assert_eq!(
                store.get(&key(i)).unwrap(),
                Some(value(i)),
                "key {i} lost in round {round}"
            );
        }
        if !store.migration_in_flight() {
            completed_during_sweep = true;
        }
    }
    assert!(completed_during_sweep, "migration never finished");
    assert_eq!(store.active_engine(), EngineKind::RobinHood);
    assert_eq!(store.len(), KEYS as usize);
}

#[test]
fn len_is_consistent_during_migration() {
    let mut store = migrating_store();
    while store.migration_in_flight() {
        assert_eq!(store.len(), KEYS as usize);
        store.get(&key(0)).unwrap();
    }
    assert_eq!(store.len(), KEYS as usize);
}

#[test]
fn writes_during_migration_route_to_destination() {
    let mut store = migrating_store();

    // Overwrite a spread of existing keys and add fresh ones while the
    // migration is in flight.
    for i in (0..KEYS).step_by(7) {
        let result = store.put(key(i), b"overwritten".to_vec()).unwrap();
        assert_eq!(
            result,
            crate::table::PutResult::Replaced(value(i)),
            "overwrite of key {i} lost the old value"
        );
    }
    for i in 0..100u32 {
        store.put(format!("fresh-{i}").into_bytes(), b"new".to_vec()).unwrap();
    }

    // Drain the migration, then verify every write survived the swap.
    while store.migration_in_flight() {
        store.get(&key(0)).unwrap();
    }
    assert_eq!(store.active_engine(), EngineKind::RobinHood);

    for i in (0..KEYS).step_by(7) {
        assert_eq!(store.get(&key(i)).unwrap(), Some(b"overwritten".to_vec()));
    }
    for i in 0..100u32 {
        assert_eq!(
            store.get(format!("fresh-{i}").as_bytes()).unwrap(),
            Some(b"new".to_vec())
        );
    }
    assert_eq!(store.len(), KEYS as usize + 100);
}

#[test]
fn deletes_during_migration_take_effect() {
    let mut store = migrating_store();

    for i in (0..200u32).step_by(2) {
        assert_eq!(store.delete(&key(i)).unwrap(), Some(value(i)), "key {i}");
    }

    while store.migration_in_flight() {
        store.get(&key(1)).unwrap();
    }

    for i in (0..200u32).step_by(2) {
        assert_eq!(store.get(&key(i)).unwrap(), None, "key {i} resurrected");
    }
    assert_eq!(store.len(), KEYS as usize - 100);
}

#[test]
fn iteration_during_migration_sees_each_key_once() {
    let store = migrating_store();
    let mut keys: Vec<Vec<u8>> = store.iter().map(|(k, _)| k.to_vec()).collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total, "duplicate keys across engines");
    assert_eq!(total, KEYS as usize);
}

#[test]
fn cancellation_folds_back_without_loss() {
    let mut store = migrating_store();

    // Let a few batches move first.
    for _ in 0..5 {
        store.get(&key(0)).unwrap();
    }
    assert!(store.migration_in_flight());

    store.request_cancel();
    // Honored at the next batch boundary.
    store.get(&key(0)).unwrap();
    assert!(!store.migration_in_flight());
    assert_eq!(store.active_engine(), EngineKind::Chaining);

    let tick = store.tick();
    assert_eq!(tick.counters.migrations_total, 0);
    assert_eq!(tick.counters.migrations_failed_total, 1);
    let reason = tick.last_migration_abort.expect("abort reason reported");
    assert!(reason.contains("cancel"), "unexpected reason: {reason}");

    // No key absent, none duplicated.
    assert_eq!(store.len(), KEYS as usize);
    for i in 0..KEYS {
        assert_eq!(store.get(&key(i)).unwrap(), Some(value(i)), "key {i}");
    }
}

#[test]
fn cancel_token_works_from_a_clone() {
    let mut store = migrating_store();
    let token = store.cancel_token();

    token.cancel();
    store.get(&key(0)).unwrap();

    assert!(!store.migration_in_flight());
    assert_eq!(store.active_engine(), EngineKind::Chaining);
    assert_eq!(store.tick().counters.migrations_failed_total, 1);
}

#[test]
fn store_recovers_after_cancelled_migration() {
    let mut store = migrating_store();
    store.request_cancel();
    store.get(&key(0)).unwrap();
    assert!(!store.migration_in_flight());

    // The store keeps serving and may switch again after hysteresis.
    for i in 0..KEYS {
        store.put(key(i), b"again".to_vec()).unwrap();
    }
    for _ in 0..2000 {
        store.get(&key(0)).unwrap();
    }
    assert_eq!(store.active_engine(), EngineKind::RobinHood);
    assert_eq!(store.tick().counters.migrations_total, 1);
}

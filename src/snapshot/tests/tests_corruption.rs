//! Snapshot tamper and corruption tests.
//!
//! Every header field is flipped in isolation and must produce its
//! specific `SnapshotError`; payload bit flips and truncations must fail
//! the checksum; crafted payloads probing the allowlist, the size caps,
//! and the invariant checks must be rejected.

use crate::encoding::WireWriter;
use crate::snapshot::{self, LoadParams, SNAP_HEADER_SIZE, SnapshotError};
use crate::table::{Engine, EngineKind};

const SEED: u64 = 0x5EED_7000;

fn params() -> LoadParams {
    LoadParams::default()
}

fn dump(kind: EngineKind, n: u32, compress: bool) -> Vec<u8> {
    let mut e = Engine::new(kind, 64, SEED, 0.85, 0.20).unwrap();
    for i in 0..n {
        e.put(format!("key-{i:04}").into_bytes(), format!("val-{i:04}").into_bytes())
            .unwrap();
    }
    let mut buf = Vec::new();
    snapshot::dump(&e, &mut buf, compress).unwrap();
    buf
}

fn load(buf: &[u8]) -> Result<Engine, SnapshotError> {
    snapshot::load(&mut &buf[..], &params())
}

// ================================================================
// Header field tampering
// ================================================================

#[test]
fn flipped_magic_fails_with_bad_magic() {
    let mut buf = dump(EngineKind::Chaining, 20, false);
    buf[0] ^= 0x01;
    assert!(matches!(load(&buf), Err(SnapshotError::BadMagic)));
}

#[test]
fn flipped_version_fails_with_bad_version() {
    let mut buf = dump(EngineKind::Chaining, 20, false);
    buf[9] = 2;
    assert!(matches!(load(&buf), Err(SnapshotError::BadVersion(2))));
}

#[test]
fn unknown_flag_bits_fail_with_bad_flags() {
    let mut buf = dump(EngineKind::Chaining, 20, false);
    buf[10] |= 0b0000_0010;
    assert!(matches!(load(&buf), Err(SnapshotError::BadFlags(_))));
}

#[test]
fn nonzero_reserved_byte_is_rejected() {
    let mut buf = dump(EngineKind::Chaining, 20, false);
    buf[11] = 0xFF;
    assert!(matches!(load(&buf), Err(SnapshotError::BadReserved(0xFF))));
}

#[test]
fn wrong_checksum_length_is_rejected() {
    let mut buf = dump(EngineKind::Chaining, 20, false);
    buf[13] = 16;
    assert!(matches!(
        load(&buf),
        Err(SnapshotError::BadChecksumLength(16))
    ));
}

#[test]
fn flipped_checksum_byte_fails_checksum() {
    let mut buf = dump(EngineKind::Chaining, 20, false);
    buf[22] ^= 0xFF; // first checksum byte
    assert!(matches!(load(&buf), Err(SnapshotError::ChecksumMismatch)));
}

#[test]
fn shortened_payload_length_fails_checksum() {
    // A shorter claimed length changes the checksummed byte range.
    let mut buf = dump(EngineKind::Chaining, 20, false);
    let actual = (buf.len() - SNAP_HEADER_SIZE) as u64;
    buf[14..22].copy_from_slice(&(actual - 1).to_be_bytes());
    assert!(matches!(load(&buf), Err(SnapshotError::ChecksumMismatch)));
}

// ================================================================
// Payload tampering
// ================================================================

#[test]
fn every_payload_bit_flip_fails_checksum() {
    let buf = dump(EngineKind::RobinHood, 30, false);
    // Flip one bit in a spread of payload positions.
    for offset in (SNAP_HEADER_SIZE..buf.len()).step_by(37) {
        let mut tampered = buf.clone();
        tampered[offset] ^= 0x10;
        assert!(
            matches!(load(&tampered), Err(SnapshotError::ChecksumMismatch)),
            "flip at {offset} slipped through"
        );
    }
}

#[test]
fn truncated_payload_fails_checksum() {
    // S5: compressed dump, last byte cut off.
    let mut buf = dump(EngineKind::Chaining, 50, true);
    buf.truncate(buf.len() - 1);
    assert!(matches!(load(&buf), Err(SnapshotError::ChecksumMismatch)));
}

#[test]
fn truncated_header_fails_with_io_error() {
    let buf = dump(EngineKind::Chaining, 5, false);
    assert!(matches!(
        load(&buf[..SNAP_HEADER_SIZE - 4]),
        Err(SnapshotError::Io(_))
    ));
}

// ================================================================
// Size caps
// ================================================================

#[test]
fn stored_payload_over_cap_is_rejected_before_reading() {
    let buf = dump(EngineKind::Chaining, 100, false);
    let tight = LoadParams {
        max_payload_bytes: 64,
        ..LoadParams::default()
    };
    match snapshot::load(&mut &buf[..], &tight) {
        Err(SnapshotError::PayloadTooLarge { got, cap }) => {
            assert!(got > cap);
            assert_eq!(cap, 64);
        }
        other => panic!("expected PayloadTooLarge, got {other:?}"),
    }
}

#[test]
fn decompressed_payload_over_cap_is_rejected() {
    // Highly repetitive values compress far below the cap while
    // inflating well above it — a small zip bomb.
    let mut e = Engine::new(EngineKind::Chaining, 64, SEED, 0.85, 0.20).unwrap();
    for i in 0..40u32 {
        e.put(format!("key-{i:04}").into_bytes(), vec![0u8; 64 * 1024])
            .unwrap();
    }
    let mut buf = Vec::new();
    snapshot::dump(&e, &mut buf, true).unwrap();

    let stored_len = buf.len() as u64;
    let cap_between = LoadParams {
        max_payload_bytes: stored_len + 1024,
        ..LoadParams::default()
    };
    assert!(
        stored_len + 1024 < 40 * 64 * 1024,
        "cap must sit between stored and inflated size"
    );
    assert!(matches!(
        snapshot::load(&mut &buf[..], &cap_between),
        Err(SnapshotError::PayloadTooLarge { .. })
    ));
}

// ================================================================
// Crafted payloads — allowlist and invariant checks
// ================================================================

/// Rebuild a valid frame around an arbitrary payload.
fn frame(payload: &[u8]) -> Vec<u8> {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(payload);
    let checksum = hasher.finalize();

    let mut buf = Vec::new();
    buf.extend_from_slice(b"ADHSNAP1");
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.push(0); // flags
    buf.push(0); // reserved
    buf.extend_from_slice(&32u16.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    buf.extend_from_slice(checksum.as_slice());
    buf.extend_from_slice(payload);
    buf
}

fn encode_chaining_payload(capacity: u64, size: u64, entries: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.put_u8(0); // chaining tag
    w.put_u64(capacity);
    w.put_u64(SEED);
    w.put_u64(size);
    w.put_count("entries", entries.len()).unwrap();
    for (k, v) in entries {
        w.put_bytes("key", k).unwrap();
        w.put_bytes("value", v).unwrap();
    }
    w.into_bytes()
}

#[test]
fn unknown_engine_tag_is_disallowed() {
    let mut w = WireWriter::new();
    w.put_u8(7);
    w.put_u64(64);
    w.put_u64(SEED);
    w.put_u64(0);
    assert!(matches!(
        load(&frame(&w.into_bytes())),
        Err(SnapshotError::DisallowedTag(7))
    ));
}

#[test]
fn unknown_slot_tag_is_disallowed() {
    let mut w = WireWriter::new();
    w.put_u8(1); // robinhood tag
    w.put_u64(4); // capacity
    w.put_u64(SEED);
    w.put_u64(0); // size
    w.put_u64(0); // tombstones
    w.put_bytes("slot_states", &[0u8, 9, 0, 0]).unwrap(); // 9 is bogus
    w.put_count("entries", 0).unwrap();
    assert!(matches!(
        load(&frame(&w.into_bytes())),
        Err(SnapshotError::DisallowedTag(9))
    ));
}

#[test]
fn non_power_of_two_capacity_is_rejected() {
    let p = encode_chaining_payload(100, 0, &[]);
    assert!(matches!(load(&frame(&p)), Err(SnapshotError::Invariant(_))));
}

#[test]
fn size_mismatch_is_rejected() {
    let p = encode_chaining_payload(64, 5, &[(b"a", b"1")]);
    assert!(matches!(load(&frame(&p)), Err(SnapshotError::Invariant(_))));
}

#[test]
fn duplicate_keys_are_rejected() {
    let p = encode_chaining_payload(64, 2, &[(b"dup", b"1"), (b"dup", b"2")]);
    assert!(matches!(load(&frame(&p)), Err(SnapshotError::Invariant(_))));
}

#[test]
fn overfull_table_is_rejected() {
    // 60 entries in 64 buckets: load 0.94 over the 0.85 ceiling.
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..60u32)
        .map(|i| (format!("key-{i}").into_bytes(), b"v".to_vec()))
        .collect();
    let borrowed: Vec<(&[u8], &[u8])> = entries
        .iter()
        .map(|(k, v)| (k.as_slice(), v.as_slice()))
        .collect();
    let p = encode_chaining_payload(64, 60, &borrowed);
    assert!(matches!(load(&frame(&p)), Err(SnapshotError::Invariant(_))));
}

#[test]
fn trailing_garbage_is_rejected() {
    let mut p = encode_chaining_payload(64, 0, &[]);
    p.extend_from_slice(b"leftover");
    assert!(matches!(load(&frame(&p)), Err(SnapshotError::Invariant(_))));
}

#[test]
fn truncated_structure_is_rejected() {
    let p = encode_chaining_payload(64, 0, &[]);
    let cut = &p[..p.len() - 2];
    assert!(matches!(
        load(&frame(cut)),
        Err(SnapshotError::Structure(_))
    ));
}

#[test]
fn robinhood_slot_count_mismatch_is_rejected() {
    let mut w = WireWriter::new();
    w.put_u8(1);
    w.put_u64(64); // capacity 64...
    w.put_u64(SEED);
    w.put_u64(0);
    w.put_u64(0);
    w.put_bytes("slot_states", &[0u8; 32]).unwrap(); // ...but only 32 states
    w.put_count("entries", 0).unwrap();
    assert!(matches!(
        load(&frame(&w.into_bytes())),
        Err(SnapshotError::Invariant(_))
    ));
}

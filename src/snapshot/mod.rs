//! Snapshot codec — framed, checksummed, optionally compressed dump and
//! restore of a table engine.
//!
//! ## On-disk layout
//!
//! ```text
//! offset size field
//! 0      8    magic   = ASCII "ADHSNAP1"
//! 8      2    version = 1
//! 10     1    flags   (bit0 = payload gzip-compressed; bits1..7 reserved=0)
//! 11     1    reserved = 0
//! 12     2    checksum_len = 32
//! 14     8    payload_len (bytes of payload AS STORED, i.e. after compression)
//! 22     32   checksum = BLAKE2b-256(payload_as_stored)
//! 54     …    payload
//! ```
//!
//! All header integers are big-endian, as is the payload wire format
//! (see [`crate::encoding`]). The payload is a structured record:
//! engine tag, capacity, seed, size, the `(key, value)` entry list, and —
//! for Robin Hood — the tombstone count plus a slot-state byte per slot so
//! the exact layout round-trips byte-identically.
//!
//! ## Restricted allowlist
//!
//! The decoder hard-codes the admissible engine tags (`0` = chaining,
//! `1` = Robin Hood) and slot-state tags (`0`/`1`/`2`). Any other tag is
//! [`SnapshotError::DisallowedTag`] — there are no data-driven code paths.
//!
//! ## Safety caps
//!
//! The stored payload size is checked against the configured cap **before**
//! it is read, and the decompressed size is capped again during inflation,
//! defeating zip bombs. The encoding layer additionally bounds every
//! individual byte string and vector.
//!
//! ## Load-time verification
//!
//! Magic, version, flag mask, reserved byte, checksum length, and checksum
//! are all verified before the payload is interpreted. A reconstructed
//! engine is then re-checked: entry count against the stored size, no
//! duplicate keys, slot states consistent with the counts, and load factor
//! within `load_high`. Hash caches are recomputed from the stored seed.

mod encoding_impls;

#[cfg(test)]
mod tests;

use std::io::{self, Read, Write};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::{debug, info};

use crate::encoding::{WireError, WireReader, WireWriter};
use crate::hash::hash_key;
use crate::table::{ChainTable, Engine, Entry, RobinHoodTable, Slot, TableError};

pub(crate) use encoding_impls::{SnapshotEntry, SnapshotHeader};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Frame magic, first 8 bytes of every snapshot.
pub const SNAP_MAGIC: [u8; 8] = *b"ADHSNAP1";

/// Current frame version.
pub const SNAP_VERSION: u16 = 1;

/// Flag bit 0: the stored payload is gzip-compressed.
pub const SNAP_FLAG_GZIP: u8 = 0b0000_0001;

/// Checksum width — BLAKE2b-256.
pub const SNAP_CHECKSUM_LEN: u16 = 32;

/// Fixed header size in bytes.
pub const SNAP_HEADER_SIZE: usize = 54;

/// Default cap on the snapshot payload, before and after decompression.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// Upper bound on a restored table's capacity. Rejects snapshots that
/// would allocate absurd empty tables regardless of payload size.
const MAX_SNAPSHOT_CAPACITY: u64 = 1 << 32;

const ENGINE_TAG_CHAINING: u8 = 0;
const ENGINE_TAG_ROBINHOOD: u8 = 1;

const SLOT_TAG_EMPTY: u8 = 0;
const SLOT_TAG_OCCUPIED: u8 = 1;
const SLOT_TAG_TOMBSTONE: u8 = 2;

type Blake2b256 = Blake2b<U32>;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by snapshot dump and load.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The frame does not start with `ADHSNAP1`.
    #[error("bad magic (expected \"ADHSNAP1\")")]
    BadMagic,

    /// The frame version is not supported.
    #[error("unsupported snapshot version {0}")]
    BadVersion(u16),

    /// Reserved flag bits were set.
    #[error("unknown flag bits 0b{0:08b}")]
    BadFlags(u8),

    /// The reserved header byte was not zero.
    #[error("nonzero reserved header byte 0x{0:02X}")]
    BadReserved(u8),

    /// The checksum length field disagrees with BLAKE2b-256.
    #[error("bad checksum length {0} (expected 32)")]
    BadChecksumLength(u16),

    /// BLAKE2b-256 over the stored payload did not match the header.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The payload exceeds the configured cap (before or after
    /// decompression).
    #[error("payload of {got} bytes exceeds cap of {cap} bytes")]
    PayloadTooLarge {
        /// Observed payload size.
        got: u64,
        /// Configured cap.
        cap: u64,
    },

    /// The payload bytes did not decode as the expected structure.
    #[error("malformed payload: {0}")]
    Structure(#[from] WireError),

    /// A tag outside the hard-coded allowlist was encountered.
    #[error("disallowed record tag {0}")]
    DisallowedTag(u8),

    /// The decoded payload violates an engine invariant.
    #[error("snapshot violates invariant: {0}")]
    Invariant(String),
}

impl From<TableError> for SnapshotError {
    fn from(err: TableError) -> Self {
        SnapshotError::Invariant(err.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Load parameters
// ------------------------------------------------------------------------------------------------

/// Knobs the loader needs beyond the snapshot bytes themselves.
#[derive(Debug, Clone)]
pub struct LoadParams {
    /// Payload cap, enforced before and after decompression.
    pub max_payload_bytes: u64,

    /// Load ceiling of the reconstructed engine; the stored state must
    /// already satisfy it.
    pub load_high: f64,

    /// Tombstone compaction threshold of the reconstructed engine.
    pub tombstone_ratio: f64,
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            load_high: 0.85,
            tombstone_ratio: 0.20,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Dump
// ------------------------------------------------------------------------------------------------

/// Serialize an engine into `writer`, returning the bytes written.
///
/// The caller's shared borrow of the engine is the read barrier: no
/// mutation can happen for the duration of the dump. Output is
/// deterministic for a given engine state — identical states produce
/// identical frames.
pub fn dump<W: Write>(
    engine: &Engine,
    writer: &mut W,
    compress: bool,
) -> Result<u64, SnapshotError> {
    let payload = encode_payload(engine)?;

    let (stored, flags) = if compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        (encoder.finish()?, SNAP_FLAG_GZIP)
    } else {
        (payload, 0)
    };

    let header = SnapshotHeader {
        magic: SNAP_MAGIC,
        version: SNAP_VERSION,
        flags,
        reserved: 0,
        checksum_len: SNAP_CHECKSUM_LEN,
        payload_len: stored.len() as u64,
        checksum: checksum_of(&stored),
    };

    let mut header_writer = WireWriter::new();
    header.write_to(&mut header_writer);
    let header_bytes = header_writer.into_bytes();
    debug_assert_eq!(header_bytes.len(), SNAP_HEADER_SIZE);

    writer.write_all(&header_bytes)?;
    writer.write_all(&stored)?;

    let written = (header_bytes.len() + stored.len()) as u64;
    debug!(
        engine = engine.kind().as_str(),
        entries = engine.len(),
        bytes = written,
        compress,
        "snapshot dumped"
    );
    Ok(written)
}

// ------------------------------------------------------------------------------------------------
// Load
// ------------------------------------------------------------------------------------------------

/// Reconstruct an engine from a snapshot frame.
///
/// Verifies the header field by field, the checksum over the stored
/// payload, and — after decoding — the engine invariants. Hash caches are
/// recomputed from the stored seed.
pub fn load<R: Read>(reader: &mut R, params: &LoadParams) -> Result<Engine, SnapshotError> {
    let mut header_bytes = [0u8; SNAP_HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = SnapshotHeader::read_from(&mut WireReader::new(&header_bytes))?;

    if header.magic != SNAP_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    if header.version != SNAP_VERSION {
        return Err(SnapshotError::BadVersion(header.version));
    }
    if header.flags & !SNAP_FLAG_GZIP != 0 {
        return Err(SnapshotError::BadFlags(header.flags));
    }
    if header.reserved != 0 {
        return Err(SnapshotError::BadReserved(header.reserved));
    }
    if header.checksum_len != SNAP_CHECKSUM_LEN {
        return Err(SnapshotError::BadChecksumLength(header.checksum_len));
    }
    if header.payload_len > params.max_payload_bytes {
        return Err(SnapshotError::PayloadTooLarge {
            got: header.payload_len,
            cap: params.max_payload_bytes,
        });
    }

    // Read at most payload_len bytes. A truncated frame (or a length
    // field inflated past the actual payload) yields fewer bytes; both
    // count as checksum failures — the checksum covers exactly
    // payload_len stored bytes.
    let mut stored = Vec::new();
    reader
        .by_ref()
        .take(header.payload_len)
        .read_to_end(&mut stored)?;

    if stored.len() as u64 != header.payload_len || checksum_of(&stored) != header.checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let payload = if header.flags & SNAP_FLAG_GZIP != 0 {
        let mut decoded = Vec::new();
        GzDecoder::new(stored.as_slice())
            .take(params.max_payload_bytes + 1)
            .read_to_end(&mut decoded)?;
        if decoded.len() as u64 > params.max_payload_bytes {
            return Err(SnapshotError::PayloadTooLarge {
                got: decoded.len() as u64,
                cap: params.max_payload_bytes,
            });
        }
        decoded
    } else {
        stored
    };

    let engine = decode_payload(&payload, params)?;
    info!(
        engine = engine.kind().as_str(),
        entries = engine.len(),
        capacity = engine.capacity(),
        "snapshot loaded"
    );
    Ok(engine)
}

fn checksum_of(stored: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(stored);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_slice());
    out
}

// ------------------------------------------------------------------------------------------------
// Payload encode
// ------------------------------------------------------------------------------------------------

/// Encode an engine's logical state.
///
/// Layout (big-endian, via [`crate::encoding`]):
///
/// ```text
/// [u8 engine_tag][u64 capacity][u64 seed][u64 size]
/// chaining:   [entries…]
/// robinhood:  [u64 tombstones][Vec<u8> slot_states][entries…]
/// ```
fn encode_payload(engine: &Engine) -> Result<Vec<u8>, WireError> {
    let mut w = WireWriter::new();
    match engine {
        Engine::Chaining(table) => {
            w.put_u8(ENGINE_TAG_CHAINING);
            w.put_u64(table.capacity() as u64);
            w.put_u64(table.seed());
            w.put_u64(table.len() as u64);
            w.put_count("entries", table.len())?;
            for (key, value) in table.iter() {
                w.put_bytes("key", key)?;
                w.put_bytes("value", value)?;
            }
        }
        Engine::RobinHood(table) => {
            w.put_u8(ENGINE_TAG_ROBINHOOD);
            w.put_u64(table.capacity() as u64);
            w.put_u64(table.seed());
            w.put_u64(table.len() as u64);
            w.put_u64(table.tombstones() as u64);

            let states: Vec<u8> = table
                .slots()
                .iter()
                .map(|slot| match slot {
                    Slot::Empty => SLOT_TAG_EMPTY,
                    Slot::Occupied(_) => SLOT_TAG_OCCUPIED,
                    Slot::Tombstone => SLOT_TAG_TOMBSTONE,
                })
                .collect();
            w.put_bytes("slot_states", &states)?;

            w.put_count("entries", table.len())?;
            for (key, value) in table.iter() {
                w.put_bytes("key", key)?;
                w.put_bytes("value", value)?;
            }
        }
    }
    Ok(w.into_bytes())
}

// ------------------------------------------------------------------------------------------------
// Payload decode + reconstruction
// ------------------------------------------------------------------------------------------------

/// Decode a payload and rebuild the engine it describes.
fn decode_payload(payload: &[u8], params: &LoadParams) -> Result<Engine, SnapshotError> {
    let mut r = WireReader::new(payload);

    let tag = r.u8("engine_tag")?;
    let capacity = r.u64("capacity")?;
    let seed = r.u64("seed")?;
    let size = r.u64("size")?;

    if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_SNAPSHOT_CAPACITY {
        return Err(SnapshotError::Invariant(format!(
            "capacity {capacity} is not a usable power of two"
        )));
    }

    match tag {
        ENGINE_TAG_CHAINING => {
            let entries = decode_entries(&mut r)?;
            reject_trailing(&r)?;
            rebuild_chaining(capacity as usize, seed, size, entries, params)
        }
        ENGINE_TAG_ROBINHOOD => {
            let tombstones = r.u64("tombstones")?;
            let states = r.bytes("slot_states")?;
            let entries = decode_entries(&mut r)?;
            reject_trailing(&r)?;
            rebuild_robinhood(
                capacity as usize,
                seed,
                size,
                tombstones,
                states,
                entries,
                params,
            )
        }
        other => Err(SnapshotError::DisallowedTag(other)),
    }
}

/// Decode the payload entry list.
///
/// No allocation happens up front: the vector grows only as entries
/// actually decode, so a crafted count cannot outrun the payload bytes.
fn decode_entries(r: &mut WireReader<'_>) -> Result<Vec<SnapshotEntry>, WireError> {
    let count = r.count("entries")?;
    let mut entries = Vec::new();
    for _ in 0..count {
        entries.push(SnapshotEntry::read_from(r)?);
    }
    Ok(entries)
}

/// A payload longer than its structure is as suspect as a short one.
fn reject_trailing(r: &WireReader<'_>) -> Result<(), SnapshotError> {
    if r.remaining() != 0 {
        return Err(SnapshotError::Invariant(format!(
            "{} trailing bytes after payload",
            r.remaining()
        )));
    }
    Ok(())
}

fn rebuild_chaining(
    capacity: usize,
    seed: u64,
    size: u64,
    entries: Vec<SnapshotEntry>,
    params: &LoadParams,
) -> Result<Engine, SnapshotError> {
    if entries.len() as u64 != size {
        return Err(SnapshotError::Invariant(format!(
            "size field {size} does not match {} stored entries",
            entries.len()
        )));
    }
    if size as f64 / capacity as f64 > params.load_high {
        return Err(SnapshotError::Invariant(format!(
            "load factor {:.3} exceeds load_high {:.3}",
            size as f64 / capacity as f64,
            params.load_high
        )));
    }

    let mut table = ChainTable::new(capacity, seed, params.load_high)?;
    for entry in entries {
        let hash = hash_key(seed, &entry.key);
        table.insert_entry(Entry {
            key: entry.key,
            value: entry.value,
            hash,
        })?;
    }
    Ok(Engine::Chaining(table))
}

fn rebuild_robinhood(
    capacity: usize,
    seed: u64,
    size: u64,
    tombstones: u64,
    states: Vec<u8>,
    entries: Vec<SnapshotEntry>,
    params: &LoadParams,
) -> Result<Engine, SnapshotError> {
    if states.len() != capacity {
        return Err(SnapshotError::Invariant(format!(
            "{} slot states for capacity {capacity}",
            states.len()
        )));
    }
    if entries.len() as u64 != size {
        return Err(SnapshotError::Invariant(format!(
            "size field {size} does not match {} stored entries",
            entries.len()
        )));
    }
    if (size + tombstones) as f64 / capacity as f64 > params.load_high {
        return Err(SnapshotError::Invariant(format!(
            "load factor {:.3} exceeds load_high {:.3}",
            (size + tombstones) as f64 / capacity as f64,
            params.load_high
        )));
    }

    // Exact slot reconstruction: occupied tags consume entries in order.
    let mut slots: Vec<Slot> = Vec::new();
    slots
        .try_reserve_exact(capacity)
        .map_err(|_| SnapshotError::Invariant(format!("cannot allocate {capacity} slots")))?;
    let mut remaining = entries.into_iter();
    let mut occupied = 0u64;
    let mut tombstoned = 0u64;
    for state in states {
        slots.push(match state {
            SLOT_TAG_EMPTY => Slot::Empty,
            SLOT_TAG_OCCUPIED => {
                let entry = remaining
                    .next()
                    .ok_or_else(|| SnapshotError::Invariant("more occupied slots than entries".into()))?;
                occupied += 1;
                let hash = hash_key(seed, &entry.key);
                Slot::Occupied(Entry {
                    key: entry.key,
                    value: entry.value,
                    hash,
                })
            }
            SLOT_TAG_TOMBSTONE => {
                tombstoned += 1;
                Slot::Tombstone
            }
            other => return Err(SnapshotError::DisallowedTag(other)),
        });
    }
    if remaining.next().is_some() {
        return Err(SnapshotError::Invariant(
            "more entries than occupied slots".into(),
        ));
    }
    if occupied != size || tombstoned != tombstones {
        return Err(SnapshotError::Invariant(format!(
            "slot states disagree with counts (occupied {occupied}/{size}, tombstones {tombstoned}/{tombstones})"
        )));
    }

    // Duplicate-key check over the reconstructed slots.
    let mut keys: Vec<&[u8]> = slots
        .iter()
        .filter_map(|slot| match slot {
            Slot::Occupied(entry) => Some(entry.key.as_slice()),
            _ => None,
        })
        .collect();
    keys.sort_unstable();
    if keys.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(SnapshotError::Invariant("duplicate key in snapshot".into()));
    }

    Ok(Engine::RobinHood(RobinHoodTable::from_layout(
        slots,
        size as usize,
        tombstones as usize,
        seed,
        params.load_high,
        params.tombstone_ratio,
    )))
}

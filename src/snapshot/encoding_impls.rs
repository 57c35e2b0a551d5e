//! Wire layouts for the snapshot frame header and payload entries.

use crate::encoding::{WireError, WireReader, WireWriter};

/// The fixed 54-byte snapshot frame header.
///
/// Field order and widths are part of the on-disk format; see the
/// module-level layout table.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SnapshotHeader {
    /// `b"ADHSNAP1"`.
    pub(crate) magic: [u8; 8],

    /// Frame version.
    pub(crate) version: u16,

    /// Bit 0 = gzip; bits 1..7 must be zero.
    pub(crate) flags: u8,

    /// Must be zero.
    pub(crate) reserved: u8,

    /// Checksum width; always 32 for BLAKE2b-256.
    pub(crate) checksum_len: u16,

    /// Payload size as stored (post-compression when flag bit 0 is set).
    pub(crate) payload_len: u64,

    /// BLAKE2b-256 over the stored payload.
    pub(crate) checksum: [u8; 32],
}

impl SnapshotHeader {
    /// Append the fixed header layout.
    pub(crate) fn write_to(&self, w: &mut WireWriter) {
        w.put_raw(&self.magic);
        w.put_u16(self.version);
        w.put_u8(self.flags);
        w.put_u8(self.reserved);
        w.put_u16(self.checksum_len);
        w.put_u64(self.payload_len);
        w.put_raw(&self.checksum);
    }

    /// Decode the fixed header layout.
    pub(crate) fn read_from(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            magic: r.array("magic")?,
            version: r.u16("version")?,
            flags: r.u8("flags")?,
            reserved: r.u8("reserved")?,
            checksum_len: r.u16("checksum_len")?,
            payload_len: r.u64("payload_len")?,
            checksum: r.array("checksum")?,
        })
    }
}

/// Decoded form of one `(key, value)` pair from the payload entry list.
///
/// The dump side writes entries straight from borrowed engine slices;
/// only the loader materializes this record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SnapshotEntry {
    /// Key bytes.
    pub(crate) key: Vec<u8>,

    /// Value bytes.
    pub(crate) value: Vec<u8>,
}

impl SnapshotEntry {
    /// Decode one entry.
    pub(crate) fn read_from(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            key: r.bytes("key")?,
            value: r.bytes("value")?,
        })
    }
}

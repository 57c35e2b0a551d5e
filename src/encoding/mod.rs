//! Wire format for snapshot payloads.
//!
//! Everything the snapshot codec stores goes through the two types here:
//! [`WireWriter`] appends big-endian integers and length-prefixed byte
//! strings to a payload buffer, and [`WireReader`] walks one back with a
//! bounds check on every read. The format is deliberately minimal —
//! integers, fixed arrays, byte strings, and element counts are the only
//! shapes a snapshot needs — and deliberately owned by this crate, so the
//! bytes on disk never change because a dependency upgraded.
//!
//! # Shapes
//!
//! | Shape | Encoding |
//! |-------|----------|
//! | integer | fixed width, big-endian (matches the frame header) |
//! | fixed array | raw bytes, no prefix |
//! | byte string | `[u32 len][bytes]` |
//! | sequence | `[u32 count]` followed by the elements |
//!
//! # Decode limits
//!
//! A decoded byte string is capped at [`MAX_BYTES`] and a sequence count
//! at [`MAX_ELEMENTS`], checked before anything is allocated, so a
//! corrupted length field cannot demand gigabytes. The snapshot loader
//! enforces its whole-payload cap on top; these bounds are per item.
//!
//! Every reader method takes a `field` label that travels into the error,
//! turning "unexpected end of buffer" into "payload truncated reading
//! `slot_states` at offset 41" when a snapshot is damaged.

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Limits
// ------------------------------------------------------------------------------------------------

/// Cap on a single decoded byte string (256 MiB).
pub const MAX_BYTES: u32 = 256 * 1024 * 1024;

/// Cap on a single decoded sequence count (16 M elements).
pub const MAX_ELEMENTS: u32 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors raised while reading or writing wire-encoded payload data.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended before a field was complete.
    #[error("payload truncated reading {field}: need {need} bytes at offset {at}, have {have}")]
    Truncated {
        /// The field being decoded when the bytes ran out.
        field: &'static str,
        /// Read offset at which the field started.
        at: usize,
        /// Bytes the field required.
        need: usize,
        /// Bytes actually left.
        have: usize,
    },

    /// A length or count field demands more than its decode cap allows.
    #[error("{field} of {len} exceeds the wire cap of {cap}")]
    OverCap {
        /// The field whose length prefix was out of bounds.
        field: &'static str,
        /// The decoded length or count.
        len: u64,
        /// The applicable cap ([`MAX_BYTES`] or [`MAX_ELEMENTS`]).
        cap: u64,
    },

    /// A value is too large for its `u32` wire prefix.
    #[error("{field} of {len} does not fit in the u32 wire prefix")]
    TooLong {
        /// The field being encoded.
        field: &'static str,
        /// The byte length or element count that overflowed.
        len: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Append-only builder for a wire-encoded payload.
///
/// Writing is deterministic: the same call sequence always produces the
/// same bytes, which is what makes snapshot dumps byte-identical for
/// identical engine states.
#[derive(Debug, Default)]
pub struct WireWriter {
    out: Vec<u8>,
}

impl WireWriter {
    /// Start an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes with no prefix (fixed-width fields like the frame
    /// magic and checksum).
    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.out.extend_from_slice(bytes);
        self
    }

    /// Append a length-prefixed byte string.
    pub fn put_bytes(&mut self, field: &'static str, bytes: &[u8]) -> Result<&mut Self, WireError> {
        let len = u32::try_from(bytes.len()).map_err(|_| WireError::TooLong {
            field,
            len: bytes.len(),
        })?;
        self.put_u32(len);
        self.out.extend_from_slice(bytes);
        Ok(self)
    }

    /// Append a sequence count; the caller then appends the elements.
    pub fn put_count(&mut self, field: &'static str, count: usize) -> Result<&mut Self, WireError> {
        let count = u32::try_from(count).map_err(|_| WireError::TooLong { field, len: count })?;
        self.put_u32(count);
        Ok(self)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.out.len()
    }

    /// True while nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Finish and hand the payload over.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Bounds-checked cursor over a wire-encoded payload.
///
/// Reads advance an internal offset; nothing is consumed on error, so a
/// failed read reports the exact position the payload broke at.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Wrap a payload for decoding.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, need: usize, field: &'static str) -> Result<&'a [u8], WireError> {
        let have = self.buf.len() - self.pos;
        if have < need {
            return Err(WireError::Truncated {
                field,
                at: self.pos,
                need,
                have,
            });
        }
        let slice = &self.buf[self.pos..self.pos + need];
        self.pos += need;
        Ok(slice)
    }

    /// Read `N` raw bytes into a fixed array.
    pub fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], WireError> {
        let raw = self.take(N, field)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }

    /// Read a length-prefixed byte string, capped at [`MAX_BYTES`].
    pub fn bytes(&mut self, field: &'static str) -> Result<Vec<u8>, WireError> {
        let len = self.u32(field)?;
        if len > MAX_BYTES {
            return Err(WireError::OverCap {
                field,
                len: u64::from(len),
                cap: u64::from(MAX_BYTES),
            });
        }
        Ok(self.take(len as usize, field)?.to_vec())
    }

    /// Read a sequence count, capped at [`MAX_ELEMENTS`].
    pub fn count(&mut self, field: &'static str) -> Result<usize, WireError> {
        let count = self.u32(field)?;
        if count > MAX_ELEMENTS {
            return Err(WireError::OverCap {
                field,
                len: u64::from(count),
                cap: u64::from(MAX_ELEMENTS),
            });
        }
        Ok(count as usize)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current read offset.
    pub fn offset(&self) -> usize {
        self.pos
    }
}

// ------------------------------------------------------------------------------------------------
// Integer accessors
//
// One macro arm per width keeps the writer and reader symmetric; a new
// integer shape cannot be added to one side only.
// ------------------------------------------------------------------------------------------------

macro_rules! wire_ints {
    ($($ty:ty => $put:ident / $get:ident),* $(,)?) => {
        impl WireWriter {
            $(
                #[doc = concat!("Append a big-endian `", stringify!($ty), "`.")]
                pub fn $put(&mut self, value: $ty) -> &mut Self {
                    self.out.extend_from_slice(&value.to_be_bytes());
                    self
                }
            )*
        }

        impl WireReader<'_> {
            $(
                #[doc = concat!("Read a big-endian `", stringify!($ty), "`.")]
                pub fn $get(&mut self, field: &'static str) -> Result<$ty, WireError> {
                    let raw = self.take(size_of::<$ty>(), field)?;
                    let mut bytes = [0u8; size_of::<$ty>()];
                    bytes.copy_from_slice(raw);
                    Ok(<$ty>::from_be_bytes(bytes))
                }
            )*
        }
    };
}

wire_ints! {
    u8 => put_u8 / u8,
    u16 => put_u16 / u16,
    u32 => put_u32 / u32,
    u64 => put_u64 / u64,
}

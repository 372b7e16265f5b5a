//! The unit of storage.
//!
//! An [`Entry`] is one CloudEvent, already serialized by the wire codec
//! (which is outside this crate), together with its position inside a
//! block. The block engine assigns `index` and `offset` during the
//! prepare phase of an append; `stime` is the event's born time and
//! feeds the time-key seek index.
//!
//! On disk an entry is a 4-byte length prefix followed by the payload:
//!
//! ```text
//! ┌──────────────┬──────────────────┐
//! │ length: u32  │ payload bytes    │
//! └──────────────┴──────────────────┘
//! ```
//!
//! A zero length never occurs in a valid entry, which is what lets
//! crash recovery treat the first zero prefix as the end of the data
//! region.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Size of the length prefix in front of every stored entry.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// One serialized CloudEvent with its in-block position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// 0-based sequence number within the block. Strictly increasing,
    /// no gaps.
    pub index: u32,

    /// Byte offset of the length prefix within the block file.
    pub offset: u32,

    /// Event born time, milliseconds since epoch.
    pub stime: i64,

    /// The serialized CloudEvent.
    pub payload: Bytes,
}

impl Entry {
    pub fn new(payload: Bytes) -> Self {
        Self {
            index: 0,
            offset: 0,
            stime: 0,
            payload,
        }
    }

    pub fn with_stime(payload: Bytes, stime: i64) -> Self {
        Self {
            index: 0,
            offset: 0,
            stime,
            payload,
        }
    }

    /// Total bytes this entry occupies on disk, prefix included.
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }

    /// Serializes the entry into `buf`, which must be at least
    /// [`Entry::size`] bytes long. Returns the number of bytes written.
    /// The length prefix is little-endian; only the block header uses
    /// big-endian.
    pub fn marshal_to(&self, buf: &mut [u8]) -> usize {
        let len = self.payload.len();
        buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&(len as u32).to_le_bytes());
        buf[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len].copy_from_slice(&self.payload);
        LENGTH_PREFIX_SIZE + len
    }

    /// Reads the length prefix at the start of `buf`.
    pub fn payload_length(buf: &[u8]) -> u32 {
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_includes_prefix() {
        let entry = Entry::new(Bytes::from_static(b"abc"));
        assert_eq!(entry.size(), 7);
    }

    #[test]
    fn test_size_empty_payload() {
        let entry = Entry::new(Bytes::new());
        assert_eq!(entry.size(), LENGTH_PREFIX_SIZE);
    }

    #[test]
    fn test_marshal_roundtrip() {
        let entry = Entry::new(Bytes::from_static(b"hello"));
        let mut buf = vec![0u8; entry.size()];
        let n = entry.marshal_to(&mut buf);
        assert_eq!(n, 9);
        assert_eq!(Entry::payload_length(&buf), 5);
        assert_eq!(&buf[4..], b"hello");
    }

    #[test]
    fn test_marshal_into_larger_buffer() {
        let entry = Entry::new(Bytes::from_static(b"x"));
        let mut buf = vec![0xFFu8; 64];
        let n = entry.marshal_to(&mut buf);
        assert_eq!(n, 5);
        assert_eq!(Entry::payload_length(&buf), 1);
        assert_eq!(buf[4], b'x');
        // Bytes past the entry are untouched.
        assert_eq!(buf[5], 0xFF);
    }

    #[test]
    fn test_with_stime() {
        let entry = Entry::with_stime(Bytes::from_static(b"e"), 1_700_000_000_000);
        assert_eq!(entry.stime, 1_700_000_000_000);
        assert_eq!(entry.index, 0);
        assert_eq!(entry.offset, 0);
    }
}

//! In-memory and on-disk index records.

use super::INDEX_RECORD_SIZE;

/// Locates one entry inside a block file.
///
/// `stime` is kept at millisecond precision in memory; the persisted
/// record carries it truncated to seconds in the trailing word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// File offset of the entry's length prefix.
    pub offset: i64,
    /// On-disk length of the entry, prefix included.
    pub length: i32,
    /// Event born time, ms since epoch. Zero when unknown (rebuilt
    /// from a data-region scan).
    pub stime: i64,
}

impl IndexEntry {
    /// First byte past this entry.
    pub fn end_offset(&self) -> i64 {
        self.offset + self.length as i64
    }

    /// Encodes the record into a 16-byte slot.
    pub fn marshal_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        let secs = (self.stime / 1000).clamp(0, u32::MAX as i64) as u32;
        buf[12..16].copy_from_slice(&secs.to_le_bytes());
    }

    /// Decodes a 16-byte slot.
    pub fn unmarshal(buf: &[u8]) -> Self {
        let offset = i64::from_le_bytes(buf[0..8].try_into().unwrap());
        let length = i32::from_le_bytes(buf[8..12].try_into().unwrap());
        let secs = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        Self {
            offset,
            length,
            stime: secs as i64 * 1000,
        }
    }
}

/// Encodes `indexes` into a tail region buffer: record *k* occupies the
/// slot `len − (k+1)·16`, so the last entry's record sits nearest the
/// file end.
pub fn marshal_region(indexes: &[IndexEntry]) -> Vec<u8> {
    let record = INDEX_RECORD_SIZE as usize;
    let length = record * indexes.len();
    let mut buf = vec![0u8; length];
    for (k, idx) in indexes.iter().enumerate() {
        let off = length - (k + 1) * record;
        idx.marshal_to(&mut buf[off..off + record]);
    }
    buf
}

/// Decodes a tail region buffer holding `num` records.
pub fn unmarshal_region(buf: &[u8], num: u32) -> Vec<IndexEntry> {
    let record = INDEX_RECORD_SIZE as usize;
    let length = record * num as usize;
    let mut indexes = Vec::with_capacity(num as usize);
    for k in 0..num as usize {
        let off = length - (k + 1) * record;
        indexes.push(IndexEntry::unmarshal(&buf[off..off + record]));
    }
    indexes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_roundtrip() {
        let idx = IndexEntry {
            offset: 4096,
            length: 21,
            stime: 1_700_000_000_000,
        };
        let mut buf = [0u8; 16];
        idx.marshal_to(&mut buf);
        let back = IndexEntry::unmarshal(&buf);
        assert_eq!(back.offset, 4096);
        assert_eq!(back.length, 21);
        // Second precision survives.
        assert_eq!(back.stime, 1_700_000_000_000);
    }

    #[test]
    fn test_marshal_truncates_to_seconds() {
        let idx = IndexEntry {
            offset: 0,
            length: 8,
            stime: 1_700_000_000_999,
        };
        let mut buf = [0u8; 16];
        idx.marshal_to(&mut buf);
        assert_eq!(IndexEntry::unmarshal(&buf).stime, 1_700_000_000_000);
    }

    #[test]
    fn test_region_reverse_layout() {
        let indexes = vec![
            IndexEntry {
                offset: 4096,
                length: 5,
                stime: 0,
            },
            IndexEntry {
                offset: 4101,
                length: 6,
                stime: 0,
            },
        ];
        let buf = marshal_region(&indexes);
        assert_eq!(buf.len(), 32);
        // Record 0 occupies the last slot.
        assert_eq!(IndexEntry::unmarshal(&buf[16..32]).offset, 4096);
        assert_eq!(IndexEntry::unmarshal(&buf[0..16]).offset, 4101);

        let back = unmarshal_region(&buf, 2);
        assert_eq!(back[0].offset, 4096);
        assert_eq!(back[1].offset, 4101);
    }

    #[test]
    fn test_end_offset() {
        let idx = IndexEntry {
            offset: 100,
            length: 20,
            stime: 0,
        };
        assert_eq!(idx.end_offset(), 120);
    }
}

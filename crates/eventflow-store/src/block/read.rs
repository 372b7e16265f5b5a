//! Polling reads.
//!
//! A reader at the live end of a non-full block parks on the block's
//! entry-count watch channel instead of sleeping and re-polling; the
//! commit path publishes every extension through the same channel. The
//! wait is bounded by the caller's polling timeout, so an abandoned
//! call leaves nothing behind.

use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eventflow_core::entry::{Entry, LENGTH_PREFIX_SIZE};

use super::file::{run_blocking, Block};
use crate::error::{Error, Result};

impl Block {
    /// Reads up to `count` entries starting at logical index `start`.
    ///
    /// When `start` is at the live end of a non-full block, waits up to
    /// `polling_timeout` for an append to land. Fails with
    /// `OffsetExceeded` when the block is full and `start` is past its
    /// last entry, and with `OffsetOnEnd` when the wait expires.
    pub async fn read(
        &self,
        start: u32,
        count: usize,
        polling_timeout: Duration,
    ) -> Result<Vec<Entry>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let deadline = tokio::time::Instant::now() + polling_timeout;
        // Subscribe before snapshotting the cursor so an append landing
        // in between still wakes us.
        let mut count_rx = self.count_tx.subscribe();
        loop {
            let (number, full) = {
                let actx = self.actx.lock().unwrap();
                (actx.next_index, actx.full)
            };
            if start < number {
                let n = count.min((number - start) as usize);
                return self.read_range(start, n).await;
            }
            if full {
                return Err(Error::OffsetExceeded(start));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::OffsetOnEnd(start));
            }
            match tokio::time::timeout_at(deadline, count_rx.changed()).await {
                Ok(Ok(())) => continue,
                // Sender dropped: the block is going away.
                Ok(Err(_)) => return Err(Error::OffsetOnEnd(start)),
                Err(_) => return Err(Error::OffsetOnEnd(start)),
            }
        }
    }

    /// Reads `n` entries starting at `start`, all of which must already
    /// be committed. One contiguous positional read for the batch.
    async fn read_range(&self, start: u32, n: usize) -> Result<Vec<Entry>> {
        let slice = {
            let indexes = self.indexes.read().unwrap();
            let from = start as usize;
            let to = from + n;
            if to > indexes.len() {
                return Err(Error::OffsetExceeded(start));
            }
            indexes[from..to].to_vec()
        };
        let first = slice[0];
        let last = slice[n - 1];
        let base = first.offset;
        let length = (last.end_offset() - base) as usize;

        let file = Arc::clone(&self.file);
        let buf = run_blocking(move || {
            let mut buf = vec![0u8; length];
            file.read_exact_at(&mut buf, base as u64)?;
            Ok(buf)
        })
        .await?;

        let mut entries = Vec::with_capacity(n);
        for (i, idx) in slice.iter().enumerate() {
            let at = (idx.offset - base) as usize;
            let declared = Entry::payload_length(&buf[at..at + LENGTH_PREFIX_SIZE]) as i32;
            if declared + LENGTH_PREFIX_SIZE as i32 != idx.length {
                return Err(Error::Corrupted(format!(
                    "entry {} length {} does not match index {}",
                    start as usize + i,
                    declared,
                    idx.length
                )));
            }
            let payload_at = at + LENGTH_PREFIX_SIZE;
            let payload = Bytes::copy_from_slice(&buf[payload_at..payload_at + declared as usize]);
            entries.push(Entry {
                index: start + i as u32,
                offset: idx.offset as u32,
                stime: idx.stime,
                payload,
            });
        }
        Ok(entries)
    }
}

//! The two-phase append pipeline.
//!
//! An [`Appender`] exists only on the volume where a block is
//! leader-activated; it owns the block's live [`AppendContext`] and is
//! the single writer the block engine assumes. Each batch goes through:
//!
//! 1. **Prepare** — clone the context, assign `(offset, index)` to
//!    every entry, validate space, bump the live context.
//! 2. **Commit** — hand the assigned entries to the block for one
//!    contiguous positional write.
//!
//! If commit fails after a successful prepare, the live context is
//! rolled back to its pre-prepare snapshot, so the next batch re-uses
//! the same offsets and no gap appears.
//!
//! The appender also makes the fullness decision: a batch that does not
//! fit seals the block, so the heartbeat reports `is_full` and the
//! controller freezes the segment and cuts over to the next one.

use std::sync::Arc;

use bytes::Bytes;
use eventflow_core::{time, Entry};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::block::{AppendContext, Block};
use crate::error::{Error, Result};

pub struct Appender {
    block: Arc<Block>,
    ctx: Mutex<AppendContext>,
}

impl Appender {
    /// Takes over the block's current append context.
    pub fn new(block: Arc<Block>) -> Self {
        let ctx = block.append_ctx(None);
        Self {
            block,
            ctx: Mutex::new(ctx),
        }
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    /// Appends a batch of payloads, stamping each with the given born
    /// time. Returns the logical index assigned to each entry.
    pub async fn append(&self, payloads: Vec<Bytes>, stime: i64) -> Result<Vec<u32>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<Entry> = payloads
            .into_iter()
            .map(|p| Entry::with_stime(p, stime))
            .collect();

        let mut ctx = self.ctx.lock().await;
        if ctx.full {
            return Err(Error::Full);
        }
        let saved = *ctx;

        if let Err(e) = self.block.prepare_append(&mut ctx, &mut entries) {
            if matches!(e, Error::NotEnoughSpace { .. }) {
                // Fullness decision: this block takes no more batches.
                ctx.full = true;
                info!(block_id = %self.block.id(), "block sealed on exhausted capacity");
                self.block.mark_full().await?;
            }
            return Err(e);
        }

        let indices: Vec<u32> = entries.iter().map(|e| e.index).collect();
        match self.block.commit_append(entries).await {
            Ok(()) => {
                debug!(
                    block_id = %self.block.id(),
                    count = indices.len(),
                    next = ctx.next_index,
                    "batch committed"
                );
                Ok(indices)
            }
            Err(e) => {
                // Nothing of the batch is visible; retry from the same
                // offsets.
                *ctx = saved;
                Err(e)
            }
        }
    }

    /// Snapshot of the live context.
    pub async fn context(&self) -> AppendContext {
        *self.ctx.lock().await
    }

    /// Convenience append with the current wall clock as born time.
    pub async fn append_now(&self, payloads: Vec<Bytes>) -> Result<Vec<u32>> {
        self.append(payloads, time::now_ms()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    use eventflow_core::Id;

    async fn new_block(dir: &TempDir, capacity: u64) -> Arc<Block> {
        let path = dir.path().join("1.block");
        Arc::new(Block::create(Id(1), &path, capacity).await.unwrap())
    }

    #[tokio::test]
    async fn test_append_assigns_contiguous_indices() {
        let dir = TempDir::new().unwrap();
        let block = new_block(&dir, 65536).await;
        let appender = Appender::new(Arc::clone(&block));

        let first = appender
            .append(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")], 1)
            .await
            .unwrap();
        assert_eq!(first, vec![0, 1]);

        let second = appender
            .append(vec![Bytes::from_static(b"c")], 2)
            .await
            .unwrap();
        assert_eq!(second, vec![2]);
        assert_eq!(block.entry_count(), 3);
    }

    #[tokio::test]
    async fn test_append_empty_batch_is_noop() {
        let dir = TempDir::new().unwrap();
        let block = new_block(&dir, 65536).await;
        let appender = Appender::new(Arc::clone(&block));
        assert!(appender.append(Vec::new(), 1).await.unwrap().is_empty());
        assert_eq!(block.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_seals_block() {
        let dir = TempDir::new().unwrap();
        // Room for very little past the header.
        let block = new_block(&dir, 4096 + 64).await;
        let appender = Appender::new(Arc::clone(&block));

        let err = appender
            .append(vec![Bytes::from(vec![0u8; 128])], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotEnoughSpace { .. }));
        assert!(block.is_full());

        // Subsequent appends fail Full.
        let err = appender
            .append(vec![Bytes::from_static(b"x")], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Full));
    }

    #[tokio::test]
    async fn test_sealed_block_readable() {
        let dir = TempDir::new().unwrap();
        let block = new_block(&dir, 4096 + 80).await;
        let appender = Appender::new(Arc::clone(&block));

        appender
            .append(vec![Bytes::from_static(b"keep")], 5)
            .await
            .unwrap();
        let _ = appender.append(vec![Bytes::from(vec![0u8; 128])], 6).await;
        assert!(block.is_full());

        let entries = block.read(0, 10, Duration::ZERO).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, Bytes::from_static(b"keep"));
    }
}

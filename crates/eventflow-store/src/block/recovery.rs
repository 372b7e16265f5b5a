//! Volume-directory recovery.
//!
//! On startup a storage node opens every `*.block` file in its data
//! directory. Block IDs are the decimal file stems. A file that fails
//! to open aborts the whole recovery (the volume refuses to serve a
//! partially recovered directory); files with unparseable names are
//! skipped with a warning.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use eventflow_core::Id;
use tracing::{info, warn};

use super::file::Block;
use super::BLOCK_EXT;
use crate::error::Result;

/// Opens every block file under `dir`, creating the directory if
/// missing. On failure, closes the blocks opened so far and returns the
/// error.
pub async fn recover_dir(dir: impl AsRef<Path>) -> Result<HashMap<Id, Arc<Block>>> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;

    let mut blocks: HashMap<Id, Arc<Block>> = HashMap::new();
    let mut failure = None;
    let mut dirents = tokio::fs::read_dir(dir).await?;
    while let Some(dirent) = dirents.next_entry().await? {
        let path = dirent.path();
        if !dirent.file_type().await?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(BLOCK_EXT) {
            continue;
        }
        let id = match path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<Id>().ok())
        {
            Some(id) => id,
            None => {
                warn!(path = %path.display(), "skipping block file with unparseable name");
                continue;
            }
        };
        match Block::open(id, &path).await {
            Ok(block) => {
                blocks.insert(id, Arc::new(block));
            }
            Err(error) => {
                warn!(block_id = %id, %error, "failed to open block during recovery");
                failure = Some(error);
                break;
            }
        }
    }

    if let Some(error) = failure {
        for block in blocks.values() {
            let _ = block.close().await;
        }
        return Err(error);
    }

    info!(dir = %dir.display(), blocks = blocks.len(), "volume directory recovered");
    Ok(blocks)
}

/// The file path of a block inside a volume directory.
pub fn block_path(dir: &Path, id: Id) -> std::path::PathBuf {
    dir.join(format!("{id}.{BLOCK_EXT}"))
}

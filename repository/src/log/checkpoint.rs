//! Point-in-time copies of a table's primary log.
//!
//! Each checkpoint lives in `CheckPoints/<token>/` and holds the encoded
//! record table (`snapshot.log`) plus its metadata (`info.json`). The info
//! file is written last, so a directory without one is an interrupted
//! checkpoint and is ignored by recovery.

use chrono::{DateTime, Utc};
use postwatch_core::{RepositoryError, RepositoryResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const CHECKPOINT_DIR: &str = "CheckPoints";
pub const SNAPSHOT_FILE: &str = "snapshot.log";
pub const INFO_FILE: &str = "info.json";
pub const RETAINED_CHECKPOINTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub token: Uuid,
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub tail_address: u64,
    pub object_tail: u64,
    pub entry_count: u64,
}

impl CheckpointInfo {
    pub fn new(sequence: u64, tail_address: u64, object_tail: u64, entry_count: u64) -> Self {
        Self {
            token: Uuid::new_v4(),
            sequence,
            taken_at: Utc::now(),
            tail_address,
            object_tail,
            entry_count,
        }
    }
}

/// A checkpoint found on disk.
#[derive(Debug, Clone)]
pub struct StoredCheckpoint {
    pub info: CheckpointInfo,
    pub dir: PathBuf,
}

impl StoredCheckpoint {
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }
}

fn failed(table: &str, reason: impl ToString) -> RepositoryError {
    RepositoryError::CheckpointFailed {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

/// Writes `snapshot` and `info` under `table_dir` on the blocking pool.
pub async fn write_checkpoint(
    table: &str,
    table_dir: &Path,
    info: CheckpointInfo,
    snapshot: Vec<u8>,
) -> RepositoryResult<StoredCheckpoint> {
    let dir = table_dir
        .join(CHECKPOINT_DIR)
        .join(info.token.to_string());
    let table_name = table.to_string();

    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir).map_err(|e| failed(&table_name, e))?;
        std::fs::write(dir.join(SNAPSHOT_FILE), &snapshot).map_err(|e| failed(&table_name, e))?;
        let encoded = serde_json::to_vec_pretty(&info).map_err(|e| failed(&table_name, e))?;
        std::fs::write(dir.join(INFO_FILE), encoded).map_err(|e| failed(&table_name, e))?;
        Ok(StoredCheckpoint { info, dir })
    })
    .await
    .map_err(|e| failed(table, e))?
}

/// Complete checkpoints under `table_dir`, newest first.
pub async fn list_checkpoints(table_dir: &Path) -> RepositoryResult<Vec<StoredCheckpoint>> {
    let root = table_dir.join(CHECKPOINT_DIR);
    let mut found = Vec::new();

    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let dir = entry.path();
        let raw = match tokio::fs::read(dir.join(INFO_FILE)).await {
            Ok(raw) => raw,
            Err(_) => {
                debug!("Ignoring incomplete checkpoint {}", dir.display());
                continue;
            }
        };
        match serde_json::from_slice::<CheckpointInfo>(&raw) {
            Ok(info) => found.push(StoredCheckpoint { info, dir }),
            Err(e) => warn!("Ignoring unreadable checkpoint {}: {}", dir.display(), e),
        }
    }

    found.sort_by(|a, b| b.info.sequence.cmp(&a.info.sequence));
    Ok(found)
}

pub async fn latest_checkpoint(table_dir: &Path) -> RepositoryResult<Option<StoredCheckpoint>> {
    Ok(list_checkpoints(table_dir).await?.into_iter().next())
}

/// Removes all but the `keep` newest checkpoints.
pub async fn prune(table_dir: &Path, keep: usize) -> RepositoryResult<usize> {
    let stale: Vec<StoredCheckpoint> = list_checkpoints(table_dir)
        .await?
        .into_iter()
        .skip(keep)
        .collect();

    for checkpoint in &stale {
        if let Err(e) = tokio::fs::remove_dir_all(&checkpoint.dir).await {
            warn!(
                "Could not remove checkpoint {}: {}",
                checkpoint.dir.display(),
                e
            );
        }
    }
    Ok(stale.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_table() -> PathBuf {
        std::env::temp_dir().join(format!("postwatch_test_{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_latest_is_highest_sequence() {
        let dir = temp_table();
        for sequence in [3, 1, 2] {
            write_checkpoint("posts", &dir, CheckpointInfo::new(sequence, 0, 0, 0), vec![])
                .await
                .unwrap();
        }

        let latest = latest_checkpoint(&dir).await.unwrap().unwrap();
        assert_eq!(latest.info.sequence, 3);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let dir = temp_table();
        for sequence in 1..=4 {
            write_checkpoint("posts", &dir, CheckpointInfo::new(sequence, 0, 0, 0), vec![1])
                .await
                .unwrap();
        }

        assert_eq!(prune(&dir, RETAINED_CHECKPOINTS).await.unwrap(), 2);
        let sequences: Vec<u64> = list_checkpoints(&dir)
            .await
            .unwrap()
            .iter()
            .map(|c| c.info.sequence)
            .collect();
        assert_eq!(sequences, vec![4, 3]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_incomplete_checkpoint_is_ignored() {
        let dir = temp_table();
        let partial = dir.join(CHECKPOINT_DIR).join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&partial).unwrap();
        std::fs::write(partial.join(SNAPSHOT_FILE), [0u8; 32]).unwrap();

        assert!(latest_checkpoint(&dir).await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_missing_directory_has_no_checkpoints() {
        let dir = temp_table();
        assert!(list_checkpoints(&dir).await.unwrap().is_empty());
    }
}

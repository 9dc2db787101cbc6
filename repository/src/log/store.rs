use super::checkpoint::{self, CheckpointInfo, StoredCheckpoint, CHECKPOINT_DIR, RETAINED_CHECKPOINTS};
use super::session::SessionPool;
use postwatch_core::{Pagination, RepositoryError, RepositoryResult};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const RECORD_SIZE: u64 = 32;
pub const HEAD_ADDRESS: u64 = 0;

pub const PRIMARY_FILE: &str = "primary.log";
pub const OBJECT_FILE: &str = "object.log";

/// Fixed-size primary record pointing at a key and its current value in the
/// object log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub key_offset: u64,
    pub key_len: u32,
    pub value_offset: u64,
    pub value_len: u32,
    pub version: u64,
}

impl Slot {
    pub fn encode(&self) -> [u8; RECORD_SIZE as usize] {
        let mut buf = [0u8; RECORD_SIZE as usize];
        buf[0..8].copy_from_slice(&self.key_offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.key_len.to_le_bytes());
        buf[12..20].copy_from_slice(&self.value_offset.to_le_bytes());
        buf[20..24].copy_from_slice(&self.value_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.version.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != RECORD_SIZE as usize {
            return None;
        }
        Some(Self {
            key_offset: u64::from_le_bytes(buf[0..8].try_into().ok()?),
            key_len: u32::from_le_bytes(buf[8..12].try_into().ok()?),
            value_offset: u64::from_le_bytes(buf[12..20].try_into().ok()?),
            value_len: u32::from_le_bytes(buf[20..24].try_into().ok()?),
            version: u64::from_le_bytes(buf[24..32].try_into().ok()?),
        })
    }

    fn key_range(&self) -> Range<u64> {
        self.key_offset..self.key_offset + self.key_len as u64
    }

    fn value_range(&self) -> Range<u64> {
        self.value_offset..self.value_offset + self.value_len as u64
    }

    /// True when both ranges lie inside an object log of `object_tail` bytes.
    fn fits(&self, object_tail: u64) -> bool {
        self.key_range().end <= object_tail && self.value_range().end <= object_tail
    }
}

pub fn address_of(position: usize) -> u64 {
    HEAD_ADDRESS + position as u64 * RECORD_SIZE
}

/// Byte range of the primary log covered by `pagination`, clamped to `tail`.
/// `None` when the page starts at or past the tail.
pub fn address_range(tail: u64, pagination: Pagination) -> Option<Range<u64>> {
    let page_bytes = pagination.page_size as u64 * RECORD_SIZE;
    let page_start = HEAD_ADDRESS + (pagination.page as u64).saturating_sub(1) * page_bytes;
    if page_start >= tail {
        return None;
    }
    let page_end = (page_start + page_bytes).min(tail);
    Some(page_start..page_end)
}

#[derive(Default)]
struct TableState {
    slots: Vec<Slot>,
    keys: Vec<String>,
    index: HashMap<String, usize>,
    object_tail: u64,
}

impl TableState {
    fn tail_address(&self) -> u64 {
        address_of(self.slots.len())
    }

    fn entries(&self, positions: Range<usize>) -> Vec<(String, Slot)> {
        positions
            .filter_map(|pos| Some((self.keys.get(pos)?.clone(), *self.slots.get(pos)?)))
            .collect()
    }
}

struct Writer {
    primary: File,
    object: File,
    object_tail: u64,
}

impl Writer {
    async fn append_object(&mut self, bytes: &[u8]) -> std::io::Result<u64> {
        let offset = self.object_tail;
        self.object.seek(SeekFrom::Start(offset)).await?;
        self.object.write_all(bytes).await?;
        self.object.flush().await?;
        self.object_tail += bytes.len() as u64;
        Ok(offset)
    }

    async fn write_slot(&mut self, position: usize, slot: &Slot) -> std::io::Result<()> {
        self.primary
            .seek(SeekFrom::Start(address_of(position)))
            .await?;
        self.primary.write_all(&slot.encode()).await?;
        self.primary.flush().await
    }
}

/// One key/value table backed by a primary log of fixed-size records and an
/// append-only object log.
pub struct LogTable {
    name: String,
    dir: PathBuf,
    state: RwLock<TableState>,
    writer: Mutex<Writer>,
    sessions: SessionPool,
    next_sequence: AtomicU64,
}

impl LogTable {
    /// Opens `<root>/<name>/`, recovering from the newest checkpoint.
    pub async fn open(root: &Path, name: &str, session_pool_size: usize) -> RepositoryResult<Self> {
        let dir = root.join(name);
        tokio::fs::create_dir_all(dir.join(CHECKPOINT_DIR)).await?;
        let primary_path = dir.join(PRIMARY_FILE);
        let object_path = dir.join(OBJECT_FILE);

        let latest = checkpoint::latest_checkpoint(&dir).await?;
        let next_sequence = latest.as_ref().map_or(1, |c| c.info.sequence + 1);
        let state = match &latest {
            Some(stored) => recover(name, stored, &object_path).await?,
            None => TableState::default(),
        };

        let snapshot: Vec<u8> = state.slots.iter().flat_map(|s| s.encode()).collect();
        tokio::fs::write(&primary_path, &snapshot).await?;

        let primary = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&primary_path)
            .await?;
        let object = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&object_path)
            .await?;
        object.set_len(state.object_tail).await?;

        info!(
            table = name,
            entries = state.slots.len(),
            recovered = latest.is_some(),
            "Opened log table"
        );

        Ok(Self {
            name: name.to_string(),
            sessions: SessionPool::new(object_path, session_pool_size),
            writer: Mutex::new(Writer {
                primary,
                object,
                object_tail: state.object_tail,
            }),
            state: RwLock::new(state),
            dir,
            next_sequence: AtomicU64::new(next_sequence),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn tail_address(&self) -> u64 {
        self.state.read().await.tail_address()
    }

    fn storage(&self, e: std::io::Error) -> RepositoryError {
        RepositoryError::Storage {
            table: self.name.clone(),
            reason: e.to_string(),
        }
    }

    async fn read_value(&self, slot: &Slot) -> RepositoryResult<Vec<u8>> {
        let mut session = self.sessions.acquire().await?;
        session
            .read_at(slot.value_offset, slot.value_len as usize)
            .await
            .map_err(|e| self.storage(e))
    }

    async fn read_entries(&self, entries: Vec<(String, Slot)>) -> RepositoryResult<Vec<(String, Vec<u8>)>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let mut session = self.sessions.acquire().await?;
        let mut values = Vec::with_capacity(entries.len());
        for (key, slot) in entries {
            match session
                .read_at(slot.value_offset, slot.value_len as usize)
                .await
            {
                Ok(value) => values.push((key, value)),
                Err(e) => warn!(table = %self.name, key = %key, "Skipping unreadable record: {}", e),
            }
        }
        Ok(values)
    }

    pub async fn get(&self, key: &str) -> RepositoryResult<Option<Vec<u8>>> {
        let slot = {
            let state = self.state.read().await;
            state.index.get(key).and_then(|&pos| state.slots.get(pos).copied())
        };
        match slot {
            Some(slot) => Ok(Some(self.read_value(&slot).await?)),
            None => Ok(None),
        }
    }

    /// Entries on one page, in append order.
    pub async fn page(&self, pagination: Pagination) -> RepositoryResult<Vec<(String, Vec<u8>)>> {
        let entries = {
            let state = self.state.read().await;
            match address_range(state.tail_address(), pagination) {
                Some(range) => {
                    let first = ((range.start - HEAD_ADDRESS) / RECORD_SIZE) as usize;
                    let last = ((range.end - HEAD_ADDRESS) / RECORD_SIZE) as usize;
                    state.entries(first..last)
                }
                None => Vec::new(),
            }
        };
        self.read_entries(entries).await
    }

    /// Every entry, in append order.
    pub async fn scan(&self) -> RepositoryResult<Vec<(String, Vec<u8>)>> {
        let entries = {
            let state = self.state.read().await;
            state.entries(0..state.slots.len())
        };
        self.read_entries(entries).await
    }

    /// Read-modify-write of `key`. Returns the previous value. Identical
    /// values are not rewritten.
    pub async fn modify<F>(&self, key: &str, f: F) -> RepositoryResult<Option<Vec<u8>>>
    where
        F: FnOnce(Option<&[u8]>) -> Vec<u8>,
    {
        let mut writer = self.writer.lock().await;

        let (existing, next_position) = {
            let state = self.state.read().await;
            let existing = state
                .index
                .get(key)
                .and_then(|&pos| state.slots.get(pos).map(|slot| (pos, *slot)));
            (existing, state.slots.len())
        };
        let previous = match &existing {
            Some((_, slot)) => Some(self.read_value(slot).await?),
            None => None,
        };

        let value = f(previous.as_deref());
        if previous.as_deref() == Some(value.as_slice()) {
            return Ok(previous);
        }

        match existing {
            Some((position, slot)) => {
                let value_offset = writer
                    .append_object(&value)
                    .await
                    .map_err(|e| self.storage(e))?;
                let updated = Slot {
                    value_offset,
                    value_len: value.len() as u32,
                    version: slot.version + 1,
                    ..slot
                };
                writer
                    .write_slot(position, &updated)
                    .await
                    .map_err(|e| self.storage(e))?;

                let mut state = self.state.write().await;
                state.slots[position] = updated;
                state.object_tail = writer.object_tail;
            }
            None => {
                let key_offset = writer
                    .append_object(key.as_bytes())
                    .await
                    .map_err(|e| self.storage(e))?;
                let value_offset = writer
                    .append_object(&value)
                    .await
                    .map_err(|e| self.storage(e))?;
                let slot = Slot {
                    key_offset,
                    key_len: key.len() as u32,
                    value_offset,
                    value_len: value.len() as u32,
                    version: 1,
                };
                writer
                    .write_slot(next_position, &slot)
                    .await
                    .map_err(|e| self.storage(e))?;

                let mut state = self.state.write().await;
                state.slots.push(slot);
                state.keys.push(key.to_string());
                state.index.insert(key.to_string(), next_position);
                state.object_tail = writer.object_tail;
            }
        }

        Ok(previous)
    }

    pub async fn upsert(&self, key: &str, value: Vec<u8>) -> RepositoryResult<Option<Vec<u8>>> {
        self.modify(key, move |_| value).await
    }

    /// Snapshots the record table and writes it as a new checkpoint, then
    /// prunes old ones.
    pub async fn checkpoint(&self) -> RepositoryResult<CheckpointInfo> {
        let (slots, object_tail) = {
            let state = self.state.read().await;
            (state.slots.clone(), state.object_tail)
        };

        let snapshot: Vec<u8> = slots.iter().flat_map(|s| s.encode()).collect();
        let info = CheckpointInfo::new(
            self.next_sequence.fetch_add(1, Ordering::SeqCst),
            address_of(slots.len()),
            object_tail,
            slots.len() as u64,
        );

        let stored = checkpoint::write_checkpoint(&self.name, &self.dir, info, snapshot).await?;
        let pruned = checkpoint::prune(&self.dir, RETAINED_CHECKPOINTS).await?;
        debug!(
            table = %self.name,
            sequence = stored.info.sequence,
            entries = stored.info.entry_count,
            pruned,
            "Checkpoint written"
        );
        Ok(stored.info)
    }

    /// Waits for outstanding reads and refuses new ones.
    pub async fn close(&self) {
        self.sessions.drain().await;
        debug!(table = %self.name, "Log table closed");
    }
}

/// Rebuilds the record table from a checkpoint. Records whose key or value
/// fall outside the checkpointed object log are dropped.
async fn recover(
    table: &str,
    stored: &StoredCheckpoint,
    object_path: &Path,
) -> RepositoryResult<TableState> {
    let recovery_failed = |reason: String| RepositoryError::RecoveryFailed {
        table: table.to_string(),
        reason,
    };

    let snapshot = tokio::fs::read(stored.snapshot_path())
        .await
        .map_err(|e| recovery_failed(format!("snapshot unreadable: {}", e)))?;
    let object = match tokio::fs::read(object_path).await {
        Ok(object) => object,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(recovery_failed(format!("object log unreadable: {}", e))),
    };

    let object_tail = stored.info.object_tail;
    if (object.len() as u64) < object_tail {
        return Err(recovery_failed(format!(
            "object log holds {} bytes, checkpoint expects {}",
            object.len(),
            object_tail
        )));
    }

    let mut state = TableState {
        object_tail,
        ..TableState::default()
    };
    for (position, chunk) in snapshot.chunks(RECORD_SIZE as usize).enumerate() {
        let key = Slot::decode(chunk)
            .filter(|slot| slot.fits(object_tail))
            .and_then(|slot| {
                let range = slot.key_range();
                let key = object.get(range.start as usize..range.end as usize)?;
                Some((slot, String::from_utf8(key.to_vec()).ok()?))
            });
        match key {
            Some((slot, key)) => {
                state.index.insert(key.clone(), state.slots.len());
                state.slots.push(slot);
                state.keys.push(key);
            }
            None => {
                let error = RepositoryError::CorruptRecord {
                    table: table.to_string(),
                    address: address_of(position),
                };
                warn!("Skipping record during recovery: {}", error);
            }
        }
    }

    info!(
        table,
        sequence = stored.info.sequence,
        entries = state.slots.len(),
        "Recovered from checkpoint"
    );
    Ok(state)
}

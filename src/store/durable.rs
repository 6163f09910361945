use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Record, Wal};

use super::{EventStore, InMemoryStore, StoreError};

/// File-backed store: an in-memory index rebuilt from a write-ahead log.
///
/// Every mutation is fsynced before it becomes visible. The log is rewritten
/// from the index once `compact_threshold` appends have accumulated.
pub struct WalStore {
    index: InMemoryStore,
    wal: Mutex<Wal>,
    path: PathBuf,
    compact_threshold: u64,
}

impl WalStore {
    pub fn open(path: &Path, compact_threshold: u64) -> Result<Self, StoreError> {
        let index = InMemoryStore::new();
        let records = Wal::replay(path)?;
        let replayed = records.len();
        for record in records {
            match record {
                Record::Saved(event) => index.insert(event),
                Record::Deleted(id) => {
                    index.remove(&id);
                }
            }
        }
        info!(path = %path.display(), replayed, live = index.len(), "event log loaded");
        Ok(Self {
            index,
            wal: Mutex::new(Wal::open(path)?),
            path: path.to_path_buf(),
            compact_threshold,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    async fn append(&self, record: Record) -> Result<(), StoreError> {
        let mut wal = self.wal.lock().await;
        wal.append(&record)?;
        match record {
            Record::Saved(event) => self.index.insert(event),
            Record::Deleted(id) => {
                self.index.remove(&id);
            }
        }
        if self.compact_threshold > 0 && wal.appends_since_compact() >= self.compact_threshold {
            // The record above is already durable; a failed compaction only
            // leaves the log longer and is retried on the next append.
            let snapshot = self.index.snapshot();
            match wal.compact(&snapshot) {
                Ok(()) => debug!(live = snapshot.len(), "event log compacted"),
                Err(e) => warn!(path = %self.path.display(), "event log compaction failed: {e}"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for WalStore {
    async fn save(&self, event: &Event) -> Result<Ulid, StoreError> {
        self.append(Record::Saved(event.clone())).await?;
        Ok(event.id)
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        Ok(self.index.matching(filter))
    }

    async fn get(&self, id: Ulid) -> Result<Option<Event>, StoreError> {
        Ok(self.index.get(&id))
    }

    async fn delete(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.index.contains(&id) {
            return Ok(false);
        }
        self.append(Record::Deleted(id)).await?;
        Ok(true)
    }
}

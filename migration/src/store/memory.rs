use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::MigrationResult;
use crate::hash::{ContentDigest, RecordHasher};
use crate::store::base::{DestinationStore, GateStateStore, StatusStore, StoredRecord};
use crate::types::{MigrationStatus, SequenceRecord};

#[derive(Debug)]
struct Inner {
    records: HashMap<String, StoredRecord>,
    migration_status: Option<MigrationStatus>,
    reject_writes: Option<bool>,
}

/// In-memory implementation of every store trait.
///
/// Cloning shares the underlying data, which lets tests keep a handle on a store
/// moved into an orchestrator.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Inner {
            records: HashMap::new(),
            migration_status: None,
            reject_writes: None,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Number of stored records, tombstones included.
    pub async fn record_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.records.len()
    }

    /// Live records as `(key, value)` pairs, sorted by key.
    pub async fn live_records(&self) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.lock().await;

        let mut records: Vec<_> = inner
            .records
            .iter()
            .filter(|(_, record)| !record.is_deleted)
            .map(|(key, record)| (key.clone(), record.value.clone().unwrap_or_default()))
            .collect();
        records.sort();

        records
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationStore for MemoryStore {
    async fn apply_records(&self, records: Vec<SequenceRecord>) -> MigrationResult<u64> {
        let mut inner = self.inner.lock().await;

        let mut applied = 0;
        for record in records {
            let is_newer = inner
                .records
                .get(&record.key)
                .is_none_or(|stored| stored.version < record.version);
            if is_newer {
                let stored = StoredRecord::from(&record);
                inner.records.insert(record.key, stored);
                applied += 1;
            }
        }

        Ok(applied)
    }

    async fn get_record(&self, key: &str) -> MigrationResult<Option<StoredRecord>> {
        let inner = self.inner.lock().await;

        Ok(inner.records.get(key).cloned())
    }

    async fn compute_digest(&self) -> MigrationResult<ContentDigest> {
        let inner = self.inner.lock().await;

        let mut live: Vec<_> = inner
            .records
            .iter()
            .filter(|(_, record)| !record.is_deleted)
            .collect();
        live.sort_by_key(|(_, record)| record.version);

        let mut hasher = RecordHasher::new();
        for (key, record) in live {
            hasher.update_parts(key, record.value.as_deref());
        }

        Ok(hasher.finish())
    }
}

impl StatusStore for MemoryStore {
    async fn get_migration_status(&self) -> MigrationResult<Option<MigrationStatus>> {
        let inner = self.inner.lock().await;

        Ok(inner.migration_status.clone())
    }

    async fn store_migration_status(&self, status: MigrationStatus) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.migration_status = Some(status);

        Ok(())
    }
}

impl GateStateStore for MemoryStore {
    async fn load_reject_write_status(&self) -> MigrationResult<Option<bool>> {
        let inner = self.inner.lock().await;

        Ok(inner.reject_writes)
    }

    async fn save_reject_write_status(&self, reject_writes: bool) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.reject_writes = Some(reject_writes);

        Ok(())
    }
}

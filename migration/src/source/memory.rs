use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::MigrationResult;
use crate::source::log::KvsLog;
use crate::types::{SequenceNumber, SequenceRecord};

#[derive(Debug)]
struct Inner {
    /// Latest record of every key, indexed by its version.
    entries: BTreeMap<SequenceNumber, SequenceRecord>,
    /// Version at which each key currently lives.
    versions: HashMap<String, SequenceNumber>,
    first_sequence_number: SequenceNumber,
    next_sequence_number: SequenceNumber,
}

impl Inner {
    fn append(&mut self, mut record: SequenceRecord) -> SequenceNumber {
        let version = self.next_sequence_number;
        self.next_sequence_number += 1;

        if let Some(previous) = self.versions.insert(record.key.clone(), version) {
            self.entries.remove(&previous);
        }

        record.version = version;
        self.entries.insert(version, record);

        version
    }
}

/// In-memory [`KvsLog`], sequence numbers start at 0.
#[derive(Debug, Clone)]
pub struct MemoryKvsLog {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryKvsLog {
    pub fn new() -> Self {
        let inner = Inner {
            entries: BTreeMap::new(),
            versions: HashMap::new(),
            first_sequence_number: 0,
            next_sequence_number: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Drops every entry at or below `sequence_number` and advances the first
    /// retained sequence number past it.
    pub async fn truncate_through(&self, sequence_number: SequenceNumber) {
        let mut inner = self.inner.lock().await;

        let retained = inner.entries.split_off(&(sequence_number + 1));
        let dropped = std::mem::replace(&mut inner.entries, retained);
        for record in dropped.into_values() {
            inner.versions.remove(&record.key);
        }

        inner.first_sequence_number = inner.first_sequence_number.max(sequence_number + 1);
    }

    /// Number of keys with a live value.
    pub async fn live_key_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .entries
            .values()
            .filter(|record| !record.is_deleted)
            .count()
    }
}

impl Default for MemoryKvsLog {
    fn default() -> Self {
        Self::new()
    }
}

impl KvsLog for MemoryKvsLog {
    async fn first_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        let inner = self.inner.lock().await;

        Ok(inner.first_sequence_number)
    }

    async fn last_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        let inner = self.inner.lock().await;

        Ok(inner.next_sequence_number - 1)
    }

    async fn read_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
        limit: usize,
        include_deletes: bool,
    ) -> MigrationResult<Vec<SequenceRecord>> {
        if start > end {
            return Ok(Vec::new());
        }

        let inner = self.inner.lock().await;
        let records = inner
            .entries
            .range(start..=end)
            .map(|(_, record)| record)
            .filter(|record| include_deletes || !record.is_deleted)
            .take(limit)
            .cloned()
            .collect();

        Ok(records)
    }

    async fn get(&self, key: &str) -> MigrationResult<Option<Vec<u8>>> {
        let inner = self.inner.lock().await;

        let value = inner
            .versions
            .get(key)
            .and_then(|version| inner.entries.get(version))
            .filter(|record| !record.is_deleted)
            .and_then(|record| record.value.clone());

        Ok(value)
    }

    async fn put(&self, key: String, value: Vec<u8>) -> MigrationResult<SequenceNumber> {
        let mut inner = self.inner.lock().await;

        Ok(inner.append(SequenceRecord::live(0, key, value)))
    }

    async fn delete(&self, key: &str) -> MigrationResult<Option<SequenceNumber>> {
        let mut inner = self.inner.lock().await;

        let is_live = inner
            .versions
            .get(key)
            .and_then(|version| inner.entries.get(version))
            .is_some_and(|record| !record.is_deleted);
        if !is_live {
            return Ok(None);
        }

        Ok(Some(inner.append(SequenceRecord::tombstone(0, key))))
    }
}

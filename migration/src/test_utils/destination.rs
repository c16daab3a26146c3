use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::hash::ContentDigest;
use crate::store::base::{DestinationStore, StatusStore, StoredRecord};
use crate::test_utils::take_fault;
use crate::types::{MigrationPhase, MigrationStatus, SequenceRecord};

#[derive(Debug, Default)]
struct Faults {
    failing_applies: AtomicU32,
    corrupt_digest: AtomicBool,
    applied_records: AtomicU64,
    failing_status_writes: AtomicU32,
    failing_status_phase: Mutex<Option<MigrationPhase>>,
    phases: Mutex<Vec<MigrationPhase>>,
}

/// Wraps a destination to inject failures and record the persisted phases.
///
/// Clones share the injected faults and the recorded history.
#[derive(Debug, Clone)]
pub struct FaultInjectingDestinationStore<D> {
    inner: D,
    faults: Arc<Faults>,
}

impl<D> FaultInjectingDestinationStore<D> {
    pub fn wrap(inner: D) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Makes the next `n` applies fail with [`ErrorKind::DestinationIoError`].
    pub fn fail_next_applies(&self, n: u32) {
        self.faults.failing_applies.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` status writes in `phase` fail with
    /// [`ErrorKind::DestinationIoError`].
    pub async fn fail_status_writes_in(&self, phase: MigrationPhase, n: u32) {
        *self.faults.failing_status_phase.lock().await = Some(phase);
        self.faults.failing_status_writes.store(n, Ordering::SeqCst);
    }

    /// Makes every digest computed from now on disagree with the stored records.
    pub fn corrupt_digest(&self) {
        self.faults.corrupt_digest.store(true, Ordering::SeqCst);
    }

    /// Number of records handed to successful applies, duplicates included.
    pub fn applied_records(&self) -> u64 {
        self.faults.applied_records.load(Ordering::SeqCst)
    }

    /// Phases in the order they were persisted, consecutive repeats collapsed.
    pub async fn phase_history(&self) -> Vec<MigrationPhase> {
        self.faults.phases.lock().await.clone()
    }
}

impl<D> DestinationStore for FaultInjectingDestinationStore<D>
where
    D: DestinationStore + Send + Sync,
{
    async fn apply_records(&self, records: Vec<SequenceRecord>) -> MigrationResult<u64> {
        if take_fault(&self.faults.failing_applies) {
            bail!(
                ErrorKind::DestinationIoError,
                "Injected destination failure",
                format!("apply of {} records", records.len())
            );
        }

        let count = records.len() as u64;
        let applied = self.inner.apply_records(records).await?;
        self.faults.applied_records.fetch_add(count, Ordering::SeqCst);

        Ok(applied)
    }

    async fn get_record(&self, key: &str) -> MigrationResult<Option<StoredRecord>> {
        self.inner.get_record(key).await
    }

    async fn compute_digest(&self) -> MigrationResult<ContentDigest> {
        let mut digest = self.inner.compute_digest().await?;
        if self.faults.corrupt_digest.load(Ordering::SeqCst) {
            digest.record_count += 1;
        }

        Ok(digest)
    }
}

impl<D> StatusStore for FaultInjectingDestinationStore<D>
where
    D: StatusStore + Send + Sync,
{
    async fn get_migration_status(&self) -> MigrationResult<Option<MigrationStatus>> {
        self.inner.get_migration_status().await
    }

    async fn store_migration_status(&self, status: MigrationStatus) -> MigrationResult<()> {
        let phase = status.current_migration_phase;
        let failing_phase = *self.faults.failing_status_phase.lock().await;
        if failing_phase == Some(phase) && take_fault(&self.faults.failing_status_writes) {
            bail!(
                ErrorKind::DestinationIoError,
                "Injected destination failure",
                format!("status write in phase {phase}")
            );
        }

        self.inner.store_migration_status(status).await?;

        let mut phases = self.faults.phases.lock().await;
        if phases.last() != Some(&phase) {
            phases.push(phase);
        }

        Ok(())
    }
}

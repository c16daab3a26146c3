use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::enumeration::EnumerationService;
use crate::error::MigrationResult;
use crate::gate::{GateState, ReplicaRestarter, WriteGate};
use crate::source::base::{EnumerationStream, SequenceStore};
use crate::source::log::KvsLog;
use crate::store::base::GateStateStore;
use crate::types::{EnumerationRequest, SequenceNumber};

/// A source replica serving its log to migrations and client writes through
/// its [`WriteGate`].
#[derive(Debug)]
pub struct KvsService<L, G> {
    log: Arc<L>,
    enumeration: EnumerationService<L>,
    gate: WriteGate<G>,
}

impl<L, G> Clone for KvsService<L, G> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            enumeration: self.enumeration.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<L, G> KvsService<L, G>
where
    L: KvsLog + Send + Sync + 'static,
    G: GateStateStore + Send + Sync + 'static,
{
    pub fn new(log: Arc<L>, gate: WriteGate<G>) -> Self {
        Self {
            enumeration: EnumerationService::new(log.clone()),
            log,
            gate,
        }
    }

    /// Starts a replica over `log`, recovering the gate state persisted in `gate_store`.
    pub async fn start(
        log: Arc<L>,
        gate_store: G,
        restarter: Arc<dyn ReplicaRestarter>,
        drain_timeout: Duration,
    ) -> MigrationResult<Self> {
        let gate = WriteGate::recover(gate_store, restarter, drain_timeout).await?;

        Ok(Self::new(log, gate))
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub async fn get(&self, key: &str) -> MigrationResult<Option<Vec<u8>>> {
        self.log.get(key).await
    }

    /// Writes `value` under `key`, unless the gate rejects writes.
    pub async fn put(&self, key: String, value: Vec<u8>) -> MigrationResult<SequenceNumber> {
        let _write = self.gate.begin_write()?;
        let sequence_number = self.log.put(key, value).await?;
        debug!(sequence_number, "key written");

        Ok(sequence_number)
    }

    /// Deletes `key`, unless the gate rejects writes.
    pub async fn delete(&self, key: &str) -> MigrationResult<Option<SequenceNumber>> {
        let _write = self.gate.begin_write()?;

        self.log.delete(key).await
    }
}

impl<L, G> SequenceStore for KvsService<L, G>
where
    L: KvsLog + Send + Sync + 'static,
    G: GateStateStore + Send + Sync + 'static,
{
    async fn get_first_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.log.first_sequence_number().await
    }

    async fn get_last_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.log.last_sequence_number().await
    }

    async fn enumerate(&self, request: EnumerationRequest) -> MigrationResult<EnumerationStream> {
        self.enumeration.enumerate(request).await
    }

    async fn try_abort_existing_transactions_and_reject_writes(&self) -> MigrationResult<bool> {
        self.gate.reject_writes().await
    }

    async fn resume_writes(&self) -> MigrationResult<bool> {
        self.gate.resume_writes().await
    }
}

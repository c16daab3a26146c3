//! Write gate of a source replica.
//!
//! The gate sits in front of every client write. Once a migration enters
//! downtime the gate drains the writes in flight and refuses new ones until the
//! migration completes or rolls back and writes are resumed.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;
use crate::store::base::GateStateStore;

/// State of a [`WriteGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    AcceptingWrites,
    /// New writes are refused while the ones in flight finish.
    Draining,
    RejectingWrites,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Restarts the replica so that writes resume on a fresh primary.
#[async_trait]
pub trait ReplicaRestarter: fmt::Debug + Send + Sync {
    async fn restart(&self) -> MigrationResult<()>;
}

#[derive(Debug)]
struct Admission {
    state: GateState,
    in_flight: u64,
}

#[derive(Debug)]
struct Writes {
    admission: Mutex<Admission>,
    drained: Notify,
}

impl Writes {
    fn admission(&self) -> std::sync::MutexGuard<'_, Admission> {
        self.admission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: GateState) {
        self.admission().state = state;
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            let in_flight = self.admission().in_flight;
            if in_flight == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// Puts a draining gate back to accepting writes unless the reject is
/// committed. Covers a `reject_writes` future dropped mid-drain.
struct DrainGuard<'a> {
    writes: &'a Writes,
    committed: bool,
}

impl<'a> DrainGuard<'a> {
    fn start(writes: &'a Writes) -> Self {
        writes.set_state(GateState::Draining);
        Self {
            writes,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
        self.writes.set_state(GateState::RejectingWrites);
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.writes.set_state(GateState::AcceptingWrites);
        }
    }
}

/// A write admitted by the gate. The write counts as in flight until the guard
/// is dropped.
#[derive(Debug)]
pub struct WriteGuard {
    writes: Arc<Writes>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut admission = self.writes.admission();
        admission.in_flight -= 1;
        if admission.in_flight == 0 {
            self.writes.drained.notify_one();
        }
    }
}

#[derive(Debug)]
struct Shared<G> {
    writes: Arc<Writes>,
    transition: tokio::sync::Mutex<()>,
    store: G,
    restarter: Arc<dyn ReplicaRestarter>,
    drain_timeout: Duration,
}

/// Gate admitting or refusing writes on a source replica.
///
/// The reject flag is persisted through a [`GateStateStore`] so that a restarted
/// primary keeps refusing writes while the migration is in downtime.
#[derive(Debug)]
pub struct WriteGate<G> {
    shared: Arc<Shared<G>>,
}

impl<G> Clone for WriteGate<G> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<G> WriteGate<G>
where
    G: GateStateStore,
{
    /// Builds the gate of a (re)started replica from the persisted flag.
    ///
    /// A missing flag means writes are accepted. A crash between draining and
    /// persisting the flag therefore recovers as accepting writes.
    pub async fn recover(
        store: G,
        restarter: Arc<dyn ReplicaRestarter>,
        drain_timeout: Duration,
    ) -> MigrationResult<Self> {
        let state = match store.load_reject_write_status().await? {
            Some(true) => GateState::RejectingWrites,
            Some(false) | None => GateState::AcceptingWrites,
        };

        info!(%state, "write gate recovered");

        let writes = Writes {
            admission: Mutex::new(Admission {
                state,
                in_flight: 0,
            }),
            drained: Notify::new(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                writes: Arc::new(writes),
                transition: tokio::sync::Mutex::new(()),
                store,
                restarter,
                drain_timeout,
            }),
        })
    }

    pub fn state(&self) -> GateState {
        self.shared.writes.admission().state
    }

    /// Admits a write, failing with [`ErrorKind::WritesRejected`] unless the gate
    /// accepts writes.
    pub fn begin_write(&self) -> MigrationResult<WriteGuard> {
        let mut admission = self.shared.writes.admission();
        if admission.state != GateState::AcceptingWrites {
            return Err(migration_error!(
                ErrorKind::WritesRejected,
                "Writes are rejected while a migration is in progress",
                format!("write gate is {}", admission.state)
            ));
        }

        admission.in_flight += 1;

        Ok(WriteGuard {
            writes: self.shared.writes.clone(),
        })
    }

    /// Drains in-flight writes and starts rejecting writes.
    ///
    /// Returns `true` if writes are rejected when the call returns, `false` if the
    /// drain timed out and the gate went back to accepting writes.
    pub async fn reject_writes(&self) -> MigrationResult<bool> {
        let _transition = self.shared.transition.lock().await;
        let writes = &self.shared.writes;

        if writes.admission().state == GateState::RejectingWrites {
            return Ok(true);
        }
        let drain = DrainGuard::start(writes);

        let drained = tokio::time::timeout(self.shared.drain_timeout, writes.wait_drained())
            .await
            .is_ok();
        if !drained {
            drop(drain);
            warn!(
                drain_timeout_ms = self.shared.drain_timeout.as_millis() as u64,
                "in-flight writes did not drain in time, accepting writes again"
            );

            return Ok(false);
        }

        self.shared.store.save_reject_write_status(true).await?;

        drain.commit();
        info!("write gate is rejecting writes");

        Ok(true)
    }

    /// Accepts writes again and restarts the replica.
    ///
    /// Resuming a gate that already accepts writes is a no-op.
    pub async fn resume_writes(&self) -> MigrationResult<bool> {
        let _transition = self.shared.transition.lock().await;

        if self.state() == GateState::AcceptingWrites {
            return Ok(true);
        }

        self.shared.store.save_reject_write_status(false).await?;
        self.shared.writes.set_state(GateState::AcceptingWrites);
        info!("write gate is accepting writes, restarting replica");

        self.shared.restarter.restart().await?;

        Ok(true)
    }
}

use async_trait::async_trait;
use migration::concurrency::shutdown::ShutdownTx;
use migration::error::MigrationResult;
use migration::gate::ReplicaRestarter;
use tracing::{info, warn};

/// Restarts the replica by signalling its server to stop. The service then
/// brings up a fresh primary over the same log.
///
/// The server is stopped gracefully, so the request that resumed writes still
/// gets its response.
#[derive(Debug)]
pub struct ShutdownReplicaRestarter {
    shutdown_tx: ShutdownTx,
}

impl ShutdownReplicaRestarter {
    pub fn new(shutdown_tx: ShutdownTx) -> Self {
        Self { shutdown_tx }
    }
}

#[async_trait]
impl ReplicaRestarter for ShutdownReplicaRestarter {
    async fn restart(&self) -> MigrationResult<()> {
        info!("stopping the replica so that it restarts");

        if let Err(err) = self.shutdown_tx.shutdown() {
            warn!("failed to send restart signal: {err:?}");
        }

        Ok(())
    }
}

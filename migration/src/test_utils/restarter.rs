use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::MigrationResult;
use crate::gate::ReplicaRestarter;

/// A [`ReplicaRestarter`] that only counts how often it was asked to restart.
#[derive(Debug, Default)]
pub struct CountingReplicaRestarter {
    restarts: AtomicU32,
}

impl CountingReplicaRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicaRestarter for CountingReplicaRestarter {
    async fn restart(&self) -> MigrationResult<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

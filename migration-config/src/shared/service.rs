use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::{KvsConfig, MigrationConfig, StoreConfig, ValidationError};

/// Top-level configuration of a migration service process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Partition whose actor state is migrated.
    pub partition_id: Uuid,
    pub application: ApplicationConfig,
    pub role: ServiceRoleConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.store.validate()?;

        match &self.role {
            ServiceRoleConfig::Source { .. } => Ok(()),
            ServiceRoleConfig::Destination { migration } => migration.validate(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ApplicationConfig {
    pub host: String,
    pub port: u16,
}

/// The side of the migration a process serves.
///
/// The variant decides which routes the listener exposes and which components
/// are wired behind them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRoleConfig {
    /// Replica of the source key-value store, serving `/KvsMigration` and client traffic.
    Source {
        #[serde(default)]
        kvs: KvsConfig,
    },
    /// Replica of the destination store, running the orchestrator and serving `/RcMigration`.
    Destination { migration: MigrationConfig },
}

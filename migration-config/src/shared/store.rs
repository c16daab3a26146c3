use serde::{Deserialize, Serialize};

use crate::shared::{PgConnectionConfig, ValidationError};

/// Durable store backing the migration status, the destination records and
/// the write gate flag.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store, lost on restart.
    #[default]
    Memory,
    /// Postgres backed store.
    Postgres { connection: PgConnectionConfig },
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Postgres { connection } => connection.validate(),
        }
    }
}

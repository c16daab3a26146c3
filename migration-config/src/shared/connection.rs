use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Postgres database holding the durable store of a partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    pub password: Option<SerializableSecretString>,
    /// Disabled when absent.
    #[serde(default)]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tls.enabled && self.tls.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }

    /// sqlx options for the configured database, ignoring `~/.pgpass`.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.name);

        if let Some(password) = &self.password {
            options = options.password(password.expose());
        }

        if self.tls.enabled {
            options
                .ssl_mode(PgSslMode::VerifyFull)
                .ssl_root_cert_from_pem(self.tls.trusted_root_certs.as_bytes().to_vec())
        } else {
            options.ssl_mode(PgSslMode::Prefer)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    pub enabled: bool,
    /// PEM-encoded root certificates trusted when `enabled` is set.
    #[serde(default)]
    pub trusted_root_certs: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(tls: TlsConfig) -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "kvs_migration".to_string(),
            username: "postgres".to_string(),
            password: None,
            tls,
        }
    }

    #[test]
    fn enabled_tls_requires_root_certs() {
        let enabled = TlsConfig {
            enabled: true,
            trusted_root_certs: String::new(),
        };

        assert!(connection(TlsConfig::default()).validate().is_ok());
        assert!(matches!(
            connection(enabled).validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
    }
}

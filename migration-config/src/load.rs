use rust_cli_config::{Config, Environment as EnvironmentSource, File};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::environment::Environment;

const CONFIGURATION_DIR: &str = "configuration";

/// Errors raised while loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("failed to parse APP_ENVIRONMENT: {0}")]
    Environment(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] rust_cli_config::ConfigError),
}

/// Loads a configuration from the `configuration` directory of the working directory.
///
/// Later sources override earlier ones:
/// 1. `base.yaml`
/// 2. `{environment}.yaml`, if present
/// 3. `APP_`-prefixed environment variables, nested with `__`. For example
///    `APP_ROLE__DESTINATION__MIGRATION__WORKER_COUNT` sets
///    `role.destination.migration.worker_count`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&current_dir.join(CONFIGURATION_DIR), environment)
}

fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let environment_file = directory.join(format!("{}.yaml", environment.name()));

    let config = Config::builder()
        .add_source(File::from(directory.join("base.yaml")))
        .add_source(File::from(environment_file).required(false))
        .add_source(
            EnvironmentSource::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

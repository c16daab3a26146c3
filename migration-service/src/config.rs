use migration_config::load_config;
use migration_config::shared::ServiceConfig;

/// Loads the [`ServiceConfig`] and validates it.
pub fn load_service_config() -> anyhow::Result<ServiceConfig> {
    let config = load_config::<ServiceConfig>()?;
    config.validate()?;

    Ok(config)
}

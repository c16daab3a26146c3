use migration_config::shared::{ServiceConfig, ServiceRoleConfig};
use migration_service::config::load_service_config;
use migration_service::core::start_service_with_config;
use migration_telemetry::init_tracing_with_top_level_fields;
use tracing::error;

fn main() -> anyhow::Result<()> {
    let service_config = load_service_config()?;

    let role = match service_config.role {
        ServiceRoleConfig::Source { .. } => "source",
        ServiceRoleConfig::Destination { .. } => "destination",
    };
    let _log_flusher = init_tracing_with_top_level_fields(
        env!("CARGO_BIN_NAME"),
        Some(service_config.partition_id.to_string()),
        Some(role.to_string()),
    )?;

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(service_config))?;

    Ok(())
}

async fn async_main(service_config: ServiceConfig) -> anyhow::Result<()> {
    if let Err(err) = start_service_with_config(service_config).await {
        error!("an error occurred in the migration service: {err}");

        return Err(err);
    }

    Ok(())
}

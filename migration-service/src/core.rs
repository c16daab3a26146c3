use migration::concurrency::shutdown::create_shutdown_channel;
use migration::controller::MigrationController;
use migration::orchestrator::MigrationOrchestrator;
use migration::source::client::KvsServiceClient;
use migration::source::log::KvsLog;
use migration::source::memory::MemoryKvsLog;
use migration::source::postgres::PostgresKvsLog;
use migration::source::service::KvsService;
use migration::store::base::{DestinationStore, GateStateStore, StatusStore};
use migration::store::memory::MemoryStore;
use migration::store::postgres::PostgresStore;
use migration::types::PartitionId;
use migration_config::shared::{
    KvsConfig, MigrationConfig, PgConnectionConfig, ServiceConfig, ServiceRoleConfig,
    StoreConfig,
};
use std::future::Future;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use crate::migrations::migrate_store;
use crate::restarter::ShutdownReplicaRestarter;
use crate::startup::{Application, ControlServices, bind};

/// Starts the migration service with the provided configuration.
///
/// Initializes the store, then serves the role chosen in the configuration
/// until the process is asked to terminate.
pub async fn start_service_with_config(service_config: ServiceConfig) -> anyhow::Result<()> {
    info!("starting migration service");

    log_config(&service_config);

    let listener = bind(&service_config.application)?;

    // Static dispatch over the store keeps the components free of trait objects.
    match &service_config.store {
        StoreConfig::Memory => {
            let store = MemoryStore::new();
            let log = MemoryKvsLog::new();
            start_role(service_config.partition_id, service_config.role, listener, store, log)
                .await?;
        }
        StoreConfig::Postgres { connection } => {
            let store = init_postgres_store(service_config.partition_id, connection).await?;
            let log = PostgresKvsLog::new(service_config.partition_id, connection);
            start_role(service_config.partition_id, service_config.role, listener, store, log)
                .await?;
        }
    }

    info!("migration service stopped");

    Ok(())
}

fn log_config(config: &ServiceConfig) {
    debug!(
        partition_id = %config.partition_id,
        host = config.application.host,
        port = config.application.port,
        "service config"
    );
    log_store_config(&config.store);

    match &config.role {
        ServiceRoleConfig::Source { kvs } => log_kvs_config(kvs),
        ServiceRoleConfig::Destination { migration } => log_migration_config(migration),
    }
}

fn log_store_config(config: &StoreConfig) {
    match config {
        StoreConfig::Memory => debug!("using memory store config"),
        StoreConfig::Postgres { connection } => log_pg_connection_config(connection),
    }
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "store postgres connection config",
    );
}

fn log_kvs_config(config: &KvsConfig) {
    debug!(drain_timeout_ms = config.drain_timeout_ms, "source role config");
}

fn log_migration_config(config: &MigrationConfig) {
    debug!(
        worker_count = config.worker_count,
        downtime_threshold = config.downtime_threshold,
        chunk_size = config.chunk_size,
        items_per_enumeration = config.items_per_enumeration,
        kvs_endpoint = config.kvs_endpoint,
        checkpoint_interval_ms = config.checkpoint_interval_ms,
        request_timeout_ms = config.request_timeout_ms,
        "destination role config"
    );
}

/// Applies the store migrations and creates a [`PostgresStore`] for the partition.
async fn init_postgres_store(
    partition_id: PartitionId,
    connection: &PgConnectionConfig,
) -> anyhow::Result<PostgresStore> {
    migrate_store(connection).await?;

    Ok(PostgresStore::new(partition_id, connection))
}

/// Serves `role`. `log` backs the source role and is unused otherwise.
async fn start_role<St, L>(
    partition_id: PartitionId,
    role: ServiceRoleConfig,
    listener: TcpListener,
    store: St,
    log: L,
) -> anyhow::Result<()>
where
    St: DestinationStore + StatusStore + GateStateStore + Clone + Send + Sync + 'static,
    L: KvsLog + Send + Sync + 'static,
{
    match role {
        ServiceRoleConfig::Source { kvs } => start_source(listener, store, log, kvs).await,
        ServiceRoleConfig::Destination { migration } => {
            start_destination(partition_id, listener, store, migration).await
        }
    }
}

#[tracing::instrument(skip_all, fields(role = "source"))]
async fn start_source<G, L>(
    listener: TcpListener,
    gate_store: G,
    log: L,
    kvs: KvsConfig,
) -> anyhow::Result<()>
where
    G: GateStateStore + Clone + Send + Sync + 'static,
    L: KvsLog + Send + Sync + 'static,
{
    let drain_timeout = Duration::from_millis(kvs.drain_timeout_ms);

    run_source_replica(
        listener,
        gate_store,
        Arc::new(log),
        drain_timeout,
        wait_for_termination(),
    )
    .await
}

/// Serves the source log until `termination` completes.
///
/// Resuming writes restarts the replica: the server stops, then a fresh
/// primary comes up over the same log and recovers its gate from `gate_store`.
pub async fn run_source_replica<G, L, T>(
    listener: TcpListener,
    gate_store: G,
    log: Arc<L>,
    drain_timeout: Duration,
    termination: T,
) -> anyhow::Result<()>
where
    G: GateStateStore + Clone + Send + Sync + 'static,
    L: KvsLog + Send + Sync + 'static,
    T: Future<Output = ()>,
{
    tokio::pin!(termination);

    loop {
        let (restart_tx, mut restart_rx) = create_shutdown_channel();
        let restarter = Arc::new(ShutdownReplicaRestarter::new(restart_tx));

        let service =
            KvsService::start(log.clone(), gate_store.clone(), restarter, drain_timeout).await?;
        info!(gate_state = %service.gate_state(), "source replica started");

        let application = Application::build(
            listener.try_clone()?,
            ControlServices::Source(Arc::new(service)),
        )?;
        info!(port = application.port(), "serving source replica");

        let server_handle = application.handle();
        let server = tokio::spawn(application.run_until_stopped());

        let restart = tokio::select! {
            _ = &mut termination => false,
            _ = restart_rx.changed() => {
                info!("restart requested, stopping source replica");
                true
            }
        };

        server_handle.stop(true).await;
        server.await??;

        if !restart {
            return Ok(());
        }
    }
}

/// Runs the migration of the partition and serves its control routes until termination.
#[tracing::instrument(skip_all, fields(role = "destination", partition_id = %partition_id))]
async fn start_destination<D>(
    partition_id: PartitionId,
    listener: TcpListener,
    store: D,
    migration_config: MigrationConfig,
) -> anyhow::Result<()>
where
    D: DestinationStore + StatusStore + Clone + Send + Sync + 'static,
{
    let source = KvsServiceClient::new(
        &migration_config.kvs_endpoint,
        Duration::from_millis(migration_config.request_timeout_ms),
    )?;

    let controller = MigrationController::new(
        partition_id,
        migration_config.clone(),
        source.clone(),
        store.clone(),
    );
    let orchestrator = MigrationOrchestrator::new(partition_id, migration_config, source, store)?;
    let shutdown_tx = orchestrator.shutdown_tx();

    let application =
        Application::build(listener, ControlServices::Destination(Arc::new(controller)))?;
    info!(port = application.port(), "serving destination replica");

    let server_handle = application.handle();
    let server = tokio::spawn(application.run_until_stopped());
    let mut migration = tokio::spawn(orchestrator.run());

    // The control routes stay up after the migration finished, so that its
    // outcome can still be queried.
    let result = tokio::select! {
        result = &mut migration => {
            let result = result?;
            wait_for_termination().await;
            result
        }
        _ = wait_for_termination() => {
            if let Err(err) = shutdown_tx.shutdown() {
                warn!("failed to send shutdown signal: {err:?}");
            }
            migration.await?
        }
    };

    server_handle.stop(true).await;
    server.await??;

    match result {
        Ok(status) => {
            info!(
                phase = %status.current_migration_phase,
                applied_sequence_number = status.applied_sequence_number,
                "migration stopped"
            );

            Ok(())
        }
        Err(err) => {
            error!(error = %err, "migration failed");

            Err(err.into())
        }
    }
}

/// Waits for SIGTERM, sent by the hosting platform before killing the process,
/// or for SIGINT.
async fn wait_for_termination() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!("failed to register SIGTERM handler: {err}");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for SIGINT: {err}");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT (Ctrl+C) received, shutting down");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down");
        }
    }
}

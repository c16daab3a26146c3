use migration_config::shared::PgConnectionConfig;
use sqlx::{Executor, postgres::PgPoolOptions};
use tracing::info;

/// Number of database connections to use for the migration pool.
const NUM_POOL_CONNECTIONS: u32 = 1;

/// Creates the tables of the migration store.
///
/// The `kvs_migration` schema holds both the store tables and the `_sqlx_migrations`
/// metadata table, keeping the public schema untouched.
pub async fn migrate_store(connection_config: &PgConnectionConfig) -> Result<(), sqlx::Error> {
    let options = connection_config.connect_options();

    let pool = PgPoolOptions::new()
        .max_connections(NUM_POOL_CONNECTIONS)
        .min_connections(NUM_POOL_CONNECTIONS)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists kvs_migration;")
                    .await?;
                conn.execute("set search_path = 'kvs_migration';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying migrations in the migration store");

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await?;

    info!("migrations successfully applied in the migration store");

    Ok(())
}

use futures::TryStreamExt;
use migration_config::shared::PgConnectionConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::debug;

use crate::error::MigrationResult;
use crate::hash::{ContentDigest, RecordHasher};
use crate::store::base::{DestinationStore, GateStateStore, StatusStore, StoredRecord};
use crate::types::{MigrationStatus, PartitionId, SequenceRecord};

const NUM_POOL_CONNECTIONS: u32 = 4;

/// Postgres implementation of every store trait, scoped to one partition.
///
/// Tables live in the `kvs_migration` schema, created by the service migrations.
/// The pool connects lazily, so constructing a store never touches the database.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    partition_id: PartitionId,
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(partition_id: PartitionId, connection_config: &PgConnectionConfig) -> Self {
        let options = connection_config.connect_options();
        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .connect_lazy_with(options);

        Self::from_pool(partition_id, pool)
    }

    pub fn from_pool(partition_id: PartitionId, pool: PgPool) -> Self {
        Self { partition_id, pool }
    }
}

impl DestinationStore for PostgresStore {
    async fn apply_records(&self, records: Vec<SequenceRecord>) -> MigrationResult<u64> {
        let mut tx = self.pool.begin().await?;

        let mut applied = 0;
        for record in &records {
            let stored = StoredRecord::from(record);
            let result = sqlx::query(
                r#"
                insert into kvs_migration.destination_records (partition_id, key, version, value, is_deleted)
                values ($1, $2, $3, $4, $5)
                on conflict (partition_id, key) do update
                set version = excluded.version, value = excluded.value, is_deleted = excluded.is_deleted
                where kvs_migration.destination_records.version < excluded.version
                "#,
            )
            .bind(self.partition_id)
            .bind(&record.key)
            .bind(stored.version)
            .bind(stored.value)
            .bind(stored.is_deleted)
            .execute(&mut *tx)
            .await?;

            applied += result.rows_affected();
        }

        tx.commit().await?;

        debug!(records = records.len(), applied, "applied chunk to postgres");

        Ok(applied)
    }

    async fn get_record(&self, key: &str) -> MigrationResult<Option<StoredRecord>> {
        let row: Option<(i64, Option<Vec<u8>>, bool)> = sqlx::query_as(
            r#"
            select version, value, is_deleted
            from kvs_migration.destination_records
            where partition_id = $1 and key = $2
            "#,
        )
        .bind(self.partition_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(version, value, is_deleted)| StoredRecord {
            version,
            value,
            is_deleted,
        }))
    }

    async fn compute_digest(&self) -> MigrationResult<ContentDigest> {
        let mut rows = sqlx::query_as::<_, (String, Option<Vec<u8>>)>(
            r#"
            select key, value
            from kvs_migration.destination_records
            where partition_id = $1 and not is_deleted
            order by version
            "#,
        )
        .bind(self.partition_id)
        .fetch(&self.pool);

        let mut hasher = RecordHasher::new();
        while let Some((key, value)) = rows.try_next().await? {
            hasher.update_parts(&key, value.as_deref());
        }

        Ok(hasher.finish())
    }
}

impl StatusStore for PostgresStore {
    async fn get_migration_status(&self) -> MigrationResult<Option<MigrationStatus>> {
        let status: Option<Json<MigrationStatus>> = sqlx::query_scalar(
            r#"
            select status
            from kvs_migration.migration_status
            where partition_id = $1
            "#,
        )
        .bind(self.partition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.map(|Json(status)| status))
    }

    async fn store_migration_status(&self, status: MigrationStatus) -> MigrationResult<()> {
        sqlx::query(
            r#"
            insert into kvs_migration.migration_status (partition_id, status, updated_at)
            values ($1, $2, now())
            on conflict (partition_id) do update
            set status = excluded.status, updated_at = now()
            "#,
        )
        .bind(self.partition_id)
        .bind(Json(&status))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl GateStateStore for PostgresStore {
    async fn load_reject_write_status(&self) -> MigrationResult<Option<bool>> {
        let reject_writes: Option<bool> = sqlx::query_scalar(
            r#"
            select reject_writes
            from kvs_migration.write_gate
            where partition_id = $1
            "#,
        )
        .bind(self.partition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reject_writes)
    }

    async fn save_reject_write_status(&self, reject_writes: bool) -> MigrationResult<()> {
        sqlx::query(
            r#"
            insert into kvs_migration.write_gate (partition_id, reject_writes, updated_at)
            values ($1, $2, now())
            on conflict (partition_id) do update
            set reject_writes = excluded.reject_writes, updated_at = now()
            "#,
        )
        .bind(self.partition_id)
        .bind(reject_writes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

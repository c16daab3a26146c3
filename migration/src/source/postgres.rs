use migration_config::shared::PgConnectionConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::MigrationResult;
use crate::source::log::KvsLog;
use crate::types::{PartitionId, SequenceNumber, SequenceRecord};

const NUM_POOL_CONNECTIONS: u32 = 4;

/// Durable [`KvsLog`] of one partition, sequence numbers start at 0.
///
/// Every write bumps the partition row of `source_log_bounds` first, which
/// serializes writers and hands out gap-free sequence numbers. The log survives
/// replica restarts.
#[derive(Debug, Clone)]
pub struct PostgresKvsLog {
    partition_id: PartitionId,
    pool: PgPool,
}

impl PostgresKvsLog {
    pub fn new(partition_id: PartitionId, connection_config: &PgConnectionConfig) -> Self {
        let options = connection_config.connect_options();
        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .connect_lazy_with(options);

        Self { partition_id, pool }
    }

    /// Takes the next sequence number. The bounds row stays locked until `tx` ends.
    async fn next_sequence_number(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> MigrationResult<SequenceNumber> {
        let sequence_number: i64 = sqlx::query_scalar(
            r#"
            insert into kvs_migration.source_log_bounds (partition_id, first_sequence_number, next_sequence_number)
            values ($1, 0, 1)
            on conflict (partition_id) do update
            set next_sequence_number = kvs_migration.source_log_bounds.next_sequence_number + 1
            returning next_sequence_number - 1
            "#,
        )
        .bind(self.partition_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(sequence_number)
    }

    async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &SequenceRecord,
    ) -> MigrationResult<()> {
        sqlx::query(
            r#"
            insert into kvs_migration.source_log (partition_id, key, version, value, is_deleted)
            values ($1, $2, $3, $4, $5)
            on conflict (partition_id, key) do update
            set version = excluded.version, value = excluded.value, is_deleted = excluded.is_deleted
            "#,
        )
        .bind(self.partition_id)
        .bind(&record.key)
        .bind(record.version)
        .bind(record.value.as_deref())
        .bind(record.is_deleted)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

impl KvsLog for PostgresKvsLog {
    async fn first_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        let first: Option<i64> = sqlx::query_scalar(
            r#"
            select first_sequence_number
            from kvs_migration.source_log_bounds
            where partition_id = $1
            "#,
        )
        .bind(self.partition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(first.unwrap_or(0))
    }

    async fn last_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        let next: Option<i64> = sqlx::query_scalar(
            r#"
            select next_sequence_number
            from kvs_migration.source_log_bounds
            where partition_id = $1
            "#,
        )
        .bind(self.partition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(next.unwrap_or(0) - 1)
    }

    async fn read_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
        limit: usize,
        include_deletes: bool,
    ) -> MigrationResult<Vec<SequenceRecord>> {
        if start > end {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, i64, Option<Vec<u8>>, bool)> = sqlx::query_as(
            r#"
            select key, version, value, is_deleted
            from kvs_migration.source_log
            where partition_id = $1 and version between $2 and $3 and ($4 or not is_deleted)
            order by version
            limit $5
            "#,
        )
        .bind(self.partition_id)
        .bind(start)
        .bind(end)
        .bind(include_deletes)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|(key, version, value, is_deleted)| match value {
                Some(value) if !is_deleted => SequenceRecord::live(version, key, value),
                _ => SequenceRecord::tombstone(version, key),
            })
            .collect();

        Ok(records)
    }

    async fn get(&self, key: &str) -> MigrationResult<Option<Vec<u8>>> {
        let value: Option<Option<Vec<u8>>> = sqlx::query_scalar(
            r#"
            select value
            from kvs_migration.source_log
            where partition_id = $1 and key = $2 and not is_deleted
            "#,
        )
        .bind(self.partition_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.flatten())
    }

    async fn put(&self, key: String, value: Vec<u8>) -> MigrationResult<SequenceNumber> {
        let mut tx = self.pool.begin().await?;

        let sequence_number = self.next_sequence_number(&mut tx).await?;
        let record = SequenceRecord::live(sequence_number, key, value);
        self.append(&mut tx, &record).await?;

        tx.commit().await?;

        Ok(sequence_number)
    }

    async fn delete(&self, key: &str) -> MigrationResult<Option<SequenceNumber>> {
        let mut tx = self.pool.begin().await?;

        // Taken before the liveness check so that writers lock in the same order.
        let sequence_number = self.next_sequence_number(&mut tx).await?;

        let is_live: Option<bool> = sqlx::query_scalar(
            r#"
            select not is_deleted
            from kvs_migration.source_log
            where partition_id = $1 and key = $2
            "#,
        )
        .bind(self.partition_id)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
        if is_live != Some(true) {
            tx.rollback().await?;
            debug!(key, "delete of a missing key");

            return Ok(None);
        }

        let record = SequenceRecord::tombstone(sequence_number, key);
        self.append(&mut tx, &record).await?;

        tx.commit().await?;

        Ok(Some(sequence_number))
    }
}

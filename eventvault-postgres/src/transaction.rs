//! The PostgreSQL [`Transaction`] implementation.

use async_trait::async_trait;
use eventvault::{
    CheckpointRecord, GlobalPosition, Operation, PartitionKey, ProcessorId, ProjectionName,
    ReadEvent, StorageError, StorageLocation, StreamName, StreamVersion, StreamVersionUpdate,
    Transaction,
};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{query, Postgres, Row};
use tracing::{debug, instrument};

use crate::map_sqlx_error;
use crate::raw_sql::{SqlStatement, SqlValue};
use crate::rows::{from_db, to_db};
use crate::schema::{LocationTables, POSITION_LOCK_KEY};

/// Checkpoint rows store "no partition" as the empty string.
const NO_PARTITION: &str = "";

/// A transaction on a pooled PostgreSQL connection.
///
/// Dropping it without committing rolls it back.
pub struct PostgresTransaction {
    transaction: sqlx::Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

impl PostgresTransaction {
    pub(crate) const fn new(transaction: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { transaction }
    }

    /// Runs a parameterized statement and returns the number of affected rows.
    #[instrument(name = "postgres.execute", skip(self, params), fields(param_count = params.len()))]
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
        let statement = params.iter().fold(query(sql), bind_value);
        let result = statement
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Execute))?;
        Ok(result.rows_affected())
    }

    /// Runs a [`SqlStatement`].
    pub async fn execute_statement(
        &mut self,
        statement: &SqlStatement,
    ) -> Result<u64, StorageError> {
        self.execute(&statement.sql, &statement.params).await
    }

    async fn stream_version(
        &mut self,
        tables: &LocationTables,
        stream_name: &StreamName,
        lock: bool,
        operation: Operation,
    ) -> Result<Option<StreamVersion>, StorageError> {
        let sql = format!(
            "SELECT stream_version FROM {} WHERE stream_name = $1{}",
            tables.streams,
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = query(&sql)
            .bind(stream_name.to_string())
            .fetch_optional(&mut *self.transaction)
            .await
            .map_err(|error| map_sqlx_error(error, operation))?;

        row.map(|row| {
            let version: i64 = row
                .try_get("stream_version")
                .map_err(|error| map_sqlx_error(error, operation))?;
            Ok(StreamVersion::new(from_db(version, operation)?))
        })
        .transpose()
    }
}

fn bind_value<'q>(
    statement: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => statement.bind(None::<String>),
        SqlValue::Bool(value) => statement.bind(*value),
        SqlValue::Int(value) => statement.bind(*value),
        SqlValue::Float(value) => statement.bind(*value),
        SqlValue::Text(value) => statement.bind(value.as_str()),
        SqlValue::Json(value) => statement.bind(Json(value)),
        SqlValue::Uuid(value) => statement.bind(*value),
        SqlValue::Timestamp(value) => statement.bind(*value),
    }
}

fn partition_column(partition: Option<&PartitionKey>) -> &str {
    partition.map_or(NO_PARTITION, AsRef::as_ref)
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn read_stream_version(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
    ) -> Result<Option<StreamVersion>, StorageError> {
        let tables = LocationTables::resolve(location)?;
        self.stream_version(&tables, stream_name, true, Operation::ReadStreamVersion)
            .await
    }

    #[instrument(name = "postgres.update_stream_version", skip(self))]
    async fn update_stream_version(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        previous: Option<StreamVersion>,
        next: StreamVersion,
    ) -> Result<StreamVersionUpdate, StorageError> {
        const OPERATION: Operation = Operation::UpdateStreamVersion;
        let tables = LocationTables::resolve(location)?;
        let next_version = to_db(next.into(), OPERATION)?;

        let result = match previous {
            None => {
                let sql = format!(
                    "INSERT INTO {} (stream_name, stream_version) VALUES ($1, $2)
                     ON CONFLICT (stream_name) DO NOTHING",
                    tables.streams
                );
                query(&sql)
                    .bind(stream_name.to_string())
                    .bind(next_version)
                    .execute(&mut *self.transaction)
                    .await
            }
            Some(previous) => {
                let sql = format!(
                    "UPDATE {} SET stream_version = $2
                     WHERE stream_name = $1 AND stream_version = $3",
                    tables.streams
                );
                query(&sql)
                    .bind(stream_name.to_string())
                    .bind(next_version)
                    .bind(to_db(previous.into(), OPERATION)?)
                    .execute(&mut *self.transaction)
                    .await
            }
        }
        .map_err(|error| map_sqlx_error(error, OPERATION))?;

        if result.rows_affected() == 1 {
            return Ok(StreamVersionUpdate::Updated);
        }

        let actual = self
            .stream_version(&tables, stream_name, false, OPERATION)
            .await?
            .unwrap_or_else(StreamVersion::initial);
        debug!(
            stream = %stream_name,
            expected = ?previous,
            actual = %actual,
            "[postgres.update_stream_version] stream moved concurrently"
        );
        Ok(StreamVersionUpdate::Conflict { actual })
    }

    #[instrument(name = "postgres.reserve_global_positions", skip(self))]
    async fn reserve_global_positions(
        &mut self,
        count: usize,
    ) -> Result<Vec<GlobalPosition>, StorageError> {
        const OPERATION: Operation = Operation::ReserveGlobalPositions;
        if count == 0 {
            return Ok(Vec::new());
        }
        let count = i64::try_from(count)
            .map_err(|_| {
                StorageError::new(OPERATION, format!("cannot reserve {count} positions"))
            })?;

        query("SELECT pg_advisory_xact_lock($1)")
            .bind(POSITION_LOCK_KEY)
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let rows = query(
            "SELECT nextval('eventvault_global_position_seq') AS position
             FROM generate_series(1, $1) ORDER BY position",
        )
        .bind(count)
        .fetch_all(&mut *self.transaction)
        .await
        .map_err(|error| map_sqlx_error(error, OPERATION))?;

        rows.iter()
            .map(|row| {
                let position: i64 = row
                    .try_get("position")
                    .map_err(|error| map_sqlx_error(error, OPERATION))?;
                Ok(GlobalPosition::new(from_db(position, OPERATION)?))
            })
            .collect()
    }

    #[instrument(
        name = "postgres.append_events",
        skip(self, events),
        fields(event_count = events.len())
    )]
    async fn append_events(
        &mut self,
        location: &StorageLocation,
        events: &[ReadEvent],
    ) -> Result<(), StorageError> {
        const OPERATION: Operation = Operation::AppendEvents;
        let tables = LocationTables::resolve(location)?;
        let sql = format!(
            "INSERT INTO {} (event_id, stream_name, stream_position, global_position,
                             event_type, data, metadata, created)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            tables.events
        );

        for event in events {
            let metadata = serde_json::to_value(&event.event.metadata).map_err(|error| {
                StorageError::new(OPERATION, format!("event metadata: {error}"))
            })?;
            query(&sql)
                .bind(event.metadata.event_id)
                .bind(event.stream_name().to_string())
                .bind(to_db(event.stream_position().into(), OPERATION)?)
                .bind(to_db(event.global_position().into(), OPERATION)?)
                .bind(event.event_type().as_ref())
                .bind(Json(event.data()))
                .bind(Json(metadata))
                .bind(event.metadata.created)
                .execute(&mut *self.transaction)
                .await
                .map_err(|error| map_sqlx_error(error, OPERATION))?;
        }
        Ok(())
    }

    async fn read_projection(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        projection: &ProjectionName,
    ) -> Result<Option<Value>, StorageError> {
        let tables = LocationTables::resolve(location)?;
        let sql = format!(
            "SELECT document FROM {} WHERE stream_name = $1 AND projection = $2",
            tables.projections
        );
        let row = query(&sql)
            .bind(stream_name.to_string())
            .bind(projection.as_ref())
            .fetch_optional(&mut *self.transaction)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ReadProjection))?;

        row.map(|row| row.try_get::<Value, _>("document"))
            .transpose()
            .map_err(|error| map_sqlx_error(error, Operation::ReadProjection))
    }

    async fn write_projection(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        projection: &ProjectionName,
        document: Option<&Value>,
    ) -> Result<(), StorageError> {
        let tables = LocationTables::resolve(location)?;
        let statement = match document {
            Some(document) => {
                let sql = format!(
                    "INSERT INTO {} (stream_name, projection, document) VALUES ($1, $2, $3)
                     ON CONFLICT (stream_name, projection) DO UPDATE SET document = EXCLUDED.document",
                    tables.projections
                );
                query(&sql)
                    .bind(stream_name.to_string())
                    .bind(projection.as_ref())
                    .bind(Json(document))
                    .execute(&mut *self.transaction)
                    .await
            }
            None => {
                let sql = format!(
                    "DELETE FROM {} WHERE stream_name = $1 AND projection = $2",
                    tables.projections
                );
                query(&sql)
                    .bind(stream_name.to_string())
                    .bind(projection.as_ref())
                    .execute(&mut *self.transaction)
                    .await
            }
        };
        statement.map_err(|error| map_sqlx_error(error, Operation::WriteProjection))?;
        Ok(())
    }

    async fn read_document(
        &mut self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<Value>, StorageError> {
        let row = query(
            "SELECT document FROM eventvault_documents WHERE collection = $1 AND document_id = $2",
        )
        .bind(collection)
        .bind(document_id)
        .fetch_optional(&mut *self.transaction)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadDocument))?;

        row.map(|row| row.try_get::<Value, _>("document"))
            .transpose()
            .map_err(|error| map_sqlx_error(error, Operation::ReadDocument))
    }

    async fn write_document(
        &mut self,
        collection: &str,
        document_id: &str,
        document: Option<&Value>,
    ) -> Result<(), StorageError> {
        let result = match document {
            Some(document) => {
                query(
                    "INSERT INTO eventvault_documents (collection, document_id, document)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (collection, document_id)
                     DO UPDATE SET document = EXCLUDED.document, updated_at = now()",
                )
                .bind(collection)
                .bind(document_id)
                .bind(Json(document))
                .execute(&mut *self.transaction)
                .await
            }
            None => {
                query("DELETE FROM eventvault_documents WHERE collection = $1 AND document_id = $2")
                    .bind(collection)
                    .bind(document_id)
                    .execute(&mut *self.transaction)
                    .await
            }
        };
        result.map_err(|error| map_sqlx_error(error, Operation::WriteDocument))?;
        Ok(())
    }

    async fn read_checkpoint(
        &mut self,
        processor_id: &ProcessorId,
        partition: Option<&PartitionKey>,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        const OPERATION: Operation = Operation::ReadCheckpoint;
        let row = query(
            "SELECT version, last_processed_position FROM eventvault_checkpoints
             WHERE processor_id = $1 AND partition = $2",
        )
        .bind(processor_id.as_ref())
        .bind(partition_column(partition))
        .fetch_optional(&mut *self.transaction)
        .await
        .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i32 = row
            .try_get("version")
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        let position: i64 = row
            .try_get("last_processed_position")
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        Ok(Some(CheckpointRecord {
            processor_id: processor_id.clone(),
            partition: partition.cloned(),
            version: u32::try_from(version).map_err(|_| {
                StorageError::new(OPERATION, format!("negative checkpoint version {version}"))
            })?,
            last_processed_position: GlobalPosition::new(from_db(position, OPERATION)?),
        }))
    }

    #[instrument(
        name = "postgres.write_checkpoint",
        skip(self, record, previous),
        fields(processor_id = %record.processor_id)
    )]
    async fn write_checkpoint(
        &mut self,
        record: &CheckpointRecord,
        previous: Option<&CheckpointRecord>,
    ) -> Result<bool, StorageError> {
        const OPERATION: Operation = Operation::WriteCheckpoint;
        let version = i32::try_from(record.version).map_err(|_| {
            StorageError::new(OPERATION, format!("checkpoint version {} too large", record.version))
        })?;
        let position = to_db(record.last_processed_position.into(), OPERATION)?;

        let result = match previous {
            None => {
                query(
                    "INSERT INTO eventvault_checkpoints
                        (processor_id, partition, version, last_processed_position)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (processor_id, partition) DO NOTHING",
                )
                .bind(record.processor_id.as_ref())
                .bind(partition_column(record.partition.as_ref()))
                .bind(version)
                .bind(position)
                .execute(&mut *self.transaction)
                .await
            }
            Some(previous) => {
                let previous_version = i32::try_from(previous.version).map_err(|_| {
                    StorageError::new(
                        OPERATION,
                        format!("checkpoint version {} too large", previous.version),
                    )
                })?;
                query(
                    "UPDATE eventvault_checkpoints
                     SET version = $3, last_processed_position = $4, updated_at = now()
                     WHERE processor_id = $1 AND partition = $2
                       AND version = $5 AND last_processed_position = $6",
                )
                .bind(record.processor_id.as_ref())
                .bind(partition_column(record.partition.as_ref()))
                .bind(version)
                .bind(position)
                .bind(previous_version)
                .bind(to_db(previous.last_processed_position.into(), OPERATION)?)
                .execute(&mut *self.transaction)
                .await
            }
        }
        .map_err(|error| map_sqlx_error(error, OPERATION))?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<(), StorageError> {
        self.transaction
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction))
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.transaction
            .rollback()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::RollbackTransaction))
    }
}

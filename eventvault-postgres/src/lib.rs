//! PostgreSQL executor for `EventVault`.
//!
//! Locations are created lazily: the first append to a stream type creates
//! its events, stream version and projection tables. Global positions come
//! from one shared sequence and are reserved under a transaction-scoped
//! advisory lock, so they become visible in ascending order and a puller
//! never passes a position that is still about to commit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod raw_sql;
mod rows;
mod schema;
mod transaction;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventvault::{
    BatchSize, Executor, GlobalPosition, Operation, ReadEvent, ReadStreamOptions,
    ReadStreamResult, StorageError, StorageLocation, StreamName, StreamVersion,
};
use nutype::nutype;
use sqlx::{postgres::PgPoolOptions, query, Pool, Postgres, Row};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument, warn};

pub use raw_sql::{RawSqlProjection, SqlStatement, SqlValue};
pub use schema::DEFAULT_SCHEMA;
pub use transaction::PostgresTransaction;

use rows::{from_db, read_event, to_db, EVENT_COLUMNS};
use schema::{LocationTables, SCHEMA_LOCK_KEY, SHARED_SCHEMA};

/// Errors creating a [`PostgresExecutor`].
#[derive(Debug, Error)]
pub enum PostgresExecutorError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),
}

/// Maximum number of database connections in the pool.
///
/// Backed by `NonZeroU32`, so an empty pool cannot be configured.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration of the [`PostgresExecutor`] connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 =
            match std::num::NonZeroU32::new(10) {
                Some(v) => v,
                None => unreachable!(),
            };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl PostgresConfig {
    fn pool_options(&self) -> PgPoolOptions {
        let max_connections: std::num::NonZeroU32 = self.max_connections.into();
        PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

/// [`Executor`] over a `sqlx` PostgreSQL pool.
///
/// Clones share the pool and the one-time creation of the shared tables.
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: Pool<Postgres>,
    shared_schema: Arc<OnceCell<()>>,
}

impl PostgresExecutor {
    /// Connects with the default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresExecutorError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connects with a custom configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresExecutorError> {
        let connection_string = connection_string.into();
        let pool = config
            .pool_options()
            .connect(&connection_string)
            .await
            .map_err(PostgresExecutorError::ConnectionFailed)?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool.
    ///
    /// Use this when the pool is shared with other components.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            shared_schema: Arc::new(OnceCell::new()),
        }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Creates the sequence, location registry, checkpoint and document
    /// tables once per executor.
    async fn ensure_shared_schema(&self) -> Result<(), StorageError> {
        self.shared_schema
            .get_or_try_init(|| async {
                let mut transaction = self
                    .pool
                    .begin()
                    .await
                    .map_err(|error| map_sqlx_error(error, Operation::EnsureLocation))?;
                query("SELECT pg_advisory_xact_lock($1)")
                    .bind(SCHEMA_LOCK_KEY)
                    .execute(&mut *transaction)
                    .await
                    .map_err(|error| map_sqlx_error(error, Operation::EnsureLocation))?;
                for statement in SHARED_SCHEMA {
                    query(statement)
                        .execute(&mut *transaction)
                        .await
                        .map_err(|error| map_sqlx_error(error, Operation::EnsureLocation))?;
                }
                transaction
                    .commit()
                    .await
                    .map_err(|error| map_sqlx_error(error, Operation::EnsureLocation))?;
                info!("[postgres.ensure_schema] shared tables ready");
                Ok::<(), StorageError>(())
            })
            .await
            .map(|_| ())
    }

    async fn registered_locations(
        &self,
        operation: Operation,
    ) -> Result<Vec<LocationTables>, StorageError> {
        self.ensure_shared_schema().await?;
        let rows = query(
            "SELECT schema_name, location FROM eventvault_locations
             ORDER BY schema_name, location",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        rows.iter()
            .map(|row| {
                let schema: String = row
                    .try_get("schema_name")
                    .map_err(|error| map_sqlx_error(error, operation))?;
                let location: String = row
                    .try_get("location")
                    .map_err(|error| map_sqlx_error(error, operation))?;
                LocationTables::from_parts(&schema, &location)
            })
            .collect()
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    type Transaction = PostgresTransaction;

    fn connect_lazy(connection_string: &str) -> Result<Self, StorageError> {
        let pool = PostgresConfig::default()
            .pool_options()
            .connect_lazy(connection_string)
            .map_err(|error| map_sqlx_error(error, Operation::Connect))?;
        Ok(Self::from_pool(pool))
    }

    async fn begin(&self) -> Result<PostgresTransaction, StorageError> {
        self.ensure_shared_schema().await?;
        let transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;
        Ok(PostgresTransaction::new(transaction))
    }

    #[instrument(name = "postgres.ensure_location", skip(self), fields(location = %location))]
    async fn ensure_location(&self, location: &StorageLocation) -> Result<(), StorageError> {
        const OPERATION: Operation = Operation::EnsureLocation;
        let tables = LocationTables::resolve(location)?;
        self.ensure_shared_schema().await?;

        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *transaction)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        for statement in tables.create_statements() {
            query(&statement)
                .execute(&mut *transaction)
                .await
                .map_err(|error| map_sqlx_error(error, OPERATION))?;
        }
        query(
            "INSERT INTO eventvault_locations (schema_name, location) VALUES ($1, $2)
             ON CONFLICT (schema_name, location) DO NOTHING",
        )
        .bind(tables.schema.as_str())
        .bind(tables.location.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| map_sqlx_error(error, OPERATION))?;
        transaction
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        info!(
            location = %location,
            "[postgres.ensure_location] location ready"
        );
        Ok(())
    }

    #[instrument(name = "postgres.read_all", skip(self))]
    async fn read_all(
        &self,
        after: Option<GlobalPosition>,
        limit: BatchSize,
    ) -> Result<Vec<ReadEvent>, StorageError> {
        const OPERATION: Operation = Operation::ReadAll;
        let locations = self.registered_locations(OPERATION).await?;
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let after = after.map_or(Ok(0), |position| to_db(position.into(), OPERATION))?;
        let limit = i64::try_from(limit.into_inner())
            .map_err(|_| StorageError::new(OPERATION, "batch size does not fit in BIGINT"))?;
        let slices: Vec<String> = locations
            .iter()
            .map(|tables| {
                format!(
                    "(SELECT {EVENT_COLUMNS} FROM {} WHERE global_position > $1
                      ORDER BY global_position LIMIT $2)",
                    tables.events
                )
            })
            .collect();
        let sql = format!(
            "SELECT * FROM ({}) AS global_log ORDER BY global_position LIMIT $2",
            slices.join(" UNION ALL ")
        );

        let rows = query(&sql)
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        rows.iter().map(|row| read_event(row, OPERATION)).collect()
    }

    async fn last_global_position(&self) -> Result<Option<GlobalPosition>, StorageError> {
        const OPERATION: Operation = Operation::ReadAll;
        let locations = self.registered_locations(OPERATION).await?;
        if locations.is_empty() {
            return Ok(None);
        }

        let tails: Vec<String> = locations
            .iter()
            .map(|tables| {
                format!(
                    "SELECT MAX(global_position) AS global_position FROM {}",
                    tables.events
                )
            })
            .collect();
        let sql = format!(
            "SELECT MAX(global_position) AS position FROM ({}) AS tails",
            tails.join(" UNION ALL ")
        );

        let row = query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        let position: Option<i64> = row
            .try_get("position")
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        position
            .map(|position| Ok(GlobalPosition::new(from_db(position, OPERATION)?)))
            .transpose()
    }

    #[instrument(name = "postgres.read_stream", skip(self))]
    async fn read_stream(
        &self,
        location: &StorageLocation,
        stream_name: &StreamName,
        options: &ReadStreamOptions,
    ) -> Result<ReadStreamResult, StorageError> {
        const OPERATION: Operation = Operation::ReadStream;
        let tables = LocationTables::resolve(location)?;

        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *transaction)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let version_sql = format!(
            "SELECT stream_version FROM {} WHERE stream_name = $1",
            tables.streams
        );
        let version = query(&version_sql)
            .bind(stream_name.to_string())
            .fetch_optional(&mut *transaction)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        let Some(version) = version else {
            return Ok(ReadStreamResult::empty());
        };
        let version: i64 = version
            .try_get("stream_version")
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let from = options
            .from
            .map_or(Ok(1), |from| to_db(from.into(), OPERATION))?;
        let to = options
            .to
            .map_or(Ok(i64::MAX), |to| to_db(to.into(), OPERATION))?;
        let max_count = options
            .max_count
            .map(|count| {
                i64::try_from(count)
                    .map_err(|_| StorageError::new(OPERATION, "max_count does not fit in BIGINT"))
            })
            .transpose()?;

        let events_sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {} WHERE stream_name = $1
               AND stream_position BETWEEN $2 AND $3
             ORDER BY stream_position LIMIT $4",
            tables.events
        );
        let rows = query(&events_sql)
            .bind(stream_name.to_string())
            .bind(from)
            .bind(to)
            .bind(max_count)
            .fetch_all(&mut *transaction)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        transaction
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        Ok(ReadStreamResult {
            events: rows
                .iter()
                .map(|row| read_event(row, OPERATION))
                .collect::<Result<_, _>>()?,
            current_stream_version: StreamVersion::new(from_db(version, OPERATION)?),
            stream_exists: true,
        })
    }
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StorageError {
    if let sqlx::Error::Database(db_error) = &error {
        // 23505: unique violation, 40001: serialization failure
        if matches!(db_error.code().as_deref(), Some("23505" | "40001")) {
            warn!(
                error = %db_error,
                operation = %operation,
                "[postgres.write_conflict] concurrent write rejected by the database"
            );
            return StorageError::new(operation, db_error.to_string());
        }
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StorageError::new(operation, error.to_string())
}

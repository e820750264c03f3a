//! The narrow database interface the store and processors are written against.
//!
//! Backends implement [`Executor`] (pool-level operations) and
//! [`Transaction`] (everything that must happen atomically). The core never
//! sees a native client: every query it needs is a method here, so a backend
//! is free to use whatever schema and parameter binding it prefers.

use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use crate::checkpoint::CheckpointRecord;
use crate::errors::StorageError;
use crate::event::ReadEvent;
use crate::event_store::{ReadStreamOptions, ReadStreamResult};
use crate::storage::StorageLocation;
use crate::types::{
    BatchSize, GlobalPosition, PartitionKey, ProcessorId, ProjectionName, StreamName,
    StreamVersion,
};

/// Outcome of a conditional stream version write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamVersionUpdate {
    /// The version was claimed.
    Updated,
    /// Another writer changed the stream first.
    Conflict {
        /// The version written by the other writer.
        actual: StreamVersion,
    },
}

/// Pool-level access to a backend.
///
/// Executors are cheap to clone and shared by the event store, pullers and
/// processors.
#[async_trait]
pub trait Executor: Clone + Send + Sync + 'static {
    /// Transaction type produced by [`Executor::begin`].
    type Transaction: Transaction;

    /// Builds an executor from a connection string without connecting yet.
    fn connect_lazy(connection_string: &str) -> Result<Self, StorageError>;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Self::Transaction, StorageError>;

    /// Creates the location (and its unique stream name constraint) if missing.
    ///
    /// Idempotent.
    async fn ensure_location(&self, location: &StorageLocation) -> Result<(), StorageError>;

    /// Reads up to `limit` events of the global log with a position strictly
    /// greater than `after`, in ascending position order.
    async fn read_all(
        &self,
        after: Option<GlobalPosition>,
        limit: BatchSize,
    ) -> Result<Vec<ReadEvent>, StorageError>;

    /// Highest position in the global log, if any event was appended.
    async fn last_global_position(&self) -> Result<Option<GlobalPosition>, StorageError>;

    /// Reads the events of one stream in version order.
    async fn read_stream(
        &self,
        location: &StorageLocation,
        stream_name: &StreamName,
        options: &ReadStreamOptions,
    ) -> Result<ReadStreamResult, StorageError>;
}

/// Operations that run inside one database transaction.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// its writes.
#[async_trait]
pub trait Transaction: Send + Sized {
    /// Current version of a stream, locking it for the rest of the
    /// transaction. `None` when the stream has no events.
    async fn read_stream_version(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
    ) -> Result<Option<StreamVersion>, StorageError>;

    /// Moves a stream from `previous` to `next`, provided it is still at
    /// `previous` (`None` = the stream must not exist yet).
    async fn update_stream_version(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        previous: Option<StreamVersion>,
        next: StreamVersion,
    ) -> Result<StreamVersionUpdate, StorageError>;

    /// Reserves `count` ascending global positions after every position
    /// handed out before.
    async fn reserve_global_positions(
        &mut self,
        count: usize,
    ) -> Result<Vec<GlobalPosition>, StorageError>;

    /// Writes events whose positions were reserved by this transaction.
    async fn append_events(
        &mut self,
        location: &StorageLocation,
        events: &[ReadEvent],
    ) -> Result<(), StorageError>;

    /// Reads the inline projection document of a stream.
    async fn read_projection(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        projection: &ProjectionName,
    ) -> Result<Option<Value>, StorageError>;

    /// Writes an inline projection document; `None` deletes it.
    async fn write_projection(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        projection: &ProjectionName,
        document: Option<&Value>,
    ) -> Result<(), StorageError>;

    /// Reads a processor-owned document.
    async fn read_document(
        &mut self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<Value>, StorageError>;

    /// Writes a processor-owned document; `None` deletes it.
    async fn write_document(
        &mut self,
        collection: &str,
        document_id: &str,
        document: Option<&Value>,
    ) -> Result<(), StorageError>;

    /// Reads the stored checkpoint row, whatever its version.
    async fn read_checkpoint(
        &mut self,
        processor_id: &ProcessorId,
        partition: Option<&PartitionKey>,
    ) -> Result<Option<CheckpointRecord>, StorageError>;

    /// Writes `record` only if the stored row still equals `previous`
    /// (`None` = no row may exist). Returns false when another writer got
    /// there first.
    async fn write_checkpoint(
        &mut self,
        record: &CheckpointRecord,
        previous: Option<&CheckpointRecord>,
    ) -> Result<bool, StorageError>;

    /// Makes all writes of the transaction durable.
    async fn commit(self) -> Result<(), StorageError>;

    /// Discards all writes of the transaction.
    async fn rollback(self) -> Result<(), StorageError>;
}

/// Finishes a transaction from the result of the work done in it: commits on
/// `Ok`, rolls back on `Err`.
///
/// A failed rollback is logged and the original error returned.
pub async fn complete<T, R, Err>(transaction: T, result: Result<R, Err>) -> Result<R, Err>
where
    T: Transaction,
    Err: From<StorageError>,
{
    match result {
        Ok(value) => {
            transaction.commit().await?;
            Ok(value)
        }
        Err(failure) => {
            if let Err(rollback_error) = transaction.rollback().await {
                error!(
                    error = %rollback_error,
                    "[executor.complete] rollback failed after error"
                );
            }
            Err(failure)
        }
    }
}

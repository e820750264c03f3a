//! Error types for `eventvault`.
//!
//! The taxonomy separates what a caller can act on:
//!
//! - **`EventStoreError::Concurrency`**: the expected stream version did not
//!   match; re-read the stream and retry.
//! - **`ProcessorError::CheckpointConflict`**: another instance of the same
//!   processor advanced the checkpoint first; restart the processor so it
//!   re-reads its checkpoint.
//! - **`ProcessorError::Configuration`**: the processor has no way to reach the
//!   database; fatal for that processor instance.
//! - **`StorageError`**: the database failed. Nothing is retried internally,
//!   because a blind retry would skip re-validating the expected version or
//!   checkpoint the failed attempt was based on.
//!
//! A handler asking to stop is not an error; see
//! [`BatchOutcome::Stopped`](crate::processor::BatchOutcome::Stopped).

use std::fmt;

use thiserror::Error;

use crate::event::ExpectedStreamVersion;
use crate::processor::ProcessorStatus;
use crate::types::{
    GlobalPosition, PartitionKey, ProcessorId, ProjectionName, StreamName, StreamVersion,
};

/// Identifies the storage operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Opening a connection or pool.
    Connect,
    /// Creating shared tables, a location, or its indexes.
    EnsureLocation,
    /// Beginning a database transaction.
    BeginTransaction,
    /// Committing a database transaction.
    CommitTransaction,
    /// Rolling back a database transaction.
    RollbackTransaction,
    /// Reading the current version of a stream.
    ReadStreamVersion,
    /// Claiming the next version of a stream.
    UpdateStreamVersion,
    /// Reserving global positions for appended events.
    ReserveGlobalPositions,
    /// Writing appended events.
    AppendEvents,
    /// Reading the events of one stream.
    ReadStream,
    /// Reading a slice of the global log.
    ReadAll,
    /// Reading an inline projection document.
    ReadProjection,
    /// Writing or deleting an inline projection document.
    WriteProjection,
    /// Reading a processor-owned document.
    ReadDocument,
    /// Writing or deleting a processor-owned document.
    WriteDocument,
    /// Reading a processor checkpoint.
    ReadCheckpoint,
    /// Writing a processor checkpoint.
    WriteCheckpoint,
    /// Executing a raw statement.
    Execute,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::EnsureLocation => "ensure_location",
            Self::BeginTransaction => "begin_transaction",
            Self::CommitTransaction => "commit_transaction",
            Self::RollbackTransaction => "rollback_transaction",
            Self::ReadStreamVersion => "read_stream_version",
            Self::UpdateStreamVersion => "update_stream_version",
            Self::ReserveGlobalPositions => "reserve_global_positions",
            Self::AppendEvents => "append_events",
            Self::ReadStream => "read_stream",
            Self::ReadAll => "read_all",
            Self::ReadProjection => "read_projection",
            Self::WriteProjection => "write_projection",
            Self::ReadDocument => "read_document",
            Self::WriteDocument => "write_document",
            Self::ReadCheckpoint => "read_checkpoint",
            Self::WriteCheckpoint => "write_checkpoint",
            Self::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Failure reported by the underlying database.
///
/// Propagated unchanged to the caller of `append_to_stream`, `handle` or
/// `pull`; the core never retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} operation failed: {detail}")]
pub struct StorageError {
    /// The operation that failed.
    pub operation: Operation,
    /// Backend-specific description of the failure.
    pub detail: String,
}

impl StorageError {
    /// Creates a storage error for the given operation.
    pub fn new(operation: Operation, detail: impl Into<String>) -> Self {
        Self {
            operation,
            detail: detail.into(),
        }
    }
}

/// Failure of an inline or processor-driven projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The stored document could not be read as the projection's document type,
    /// or the evolved document could not be written back.
    #[error("projection document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The projection rejected an event.
    #[error("projection failed to evolve: {0}")]
    Evolve(String),
}

/// Errors returned by the event store write and read path.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream's current version did not satisfy the expected version.
    ///
    /// Nothing was written. Re-read the stream and retry with the new version.
    #[error("expected version {expected} for stream {stream}, but current version is {actual}")]
    Concurrency {
        /// The stream that was appended to.
        stream: StreamName,
        /// The precondition supplied by the caller.
        expected: ExpectedStreamVersion,
        /// The stream's version at commit time.
        actual: StreamVersion,
    },

    /// `append_to_stream` was called without events.
    #[error("no events to append to stream {stream}")]
    NoEventsToAppend {
        /// The stream that was appended to.
        stream: StreamName,
    },

    /// An inline projection failed, aborting the append.
    #[error("inline projection {projection} failed for stream {stream}")]
    Projection {
        /// The stream that was appended to.
        stream: StreamName,
        /// The failing projection.
        projection: ProjectionName,
        /// What went wrong.
        #[source]
        source: ProjectionError,
    },

    /// Event data or a stored document could not be (de)serialized.
    #[error("failed to (de)serialize data of stream {stream}: {detail}")]
    Serialization {
        /// The stream being read.
        stream: StreamName,
        /// Serializer message.
        detail: String,
    },

    /// The database failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EventStoreError {
    /// Returns true for expected-version conflicts, which callers usually retry.
    pub const fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

/// Error returned by a processor handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Creates a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a handler error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<StorageError> for HandlerError {
    fn from(error: StorageError) -> Self {
        Self::with_source("storage operation failed inside handler", error)
    }
}

impl From<ProjectionError> for HandlerError {
    fn from(error: ProjectionError) -> Self {
        Self::with_source("projection failed inside handler", error)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_source("handler could not (de)serialize data", error)
    }
}

/// Errors from the conditional checkpoint write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    /// The stored checkpoint no longer equals the caller's last known value.
    #[error("checkpoint moved concurrently: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// The value the caller based its write on.
        expected: Option<GlobalPosition>,
        /// The value found in storage.
        actual: Option<GlobalPosition>,
    },

    /// The database failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned by the processor runtime.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// No executor was configured and none was supplied by the caller.
    #[error("processor '{processor_id}' is missing connection information: {detail}")]
    Configuration {
        /// The misconfigured processor.
        processor_id: ProcessorId,
        /// What is missing.
        detail: String,
    },

    /// Another instance of the same processor advanced the checkpoint first.
    #[error(
        "checkpoint of processor '{processor_id}' moved concurrently: expected {expected:?}, found {actual:?}"
    )]
    CheckpointConflict {
        /// The racing processor.
        processor_id: ProcessorId,
        /// Checkpoint partition, if any.
        partition: Option<PartitionKey>,
        /// The value this instance based its write on.
        expected: Option<GlobalPosition>,
        /// The value found in storage.
        actual: Option<GlobalPosition>,
    },

    /// A handler failed; its transaction was rolled back.
    #[error("handler of processor '{processor_id}' failed at position {position}")]
    Handler {
        /// The failing processor.
        processor_id: ProcessorId,
        /// Global position of the message being handled.
        position: GlobalPosition,
        /// The handler's error.
        #[source]
        source: HandlerError,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("processor '{processor_id}' cannot {action} while {status}")]
    InvalidState {
        /// The processor.
        processor_id: ProcessorId,
        /// Its current status.
        status: ProcessorStatus,
        /// The rejected action.
        action: &'static str,
    },

    /// The database failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned by [`EventStoreConsumer`](crate::consumer::EventStoreConsumer).
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The consumer was run without processors.
    #[error("consumer has no processors to run")]
    NoProcessors,

    /// A processor failed; the run stopped.
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Pulling from the log failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_names_the_failed_operation() {
        let error = StorageError::new(Operation::ReserveGlobalPositions, "sequence missing");

        assert_eq!(
            error.to_string(),
            "reserve_global_positions operation failed: sequence missing"
        );
    }

    #[test]
    fn concurrency_error_reports_expected_and_actual() {
        let error = EventStoreError::Concurrency {
            stream: "shopping_cart:1".parse().expect("valid stream name"),
            expected: ExpectedStreamVersion::Exact(StreamVersion::new(0)),
            actual: StreamVersion::new(1),
        };

        assert!(error.is_concurrency_conflict());
        assert_eq!(
            error.to_string(),
            "expected version 0 for stream shopping_cart:1, but current version is 1"
        );
    }

    #[test]
    fn handler_error_keeps_its_source() {
        let error = HandlerError::from(StorageError::new(Operation::WriteDocument, "disk full"));

        let source = std::error::Error::source(&error).expect("source is kept");
        assert_eq!(source.to_string(), "write_document operation failed: disk full");
    }
}

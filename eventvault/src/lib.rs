//! `EventVault` - event store with checkpointed processors
//!
//! This library implements an append-only event log on top of a
//! transactional database. Streams are written with optimistic concurrency,
//! every event gets a store-wide global position, inline projections are
//! updated in the same transaction as the append, and processors consume the
//! log once each, advancing a checkpoint together with their side effects.
//!
//! The database is reached only through the [`Executor`] and [`Transaction`]
//! traits; see the `eventvault-memory` and `eventvault-postgres` crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod consumer;
pub mod errors;
pub mod event;
pub mod event_store;
pub mod executor;
pub mod processor;
pub mod projection;
pub mod puller;
pub mod storage;
pub mod types;

pub use checkpoint::{
    read_processor_checkpoint, store_processor_checkpoint, CheckpointRecord, StoreCheckpoint,
    StoreCheckpointResult, DEFAULT_CHECKPOINT_VERSION,
};
pub use consumer::{ConsumerOptions, EventStoreConsumer, ShutdownHandle};
pub use errors::{
    CheckpointError, ConsumerError, EventStoreError, HandlerError, Operation, ProcessorError,
    ProjectionError, StorageError,
};
pub use event::{Event, EventMetadata, ExpectedStreamVersion, ReadEvent, ReadEventMetadata};
pub use event_store::{
    AggregateStreamResult, AppendResult, EventStore, EventStoreOptions, ReadStreamOptions,
    ReadStreamResult,
};
pub use executor::{Executor, StreamVersionUpdate, Transaction};
pub use processor::{
    BatchHandler, BatchOutcome, HandlerContext, MessageHandler, MessageHandlerResult, Processor,
    ProcessorConnection, ProcessorHandler, ProcessorOptions, ProcessorStartFrom, ProcessorState,
    ProcessorStatus, StopRequest, TransactionScope,
};
pub use projection::{DocumentProjection, InlineProjection, InlineProjections, ProcessorProjection};
pub use puller::{BatchPullerOptions, MessageBatchPuller, StartFrom};
pub use storage::{StorageLocation, StorageResolver};
pub use types::{
    BatchSize, EventType, GlobalPosition, PartitionKey, ProcessorId, ProjectionName, StreamId,
    StreamName, StreamNameError, StreamType, StreamVersion,
};

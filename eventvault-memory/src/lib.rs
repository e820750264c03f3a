//! In-memory executor for `EventVault`
//!
//! This crate provides an in-memory implementation of the `Executor` and
//! `Transaction` traits from the eventvault crate, useful for testing and
//! development scenarios where persistence is not required.
//!
//! Transactions are serialized: `begin` takes an owned lock on the whole
//! store and stages writes on a copy of the stream versions, projections,
//! checkpoints and documents that `commit` swaps in. That copy grows with the
//! number of streams and documents. Appended events are buffered per
//! transaction and moved onto the global log at commit, so the log itself is
//! never copied. Global positions come from a counter outside the staged
//! copy, so a rolled back append burns its positions like a database sequence
//! would.
//!
//! Beginning a second transaction, or calling any other executor method,
//! while a transaction is open on the same task waits for that transaction
//! to finish and therefore never returns.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eventvault::checkpoint::CheckpointRecord;
use eventvault::errors::{Operation, StorageError};
use eventvault::event::ReadEvent;
use eventvault::event_store::{ReadStreamOptions, ReadStreamResult};
use eventvault::executor::{Executor, StreamVersionUpdate, Transaction};
use eventvault::storage::StorageLocation;
use eventvault::types::{
    BatchSize, GlobalPosition, PartitionKey, ProcessorId, ProjectionName, StreamName,
    StreamVersion,
};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type CheckpointKey = (ProcessorId, Option<PartitionKey>);

#[derive(Debug, Clone, Default)]
struct LocationState {
    versions: HashMap<StreamName, StreamVersion>,
    projections: HashMap<(StreamName, ProjectionName), Value>,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    location: StorageLocation,
    event: ReadEvent,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    locations: HashMap<StorageLocation, LocationState>,
    checkpoints: HashMap<CheckpointKey, CheckpointRecord>,
    documents: HashMap<(String, String), Value>,
}

impl StoreState {
    fn location(
        &self,
        location: &StorageLocation,
        operation: Operation,
    ) -> Result<&LocationState, StorageError> {
        self.locations
            .get(location)
            .ok_or_else(|| missing_location(location, operation))
    }

    fn location_mut(
        &mut self,
        location: &StorageLocation,
        operation: Operation,
    ) -> Result<&mut LocationState, StorageError> {
        self.locations
            .get_mut(location)
            .ok_or_else(|| missing_location(location, operation))
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: StoreState,
    // Global log, ascending by position
    log: Vec<StoredEvent>,
    last_position: u64,
}

fn missing_location(location: &StorageLocation, operation: Operation) -> StorageError {
    StorageError::new(
        operation,
        format!("storage location '{location}' does not exist"),
    )
}

/// Thread-safe in-memory executor for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutor {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryExecutor {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locations created so far.
    pub async fn locations(&self) -> Vec<StorageLocation> {
        let shared = self.shared.lock().await;
        shared.state.locations.keys().cloned().collect()
    }

    /// Location holding a stream, if the stream has events.
    pub async fn stream_location(&self, stream_name: &StreamName) -> Option<StorageLocation> {
        let shared = self.shared.lock().await;
        shared
            .state
            .locations
            .iter()
            .find(|(_, location)| location.versions.contains_key(stream_name))
            .map(|(location, _)| location.clone())
    }

    /// Number of events in the global log.
    pub async fn event_count(&self) -> usize {
        self.shared.lock().await.log.len()
    }

    /// Stored checkpoint row, whatever its version.
    pub async fn checkpoint(
        &self,
        processor_id: &ProcessorId,
        partition: Option<&PartitionKey>,
    ) -> Option<CheckpointRecord> {
        let shared = self.shared.lock().await;
        shared
            .state
            .checkpoints
            .get(&(processor_id.clone(), partition.cloned()))
            .cloned()
    }

    /// Stored processor document.
    pub async fn document(&self, collection: &str, document_id: &str) -> Option<Value> {
        let shared = self.shared.lock().await;
        shared
            .state
            .documents
            .get(&(collection.to_string(), document_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Executor for InMemoryExecutor {
    type Transaction = InMemoryTransaction;

    fn connect_lazy(_connection_string: &str) -> Result<Self, StorageError> {
        Err(StorageError::new(
            Operation::Connect,
            "the in-memory executor cannot be created from a connection string",
        ))
    }

    async fn begin(&self) -> Result<Self::Transaction, StorageError> {
        let guard = Arc::clone(&self.shared).lock_owned().await;
        let staged = guard.state.clone();
        Ok(InMemoryTransaction {
            guard,
            staged,
            appended: Vec::new(),
        })
    }

    async fn ensure_location(&self, location: &StorageLocation) -> Result<(), StorageError> {
        let mut shared = self.shared.lock().await;
        shared
            .state
            .locations
            .entry(location.clone())
            .or_insert_with(|| {
                debug!(location = %location, "[memory.ensure_location] location created");
                LocationState::default()
            });
        Ok(())
    }

    async fn read_all(
        &self,
        after: Option<GlobalPosition>,
        limit: BatchSize,
    ) -> Result<Vec<ReadEvent>, StorageError> {
        let shared = self.shared.lock().await;
        let log = &shared.log;
        let start = log.partition_point(|stored| Some(stored.event.global_position()) <= after);

        Ok(log[start..]
            .iter()
            .take(limit.into_inner())
            .map(|stored| stored.event.clone())
            .collect())
    }

    async fn last_global_position(&self) -> Result<Option<GlobalPosition>, StorageError> {
        let shared = self.shared.lock().await;
        Ok(shared.log.last().map(|stored| stored.event.global_position()))
    }

    async fn read_stream(
        &self,
        location: &StorageLocation,
        stream_name: &StreamName,
        options: &ReadStreamOptions,
    ) -> Result<ReadStreamResult, StorageError> {
        let shared = self.shared.lock().await;
        let Some(current) = shared
            .state
            .location(location, Operation::ReadStream)?
            .versions
            .get(stream_name)
            .copied()
        else {
            return Ok(ReadStreamResult::empty());
        };

        let events = shared
            .log
            .iter()
            .filter(|stored| &stored.location == location)
            .map(|stored| &stored.event)
            .filter(|event| event.stream_name() == stream_name)
            .filter(|event| options.contains(event.stream_position()))
            .take(options.max_count.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(ReadStreamResult {
            events,
            current_stream_version: current,
            stream_exists: true,
        })
    }
}

/// A serialized transaction over an [`InMemoryExecutor`].
///
/// Holds the store lock until it is committed, rolled back or dropped.
#[derive(Debug)]
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<Shared>,
    staged: StoreState,
    appended: Vec<StoredEvent>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn read_stream_version(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
    ) -> Result<Option<StreamVersion>, StorageError> {
        Ok(self
            .staged
            .location(location, Operation::ReadStreamVersion)?
            .versions
            .get(stream_name)
            .copied())
    }

    async fn update_stream_version(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        previous: Option<StreamVersion>,
        next: StreamVersion,
    ) -> Result<StreamVersionUpdate, StorageError> {
        let versions = &mut self
            .staged
            .location_mut(location, Operation::UpdateStreamVersion)?
            .versions;
        let current = versions.get(stream_name).copied();

        if current != previous {
            return Ok(StreamVersionUpdate::Conflict {
                actual: current.unwrap_or_else(StreamVersion::initial),
            });
        }
        versions.insert(stream_name.clone(), next);
        Ok(StreamVersionUpdate::Updated)
    }

    async fn reserve_global_positions(
        &mut self,
        count: usize,
    ) -> Result<Vec<GlobalPosition>, StorageError> {
        let last = GlobalPosition::new(self.guard.last_position);
        let positions: Vec<GlobalPosition> =
            std::iter::successors(Some(last.next()), |position| Some(position.next()))
                .take(count)
                .collect();
        if let Some(reserved) = positions.last() {
            self.guard.last_position = reserved.into_inner();
        }
        Ok(positions)
    }

    async fn append_events(
        &mut self,
        location: &StorageLocation,
        events: &[ReadEvent],
    ) -> Result<(), StorageError> {
        self.staged.location(location, Operation::AppendEvents)?;
        self.appended
            .extend(events.iter().cloned().map(|event| StoredEvent {
                location: location.clone(),
                event,
            }));
        Ok(())
    }

    async fn read_projection(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        projection: &ProjectionName,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .staged
            .location(location, Operation::ReadProjection)?
            .projections
            .get(&(stream_name.clone(), projection.clone()))
            .cloned())
    }

    async fn write_projection(
        &mut self,
        location: &StorageLocation,
        stream_name: &StreamName,
        projection: &ProjectionName,
        document: Option<&Value>,
    ) -> Result<(), StorageError> {
        let projections = &mut self
            .staged
            .location_mut(location, Operation::WriteProjection)?
            .projections;
        let key = (stream_name.clone(), projection.clone());
        match document {
            Some(document) => {
                projections.insert(key, document.clone());
            }
            None => {
                projections.remove(&key);
            }
        }
        Ok(())
    }

    async fn read_document(
        &mut self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .staged
            .documents
            .get(&(collection.to_string(), document_id.to_string()))
            .cloned())
    }

    async fn write_document(
        &mut self,
        collection: &str,
        document_id: &str,
        document: Option<&Value>,
    ) -> Result<(), StorageError> {
        let key = (collection.to_string(), document_id.to_string());
        match document {
            Some(document) => {
                self.staged.documents.insert(key, document.clone());
            }
            None => {
                self.staged.documents.remove(&key);
            }
        }
        Ok(())
    }

    async fn read_checkpoint(
        &mut self,
        processor_id: &ProcessorId,
        partition: Option<&PartitionKey>,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        Ok(self
            .staged
            .checkpoints
            .get(&(processor_id.clone(), partition.cloned()))
            .cloned())
    }

    async fn write_checkpoint(
        &mut self,
        record: &CheckpointRecord,
        previous: Option<&CheckpointRecord>,
    ) -> Result<bool, StorageError> {
        let key = (record.processor_id.clone(), record.partition.clone());
        if self.staged.checkpoints.get(&key) != previous {
            return Ok(false);
        }
        self.staged.checkpoints.insert(key, record.clone());
        Ok(true)
    }

    async fn commit(mut self) -> Result<(), StorageError> {
        self.guard.state = self.staged;
        self.guard.log.append(&mut self.appended);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventvault::event::{Event, ReadEventMetadata};
    use eventvault::types::EventType;

    fn location() -> StorageLocation {
        StorageLocation::new("stream_shopping_cart")
    }

    fn stream() -> StreamName {
        "shopping_cart:1".parse().expect("valid stream name")
    }

    fn read_event(position: GlobalPosition, stream_position: u64) -> ReadEvent {
        ReadEvent {
            event: Event::new(
                EventType::try_new("ProductItemAdded").expect("valid event type"),
                Value::Null,
            ),
            metadata: ReadEventMetadata {
                event_id: uuid::Uuid::now_v7(),
                stream_name: stream(),
                stream_position: StreamVersion::new(stream_position),
                global_position: position,
                created: chrono::Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn missing_location_is_a_storage_error() {
        let executor = InMemoryExecutor::new();
        let mut transaction = executor.begin().await.expect("begin");

        let result = transaction.read_stream_version(&location(), &stream()).await;

        assert!(matches!(
            result,
            Err(StorageError {
                operation: Operation::ReadStreamVersion,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn rolled_back_writes_are_discarded_but_positions_are_burned() {
        // Given
        let executor = InMemoryExecutor::new();
        executor.ensure_location(&location()).await.expect("ensure");

        // When
        let mut transaction = executor.begin().await.expect("begin");
        let burned = transaction
            .reserve_global_positions(2)
            .await
            .expect("reserve");
        transaction
            .append_events(&location(), &[read_event(burned[0], 1)])
            .await
            .expect("append");
        transaction.rollback().await.expect("rollback");

        let mut transaction = executor.begin().await.expect("begin");
        let next = transaction
            .reserve_global_positions(1)
            .await
            .expect("reserve");
        transaction.commit().await.expect("commit");

        // Then
        assert_eq!(executor.event_count().await, 0);
        assert_eq!(next, vec![GlobalPosition::new(3)]);
    }

    #[tokio::test]
    async fn committed_appends_extend_the_log_in_commit_order() {
        // Given
        let executor = InMemoryExecutor::new();
        executor.ensure_location(&location()).await.expect("ensure");

        // When: Two transactions each reserve and append one event
        for stream_position in 1..=2 {
            let mut transaction = executor.begin().await.expect("begin");
            let positions = transaction
                .reserve_global_positions(1)
                .await
                .expect("reserve");
            transaction
                .append_events(&location(), &[read_event(positions[0], stream_position)])
                .await
                .expect("append");
            transaction.commit().await.expect("commit");
        }

        // Then: Positions start at 1 and the log holds both events in order
        let log = executor
            .read_all(None, BatchSize::default_size())
            .await
            .expect("read all");
        let positions: Vec<GlobalPosition> = log.iter().map(ReadEvent::global_position).collect();
        assert_eq!(
            positions,
            vec![GlobalPosition::new(1), GlobalPosition::new(2)]
        );
        assert_eq!(executor.event_count().await, 2);
    }

    #[tokio::test]
    async fn stream_version_update_detects_stale_previous_version() {
        let executor = InMemoryExecutor::new();
        executor.ensure_location(&location()).await.expect("ensure");
        let mut transaction = executor.begin().await.expect("begin");

        let first = transaction
            .update_stream_version(&location(), &stream(), None, StreamVersion::new(1))
            .await
            .expect("update");
        let stale = transaction
            .update_stream_version(&location(), &stream(), None, StreamVersion::new(1))
            .await
            .expect("update");

        assert_eq!(first, StreamVersionUpdate::Updated);
        assert_eq!(
            stale,
            StreamVersionUpdate::Conflict {
                actual: StreamVersion::new(1)
            }
        );
    }

    #[tokio::test]
    async fn read_all_returns_events_after_position_up_to_limit() {
        // Given
        let executor = InMemoryExecutor::new();
        executor.ensure_location(&location()).await.expect("ensure");
        let mut transaction = executor.begin().await.expect("begin");
        let positions = transaction
            .reserve_global_positions(3)
            .await
            .expect("reserve");
        let events: Vec<ReadEvent> = positions
            .iter()
            .zip(1..)
            .map(|(position, stream_position)| read_event(*position, stream_position))
            .collect();
        transaction
            .append_events(&location(), &events)
            .await
            .expect("append");
        transaction.commit().await.expect("commit");

        // When
        let batch = executor
            .read_all(
                Some(GlobalPosition::new(1)),
                BatchSize::try_new(1).expect("valid batch size"),
            )
            .await
            .expect("read all");

        // Then
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].global_position(), GlobalPosition::new(2));
    }
}

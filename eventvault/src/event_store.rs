//! The stream append engine and stream reads.
//!
//! An append is one transaction: the stream's version is read (and locked),
//! checked against the caller's expectation, claimed with a conditional write,
//! global positions are reserved, the events are written, and every matching
//! inline projection is evolved. Either all of it commits or none of it does.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{EventStoreError, Operation, StorageError};
use crate::event::{Event, ExpectedStreamVersion, ReadEvent, ReadEventMetadata};
use crate::executor::{self, Executor, StreamVersionUpdate, Transaction};
use crate::projection::{InlineProjection, InlineProjections};
use crate::storage::{StorageLocation, StorageResolver};
use crate::types::{GlobalPosition, ProjectionName, StreamName, StreamVersion};

/// Configuration of an [`EventStore`].
#[derive(Debug, Default)]
pub struct EventStoreOptions {
    /// Stream type to storage location mapping.
    pub storage: StorageResolver,
    /// Projections evolved inside every append.
    pub inline_projections: InlineProjections,
}

impl EventStoreOptions {
    /// Replaces the storage resolver.
    #[must_use]
    pub fn with_storage(mut self, storage: StorageResolver) -> Self {
        self.storage = storage;
        self
    }

    /// Registers an inline projection.
    #[must_use]
    pub fn with_inline_projection<P: InlineProjection>(mut self, projection: P) -> Self {
        self.inline_projections.register(projection);
        self
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Version to expect for the next append to the stream.
    pub next_expected_stream_version: StreamVersion,
    /// Global position of the last appended event.
    pub last_event_global_position: GlobalPosition,
    /// True when this append created the stream.
    pub created_new_stream: bool,
}

/// Range of a stream to read. All bounds are inclusive stream positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// First stream position to return.
    pub from: Option<StreamVersion>,
    /// Last stream position to return.
    pub to: Option<StreamVersion>,
    /// Maximum number of events to return.
    pub max_count: Option<usize>,
}

impl ReadStreamOptions {
    /// Returns true if an event at `position` lies inside the range.
    pub fn contains(&self, position: StreamVersion) -> bool {
        self.from.map_or(true, |from| position >= from) && self.to.map_or(true, |to| position <= to)
    }
}

/// Events of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadStreamResult {
    /// Events in version order.
    pub events: Vec<ReadEvent>,
    /// Current version of the stream, independent of the requested range.
    pub current_stream_version: StreamVersion,
    /// True when the stream has at least one event.
    pub stream_exists: bool,
}

impl ReadStreamResult {
    /// Result for a stream without events.
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            current_stream_version: StreamVersion::initial(),
            stream_exists: false,
        }
    }
}

/// State folded from the events of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateStreamResult<S> {
    /// Folded state.
    pub state: S,
    /// Current version of the stream.
    pub current_stream_version: StreamVersion,
    /// True when the stream has at least one event.
    pub stream_exists: bool,
}

/// Append-only event store over an [`Executor`].
///
/// Cloning is cheap; clones share the executor, the projections and the set of
/// locations already ensured.
pub struct EventStore<E: Executor> {
    executor: E,
    storage: StorageResolver,
    inline_projections: Arc<InlineProjections>,
    ensured_locations: Arc<Mutex<HashSet<StorageLocation>>>,
}

impl<E: Executor> Clone for EventStore<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            storage: self.storage.clone(),
            inline_projections: Arc::clone(&self.inline_projections),
            ensured_locations: Arc::clone(&self.ensured_locations),
        }
    }
}

impl<E: Executor> EventStore<E> {
    /// Creates a store with the default per-stream-type layout and no
    /// projections.
    pub fn new(executor: E) -> Self {
        Self::with_options(executor, EventStoreOptions::default())
    }

    /// Creates a store with explicit options.
    pub fn with_options(executor: E, options: EventStoreOptions) -> Self {
        Self {
            executor,
            storage: options.storage,
            inline_projections: Arc::new(options.inline_projections),
            ensured_locations: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The underlying executor.
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Where the events of `stream_name` are stored.
    pub fn location_of(&self, stream_name: &StreamName) -> StorageLocation {
        self.storage.resolve(stream_name.stream_type())
    }

    async fn ensured_location(
        &self,
        stream_name: &StreamName,
    ) -> Result<StorageLocation, StorageError> {
        let location = self.location_of(stream_name);
        if self.ensured_locations.lock().contains(&location) {
            return Ok(location);
        }

        info!(
            location = %location,
            "[event_store.ensure_location] creating storage location"
        );
        self.executor.ensure_location(&location).await?;
        self.ensured_locations.lock().insert(location.clone());
        Ok(location)
    }

    /// Appends events to a stream if its version satisfies `expected`.
    ///
    /// On a mismatch nothing is written and
    /// [`EventStoreError::Concurrency`] reports the actual version.
    #[instrument(
        name = "event_store.append",
        skip(self, events),
        fields(stream = %stream_name, event_count = events.len())
    )]
    pub async fn append_to_stream(
        &self,
        stream_name: &StreamName,
        events: Vec<Event>,
        expected: ExpectedStreamVersion,
    ) -> Result<AppendResult, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::NoEventsToAppend {
                stream: stream_name.clone(),
            });
        }

        let location = self.ensured_location(stream_name).await?;
        let mut transaction = self.executor.begin().await?;
        let result = self
            .append_in_transaction(&mut transaction, &location, stream_name, events, expected)
            .await;
        let result = executor::complete(transaction, result).await;

        match &result {
            Ok(appended) => info!(
                stream = %stream_name,
                next_expected_stream_version = %appended.next_expected_stream_version,
                last_event_global_position = %appended.last_event_global_position,
                "[event_store.append] events appended"
            ),
            Err(EventStoreError::Concurrency {
                expected, actual, ..
            }) => warn!(
                stream = %stream_name,
                expected = %expected,
                actual = %actual,
                "[event_store.append] expected version mismatch"
            ),
            Err(failure) => error!(
                stream = %stream_name,
                error = %failure,
                "[event_store.append] append failed"
            ),
        }
        result
    }

    async fn append_in_transaction(
        &self,
        transaction: &mut E::Transaction,
        location: &StorageLocation,
        stream_name: &StreamName,
        events: Vec<Event>,
        expected: ExpectedStreamVersion,
    ) -> Result<AppendResult, EventStoreError> {
        let mut stored_version = transaction
            .read_stream_version(location, stream_name)
            .await?;

        // A lost claim means another writer committed first. The precondition
        // is checked again against the version it left behind.
        let (current, next) = loop {
            let current = stored_version.unwrap_or_else(StreamVersion::initial);
            if !expected.matches(current) {
                return Err(EventStoreError::Concurrency {
                    stream: stream_name.clone(),
                    expected,
                    actual: current,
                });
            }

            let next = current.advance_by(events.len());
            let actual = match transaction
                .update_stream_version(location, stream_name, stored_version, next)
                .await?
            {
                StreamVersionUpdate::Updated => break (current, next),
                StreamVersionUpdate::Conflict { actual } => actual,
            };

            let reread = transaction
                .read_stream_version(location, stream_name)
                .await?;
            if reread == stored_version {
                return Err(EventStoreError::Concurrency {
                    stream: stream_name.clone(),
                    expected,
                    actual,
                });
            }
            debug!(
                stream = %stream_name,
                expected = %expected,
                actual = %actual,
                "[event_store.append] stream claimed concurrently, checking again"
            );
            stored_version = reread;
        };

        let positions = transaction.reserve_global_positions(events.len()).await?;
        if positions.len() != events.len() {
            return Err(StorageError::new(
                Operation::ReserveGlobalPositions,
                format!(
                    "reserved {} positions for {} events",
                    positions.len(),
                    events.len()
                ),
            )
            .into());
        }

        let created = Utc::now();
        let read_events: Vec<ReadEvent> = events
            .into_iter()
            .zip(positions)
            .zip(1..)
            .map(|((event, global_position), offset)| ReadEvent {
                event,
                metadata: ReadEventMetadata {
                    event_id: Uuid::now_v7(),
                    stream_name: stream_name.clone(),
                    stream_position: current.advance_by(offset),
                    global_position,
                    created,
                },
            })
            .collect();

        transaction.append_events(location, &read_events).await?;

        if !self.inline_projections.is_empty() {
            self.inline_projections
                .apply(transaction, location, stream_name, &read_events)
                .await?;
        }

        let last_event_global_position = read_events
            .last()
            .map(ReadEvent::global_position)
            .ok_or_else(|| StorageError::new(Operation::AppendEvents, "no events were written"))?;

        Ok(AppendResult {
            next_expected_stream_version: next,
            last_event_global_position,
            created_new_stream: current.is_initial(),
        })
    }

    /// Reads the events of a stream.
    #[instrument(name = "event_store.read_stream", skip(self))]
    pub async fn read_stream(
        &self,
        stream_name: &StreamName,
        options: ReadStreamOptions,
    ) -> Result<ReadStreamResult, EventStoreError> {
        let location = self.ensured_location(stream_name).await?;
        let result = self
            .executor
            .read_stream(&location, stream_name, &options)
            .await?;

        debug!(
            stream = %stream_name,
            event_count = result.events.len(),
            current_stream_version = %result.current_stream_version,
            "[event_store.read_stream] stream read"
        );
        Ok(result)
    }

    /// Folds all events of a stream into a state.
    #[instrument(name = "event_store.aggregate_stream", skip(self, initial, evolve))]
    pub async fn aggregate_stream<S, F>(
        &self,
        stream_name: &StreamName,
        initial: S,
        evolve: F,
    ) -> Result<AggregateStreamResult<S>, EventStoreError>
    where
        F: Fn(S, &ReadEvent) -> S,
    {
        let read = self
            .read_stream(stream_name, ReadStreamOptions::default())
            .await?;
        let state = read.events.iter().fold(initial, evolve);

        Ok(AggregateStreamResult {
            state,
            current_stream_version: read.current_stream_version,
            stream_exists: read.stream_exists,
        })
    }

    /// Reads the document an inline projection keeps for a stream.
    #[instrument(name = "event_store.read_inline_projection", skip(self))]
    pub async fn read_inline_projection<D>(
        &self,
        stream_name: &StreamName,
        projection: &ProjectionName,
    ) -> Result<Option<D>, EventStoreError>
    where
        D: Serialize + DeserializeOwned,
    {
        let location = self.ensured_location(stream_name).await?;
        let mut transaction = self.executor.begin().await?;
        let document = transaction
            .read_projection(&location, stream_name, projection)
            .await;
        let document = executor::complete(transaction, document).await?;

        document
            .map(serde_json::from_value)
            .transpose()
            .map_err(|error| EventStoreError::Serialization {
                stream: stream_name.clone(),
                detail: error.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_options_bound_positions_inclusively() {
        let options = ReadStreamOptions {
            from: Some(StreamVersion::new(2)),
            to: Some(StreamVersion::new(3)),
            max_count: None,
        };

        assert!(!options.contains(StreamVersion::new(1)));
        assert!(options.contains(StreamVersion::new(2)));
        assert!(options.contains(StreamVersion::new(3)));
        assert!(!options.contains(StreamVersion::new(4)));
    }

    #[test]
    fn default_read_options_include_everything() {
        assert!(ReadStreamOptions::default().contains(StreamVersion::new(1)));
    }
}

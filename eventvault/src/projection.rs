//! Projections: read models derived from events.
//!
//! Two flavours exist:
//!
//! - **Inline projections** ([`InlineProjection`]) run inside the append
//!   transaction. The document of a stream is read, evolved once per handled
//!   event in batch order, and written back (or deleted) before the append
//!   commits. A failing evolve aborts the append.
//! - **Processor projections** ([`ProcessorProjection`]) run asynchronously in
//!   a checkpointed [`Processor`](crate::processor::Processor). The stock
//!   [`DocumentProjection`] evolves one document per id derived from each
//!   event.
//!
//! Either way, delivery is at least once, so `evolve` must be idempotent:
//! re-applying an event whose effect is already recorded must not change the
//! document again.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{EventStoreError, HandlerError, ProjectionError};
use crate::event::ReadEvent;
use crate::executor::{Executor, Transaction};
use crate::processor::HandlerContext;
use crate::storage::StorageLocation;
use crate::types::{EventType, ProjectionName, StreamName, StreamType};

/// A document evolved synchronously with every append to a stream.
pub trait InlineProjection: Send + Sync + 'static {
    /// Stored document type.
    type Document: Serialize + DeserializeOwned + Send;

    /// Unique name of the projection; part of the document key.
    fn name(&self) -> &ProjectionName;

    /// Event types this projection evolves on.
    fn can_handle(&self) -> &[EventType];

    /// Restricts the projection to some stream types. Defaults to all.
    fn handles_stream_type(&self, _stream_type: &StreamType) -> bool {
        true
    }

    /// Computes the next document. Returning `None` deletes the document.
    fn evolve(
        &self,
        document: Option<Self::Document>,
        event: &ReadEvent,
    ) -> Result<Option<Self::Document>, ProjectionError>;
}

trait ErasedInlineProjection: Send + Sync {
    fn name(&self) -> &ProjectionName;
    fn can_handle(&self) -> &[EventType];
    fn handles_stream_type(&self, stream_type: &StreamType) -> bool;
    fn evolve(&self, document: Option<Value>, event: &ReadEvent)
        -> Result<Option<Value>, ProjectionError>;
}

struct Erased<P>(P);

impl<P: InlineProjection> ErasedInlineProjection for Erased<P> {
    fn name(&self) -> &ProjectionName {
        self.0.name()
    }

    fn can_handle(&self) -> &[EventType] {
        self.0.can_handle()
    }

    fn handles_stream_type(&self, stream_type: &StreamType) -> bool {
        self.0.handles_stream_type(stream_type)
    }

    fn evolve(
        &self,
        document: Option<Value>,
        event: &ReadEvent,
    ) -> Result<Option<Value>, ProjectionError> {
        let document: Option<P::Document> =
            document.map(serde_json::from_value).transpose()?;
        self.0
            .evolve(document, event)?
            .map(serde_json::to_value)
            .transpose()
            .map_err(ProjectionError::from)
    }
}

/// The inline projections registered with an event store.
#[derive(Default)]
pub struct InlineProjections {
    projections: Vec<Box<dyn ErasedInlineProjection>>,
}

impl InlineProjections {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a projection.
    pub fn register<P: InlineProjection>(&mut self, projection: P) {
        self.projections.push(Box::new(Erased(projection)));
    }

    /// Number of registered projections.
    pub fn len(&self) -> usize {
        self.projections.len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    /// Evolves every matching projection of `stream_name` with freshly
    /// appended events, inside the append transaction.
    pub(crate) async fn apply<T: Transaction>(
        &self,
        transaction: &mut T,
        location: &StorageLocation,
        stream_name: &StreamName,
        events: &[ReadEvent],
    ) -> Result<(), EventStoreError> {
        for projection in &self.projections {
            if !projection.handles_stream_type(stream_name.stream_type()) {
                continue;
            }

            let handled: Vec<&ReadEvent> = events
                .iter()
                .filter(|event| projection.can_handle().contains(event.event_type()))
                .collect();
            if handled.is_empty() {
                continue;
            }

            let mut document = transaction
                .read_projection(location, stream_name, projection.name())
                .await?;
            for event in handled {
                document = projection.evolve(document, event).map_err(|source| {
                    EventStoreError::Projection {
                        stream: stream_name.clone(),
                        projection: projection.name().clone(),
                        source,
                    }
                })?;
            }

            debug!(
                stream = %stream_name,
                projection = %projection.name(),
                deleted = document.is_none(),
                "[event_store.inline_projection] writing projection document"
            );
            transaction
                .write_projection(location, stream_name, projection.name(), document.as_ref())
                .await?;
        }
        Ok(())
    }
}

impl fmt::Debug for InlineProjections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.projections.iter().map(|projection| projection.name()))
            .finish()
    }
}

/// A projection driven by a [`Processor`](crate::processor::Processor).
///
/// Only events whose type is listed in `can_handle` are passed to `handle`;
/// the processor still checkpoints past the others.
#[async_trait]
pub trait ProcessorProjection<E: Executor>: Send + Sync {
    /// Name of the projection. The default processor id is `projection:<name>`.
    fn name(&self) -> &ProjectionName;

    /// Event types this projection handles.
    fn can_handle(&self) -> &[EventType];

    /// Applies events inside the processor's transaction.
    async fn handle(
        &self,
        events: &[ReadEvent],
        context: &mut HandlerContext<'_, E>,
    ) -> Result<(), HandlerError>;
}

/// Processor projection keeping one JSON document per id in a collection.
///
/// `document_id` derives the document key from an event; `evolve` computes
/// the next document (`None` deletes it).
pub struct DocumentProjection<D, K, F> {
    name: ProjectionName,
    can_handle: Vec<EventType>,
    collection: String,
    document_id: K,
    evolve: F,
    document: PhantomData<fn() -> D>,
}

impl<D, K, F> DocumentProjection<D, K, F>
where
    D: Serialize + DeserializeOwned + Send,
    K: Fn(&ReadEvent) -> String + Send + Sync,
    F: Fn(Option<D>, &ReadEvent) -> Result<Option<D>, ProjectionError> + Send + Sync,
{
    /// Creates a projection storing its documents in `collection`.
    pub fn new(
        name: ProjectionName,
        can_handle: Vec<EventType>,
        collection: impl Into<String>,
        document_id: K,
        evolve: F,
    ) -> Self {
        Self {
            name,
            can_handle,
            collection: collection.into(),
            document_id,
            evolve,
            document: PhantomData,
        }
    }

    /// Collection holding the documents.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl<E, D, K, F> ProcessorProjection<E> for DocumentProjection<D, K, F>
where
    E: Executor,
    D: Serialize + DeserializeOwned + Send,
    K: Fn(&ReadEvent) -> String + Send + Sync,
    F: Fn(Option<D>, &ReadEvent) -> Result<Option<D>, ProjectionError> + Send + Sync,
{
    fn name(&self) -> &ProjectionName {
        &self.name
    }

    fn can_handle(&self) -> &[EventType] {
        &self.can_handle
    }

    async fn handle(
        &self,
        events: &[ReadEvent],
        context: &mut HandlerContext<'_, E>,
    ) -> Result<(), HandlerError> {
        for event in events {
            let document_id = (self.document_id)(event);
            let current = context
                .transaction
                .read_document(&self.collection, &document_id)
                .await?
                .map(serde_json::from_value::<D>)
                .transpose()?;

            let next = (self.evolve)(current, event)?
                .map(|document| serde_json::to_value(&document))
                .transpose()?;

            context
                .transaction
                .write_document(&self.collection, &document_id, next.as_ref())
                .await?;
        }
        Ok(())
    }
}

impl<D, K, F> fmt::Debug for DocumentProjection<D, K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentProjection")
            .field("name", &self.name)
            .field("can_handle", &self.can_handle)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;
    use uuid::Uuid;

    use crate::event::{Event, ReadEventMetadata};
    use crate::types::{GlobalPosition, StreamVersion};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u64,
    }

    struct CountingProjection {
        name: ProjectionName,
        can_handle: Vec<EventType>,
    }

    impl InlineProjection for CountingProjection {
        type Document = Counter;

        fn name(&self) -> &ProjectionName {
            &self.name
        }

        fn can_handle(&self) -> &[EventType] {
            &self.can_handle
        }

        fn evolve(
            &self,
            document: Option<Counter>,
            _event: &ReadEvent,
        ) -> Result<Option<Counter>, ProjectionError> {
            let count = document.map_or(0, |counter| counter.count);
            Ok(Some(Counter { count: count + 1 }))
        }
    }

    fn read_event() -> ReadEvent {
        ReadEvent {
            event: Event::new(
                EventType::try_new("Ticked").expect("valid event type"),
                json!({}),
            ),
            metadata: ReadEventMetadata {
                event_id: Uuid::now_v7(),
                stream_name: "clock:1".parse().expect("valid stream name"),
                stream_position: StreamVersion::new(1),
                global_position: GlobalPosition::new(1),
                created: Utc::now(),
            },
        }
    }

    #[test]
    fn erased_projection_round_trips_documents_through_json() {
        let erased = Erased(CountingProjection {
            name: ProjectionName::try_new("counter").expect("valid name"),
            can_handle: vec![EventType::try_new("Ticked").expect("valid event type")],
        });

        let first = erased.evolve(None, &read_event()).expect("evolves");
        let second = erased.evolve(first, &read_event()).expect("evolves");

        assert_eq!(second, Some(json!({ "count": 2 })));
    }

    #[test]
    fn erased_projection_rejects_malformed_documents() {
        let erased = Erased(CountingProjection {
            name: ProjectionName::try_new("counter").expect("valid name"),
            can_handle: Vec::new(),
        });

        let result = erased.evolve(Some(json!({ "count": "many" })), &read_event());

        assert!(matches!(result, Err(ProjectionError::Serialization(_))));
    }
}

//! Events as they are appended and as they are read back.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{EventType, GlobalPosition, StreamName, StreamVersion};

/// Caller-supplied metadata carried with an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlates all events caused by one external request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Id of the event or command that caused this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    /// Free-form application metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

impl EventMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the correlation id.
    #[must_use]
    pub const fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the causation id.
    #[must_use]
    pub const fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Adds a custom metadata entry.
    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// An event to be appended to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type name.
    pub event_type: EventType,
    /// JSON payload.
    pub data: Value,
    /// Caller-supplied metadata.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl Event {
    /// Creates an event from an already serialized payload.
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            data,
            metadata: EventMetadata::default(),
        }
    }

    /// Creates an event by serializing a typed payload.
    pub fn from_data<T: Serialize>(
        event_type: EventType,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(data)?))
    }

    /// Replaces the event's metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Delivery metadata assigned by the store when an event is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEventMetadata {
    /// Unique, time-ordered event id.
    pub event_id: Uuid,
    /// Stream the event belongs to.
    pub stream_name: StreamName,
    /// Version of the stream once this event was appended (1-based).
    pub stream_position: StreamVersion,
    /// Position in the global log.
    pub global_position: GlobalPosition,
    /// Append time.
    pub created: DateTime<Utc>,
}

/// An appended event together with its delivery metadata. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadEvent {
    /// The event as appended.
    pub event: Event,
    /// Metadata assigned by the store.
    pub metadata: ReadEventMetadata,
}

impl ReadEvent {
    /// Event type name.
    pub const fn event_type(&self) -> &EventType {
        &self.event.event_type
    }

    /// Raw JSON payload.
    pub const fn data(&self) -> &Value {
        &self.event.data
    }

    /// Stream the event belongs to.
    pub const fn stream_name(&self) -> &StreamName {
        &self.metadata.stream_name
    }

    /// Position in the global log.
    pub const fn global_position(&self) -> GlobalPosition {
        self.metadata.global_position
    }

    /// 1-based position of the event inside its stream.
    pub const fn stream_position(&self) -> StreamVersion {
        self.metadata.stream_position
    }

    /// Deserializes the payload into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.event.data)
    }
}

/// Precondition on a stream's current version for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedStreamVersion {
    /// The stream must be at exactly this version. `Exact(0)` matches an absent stream.
    Exact(StreamVersion),
    /// The stream must have no events.
    StreamDoesNotExist,
    /// The stream must have at least one event.
    StreamExists,
    /// Any version is accepted.
    NoConstraint,
}

impl ExpectedStreamVersion {
    /// Returns true if a stream at `current` satisfies this precondition.
    pub fn matches(self, current: StreamVersion) -> bool {
        match self {
            Self::Exact(expected) => expected == current,
            Self::StreamDoesNotExist => current.is_initial(),
            Self::StreamExists => !current.is_initial(),
            Self::NoConstraint => true,
        }
    }
}

impl fmt::Display for ExpectedStreamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(version) => write!(f, "{version}"),
            Self::StreamDoesNotExist => f.write_str("STREAM_DOES_NOT_EXIST"),
            Self::StreamExists => f.write_str("STREAM_EXISTS"),
            Self::NoConstraint => f.write_str("NO_CONSTRAINT"),
        }
    }
}

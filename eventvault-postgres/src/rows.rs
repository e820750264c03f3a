//! Conversions between database rows and eventvault types.

use chrono::{DateTime, Utc};
use eventvault::{
    Event, EventMetadata, EventType, GlobalPosition, Operation, ReadEvent, ReadEventMetadata,
    StorageError, StreamName, StreamVersion,
};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::map_sqlx_error;

/// Columns of an events table, in the order [`read_event`] expects.
pub(crate) const EVENT_COLUMNS: &str = "event_id, stream_name, stream_position, global_position, \
     event_type, data, metadata, created";

/// Converts a position or version to `BIGINT`.
pub(crate) fn to_db(value: u64, operation: Operation) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| {
        StorageError::new(operation, format!("{value} does not fit in a BIGINT column"))
    })
}

/// Converts a `BIGINT` back to a position or version.
pub(crate) fn from_db(value: i64, operation: Operation) -> Result<u64, StorageError> {
    u64::try_from(value)
        .map_err(|_| StorageError::new(operation, format!("negative value {value} in database")))
}

pub(crate) fn read_event(row: &PgRow, operation: Operation) -> Result<ReadEvent, StorageError> {
    let column = |error| map_sqlx_error(error, operation);

    let event_id: Uuid = row.try_get("event_id").map_err(column)?;
    let stream_name: String = row.try_get("stream_name").map_err(column)?;
    let stream_position: i64 = row.try_get("stream_position").map_err(column)?;
    let global_position: i64 = row.try_get("global_position").map_err(column)?;
    let event_type: String = row.try_get("event_type").map_err(column)?;
    let data: Value = row.try_get("data").map_err(column)?;
    let metadata: Value = row.try_get("metadata").map_err(column)?;
    let created: DateTime<Utc> = row.try_get("created").map_err(column)?;

    let stream_name: StreamName = stream_name
        .parse()
        .map_err(|error| StorageError::new(operation, format!("stored stream name: {error}")))?;
    let event_type = EventType::try_new(event_type)
        .map_err(|error| StorageError::new(operation, format!("stored event type: {error}")))?;
    let metadata: EventMetadata = serde_json::from_value(metadata)
        .map_err(|error| StorageError::new(operation, format!("stored metadata: {error}")))?;

    Ok(ReadEvent {
        event: Event {
            event_type,
            data,
            metadata,
        },
        metadata: ReadEventMetadata {
            event_id,
            stream_name,
            stream_position: StreamVersion::new(from_db(stream_position, operation)?),
            global_position: GlobalPosition::new(from_db(global_position, operation)?),
            created,
        },
    })
}

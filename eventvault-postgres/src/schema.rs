//! Table layout and identifier handling.
//!
//! Shared objects live in the connection's default schema:
//!
//! - `eventvault_global_position_seq`: source of global positions
//! - `eventvault_locations`: registry of every created location, used to read
//!   the global log across locations
//! - `eventvault_checkpoints`: processor checkpoints
//! - `eventvault_documents`: processor-owned documents
//!
//! Each storage location `<loc>` gets three tables in its schema: `<loc>` for
//! events, `<loc>_streams` for stream versions (the primary key on the stream
//! name is the unique constraint appenders race on) and `<loc>_projections`
//! for inline projection documents.

use eventvault::{Operation, StorageError, StorageLocation};

/// Schema used when a location names no database.
pub const DEFAULT_SCHEMA: &str = "public";

/// Advisory lock serializing DDL across executors.
pub(crate) const SCHEMA_LOCK_KEY: i64 = 0x6576_7661_756c_7401;

/// Transaction-scoped advisory lock held from position reservation to
/// commit, so positions become visible in ascending order.
pub(crate) const POSITION_LOCK_KEY: i64 = 0x6576_7661_756c_7402;

const MAX_IDENTIFIER_LENGTH: usize = 63;
const STREAMS_SUFFIX: &str = "_streams";
const PROJECTIONS_SUFFIX: &str = "_projections";

pub(crate) const SHARED_SCHEMA: &[&str] = &[
    "CREATE SEQUENCE IF NOT EXISTS eventvault_global_position_seq AS BIGINT MINVALUE 1",
    "CREATE TABLE IF NOT EXISTS eventvault_locations (
        schema_name TEXT NOT NULL,
        location TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (schema_name, location)
    )",
    "CREATE TABLE IF NOT EXISTS eventvault_checkpoints (
        processor_id TEXT NOT NULL,
        partition TEXT NOT NULL DEFAULT '',
        version INTEGER NOT NULL,
        last_processed_position BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (processor_id, partition)
    )",
    "CREATE TABLE IF NOT EXISTS eventvault_documents (
        collection TEXT NOT NULL,
        document_id TEXT NOT NULL,
        document JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (collection, document_id)
    )",
];

/// Quoted, schema-qualified names of a location's tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocationTables {
    pub schema: String,
    pub location: String,
    pub events: String,
    pub streams: String,
    pub projections: String,
}

impl LocationTables {
    /// Validates the location's identifiers and quotes them.
    pub fn resolve(location: &StorageLocation) -> Result<Self, StorageError> {
        let schema = location.database.as_deref().unwrap_or(DEFAULT_SCHEMA);
        Self::from_parts(schema, &location.location)
    }

    /// Tables of a registered location.
    pub fn from_parts(schema: &str, location: &str) -> Result<Self, StorageError> {
        validate_identifier(schema)?;
        validate_identifier(&format!("{location}{PROJECTIONS_SUFFIX}"))?;
        if location.is_empty() {
            return Err(invalid_identifier(location, "empty identifier"));
        }

        let quoted_schema = quote_identifier(schema);
        let qualified = |table: String| format!("{quoted_schema}.{}", quote_identifier(&table));

        Ok(Self {
            schema: schema.to_string(),
            location: location.to_string(),
            events: qualified(location.to_string()),
            streams: qualified(format!("{location}{STREAMS_SUFFIX}")),
            projections: qualified(format!("{location}{PROJECTIONS_SUFFIX}")),
        })
    }

    /// DDL creating the location, safe to run repeatedly.
    pub fn create_statements(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_identifier(&self.schema)
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    global_position BIGINT PRIMARY KEY,
                    event_id UUID NOT NULL UNIQUE,
                    stream_name TEXT NOT NULL,
                    stream_position BIGINT NOT NULL,
                    event_type TEXT NOT NULL,
                    data JSONB NOT NULL,
                    metadata JSONB NOT NULL,
                    created TIMESTAMPTZ NOT NULL,
                    UNIQUE (stream_name, stream_position)
                )",
                self.events
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    stream_name TEXT PRIMARY KEY,
                    stream_version BIGINT NOT NULL
                )",
                self.streams
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    stream_name TEXT NOT NULL,
                    projection TEXT NOT NULL,
                    document JSONB NOT NULL,
                    PRIMARY KEY (stream_name, projection)
                )",
                self.projections
            ),
        ]
    }
}

/// Double-quotes an identifier, escaping embedded quotes.
pub(crate) fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn validate_identifier(identifier: &str) -> Result<(), StorageError> {
    if identifier.is_empty() {
        return Err(invalid_identifier(identifier, "empty identifier"));
    }
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(invalid_identifier(
            identifier,
            "longer than 63 bytes once suffixed",
        ));
    }
    if identifier.contains('\0') {
        return Err(invalid_identifier(identifier, "contains a NUL byte"));
    }
    Ok(())
}

fn invalid_identifier(identifier: &str, reason: &str) -> StorageError {
    StorageError::new(
        Operation::EnsureLocation,
        format!("invalid identifier '{identifier}': {reason}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_is_used_without_database() {
        let tables =
            LocationTables::resolve(&StorageLocation::new("stream_shopping_cart")).expect("valid");

        assert_eq!(tables.events, "\"public\".\"stream_shopping_cart\"");
        assert_eq!(tables.streams, "\"public\".\"stream_shopping_cart_streams\"");
        assert_eq!(
            tables.projections,
            "\"public\".\"stream_shopping_cart_projections\""
        );
    }

    #[test]
    fn database_becomes_the_schema() {
        let tables = LocationTables::resolve(
            &StorageLocation::new("carts").in_database("sales"),
        )
        .expect("valid");

        assert_eq!(tables.schema, "sales");
        assert_eq!(tables.events, "\"sales\".\"carts\"");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn locations_too_long_for_their_projection_table_are_rejected() {
        let location = "x".repeat(MAX_IDENTIFIER_LENGTH - PROJECTIONS_SUFFIX.len() + 1);

        let result = LocationTables::resolve(&StorageLocation::new(location));

        assert!(matches!(
            result,
            Err(StorageError {
                operation: Operation::EnsureLocation,
                ..
            })
        ));
    }

    #[test]
    fn longest_valid_location_is_accepted() {
        let location = "x".repeat(MAX_IDENTIFIER_LENGTH - PROJECTIONS_SUFFIX.len());

        assert!(LocationTables::resolve(&StorageLocation::new(location)).is_ok());
    }
}

//! Mapping of stream types to physical storage locations.

use std::fmt;
use std::sync::Arc;

use crate::types::StreamType;

/// Location used by [`StorageResolver::Single`] when none is given.
pub const DEFAULT_SINGLE_LOCATION: &str = "event_streams";

/// Prefix of locations derived by [`StorageResolver::PerStreamType`].
pub const PER_STREAM_TYPE_PREFIX: &str = "stream_";

/// Physical place where a stream's events live: a table (or collection) and,
/// optionally, the database or schema that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    /// Table or collection name.
    pub location: String,
    /// Database or schema; the backend's default when `None`.
    pub database: Option<String>,
}

impl StorageLocation {
    /// A location in the backend's default database.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            database: None,
        }
    }

    /// Places the location in a specific database or schema.
    #[must_use]
    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(database) => write!(f, "{database}.{}", self.location),
            None => f.write_str(&self.location),
        }
    }
}

/// User-supplied mapping used by [`StorageResolver::Custom`].
pub type CustomResolver = Arc<dyn Fn(&StreamType) -> StorageLocation + Send + Sync>;

/// Strategy deciding where a stream type's events are stored.
///
/// Resolution is pure: the same stream type always resolves to the same
/// location for the lifetime of a store.
#[derive(Clone, Default)]
pub enum StorageResolver {
    /// One location per stream type, named `stream_<slug>`.
    #[default]
    PerStreamType,
    /// All streams share one location, told apart by stream name.
    Single {
        /// Shared location name.
        location: String,
    },
    /// Caller-provided function. Its database is passed through unchanged.
    Custom(CustomResolver),
}

impl StorageResolver {
    /// Single shared location named [`DEFAULT_SINGLE_LOCATION`].
    pub fn single() -> Self {
        Self::Single {
            location: DEFAULT_SINGLE_LOCATION.to_string(),
        }
    }

    /// Wraps a custom mapping function.
    pub fn custom<F>(resolve: F) -> Self
    where
        F: Fn(&StreamType) -> StorageLocation + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(resolve))
    }

    /// Resolves the storage location of a stream type.
    pub fn resolve(&self, stream_type: &StreamType) -> StorageLocation {
        match self {
            Self::PerStreamType => StorageLocation::new(format!(
                "{PER_STREAM_TYPE_PREFIX}{}",
                slugify(stream_type.as_ref())
            )),
            Self::Single { location } => StorageLocation::new(location.clone()),
            Self::Custom(resolve) => resolve(stream_type),
        }
    }
}

impl fmt::Debug for StorageResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerStreamType => f.write_str("PerStreamType"),
            Self::Single { location } => {
                f.debug_struct("Single").field("location", location).finish()
            }
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Lowercase ASCII alphanumerics are kept; every other run of characters
/// collapses into a single `_`.
fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if slug.is_empty() {
        slug.push('_');
    }
    slug
}

//! Core types for the `eventvault` event store.
//!
//! All identifiers use smart constructors so that a value, once built, is
//! valid everywhere it travels: stream types never contain the `:` separator,
//! names are never empty, positions never go negative.

use std::fmt;
use std::str::FromStr;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn no_stream_separator(s: &str) -> bool {
    !s.contains(StreamName::SEPARATOR)
}

/// The type half of a stream name (`shopping_cart` in `shopping_cart:123`).
///
/// Stream types decide the physical storage location of a stream, so they are
/// trimmed, non-empty, and may not contain the `:` separator.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255, predicate = no_stream_separator),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamType(String);

/// The identity half of a stream name. May itself contain `:`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamId(String);

/// Name of an event type, e.g. `ProductItemAdded`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventType(String);

/// Identifier of a checkpointed processor.
///
/// Changing a processor's id makes it a different consumer: it gets a fresh
/// checkpoint and replays the log from its configured start. Long enough to
/// hold `projection:` followed by any [`ProjectionName`].
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProcessorId(String);

/// Optional partition of a processor's checkpoint.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct PartitionKey(String);

/// Name of a projection (inline or processor-driven).
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProjectionName(String);

/// Store-wide position of an event in the global log.
///
/// Assigned at append time, strictly increasing in commit order and never
/// reused. Gaps are allowed (a rolled back append may burn positions).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct GlobalPosition(u64);

impl GlobalPosition {
    /// The position immediately after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self::new(self.into_inner() + 1)
    }
}

/// Version of a stream: the number of events appended to it.
///
/// An absent stream has version 0. The n-th event of a stream carries
/// version n as its stream position.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct StreamVersion(u64);

impl StreamVersion {
    /// Version of a stream with no events.
    pub fn initial() -> Self {
        Self::new(0)
    }

    /// Returns true when no event has been appended yet.
    pub fn is_initial(self) -> bool {
        self.into_inner() == 0
    }

    /// Version after appending `count` more events.
    #[must_use]
    pub fn advance_by(self, count: usize) -> Self {
        Self::new(self.into_inner() + count as u64)
    }
}

/// Maximum number of events returned by one pull of the global log.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Into)
)]
pub struct BatchSize(usize);

impl BatchSize {
    /// Default size of a pulled batch.
    pub fn default_size() -> Self {
        match Self::try_new(100) {
            Ok(size) => size,
            Err(_) => unreachable!("100 is a valid batch size"),
        }
    }
}

/// Error returned when a string cannot be parsed as a [`StreamName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamNameError {
    /// The name has no `:` separating type and id.
    #[error("stream name '{0}' must have the form '<streamType>:<streamId>'")]
    MissingSeparator(String),
    /// The type half is not a valid [`StreamType`].
    #[error("stream name '{name}' has an invalid stream type: {detail}")]
    InvalidType {
        /// The offending name.
        name: String,
        /// Why the type was rejected.
        detail: String,
    },
    /// The id half is not a valid [`StreamId`].
    #[error("stream name '{name}' has an invalid stream id: {detail}")]
    InvalidId {
        /// The offending name.
        name: String,
        /// Why the id was rejected.
        detail: String,
    },
}

/// Full name of a stream: `streamType:streamId`.
///
/// Parsing splits at the first `:`, so stream ids may contain further
/// separators (`shopping_cart:tenant:42` has id `tenant:42`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamName {
    stream_type: StreamType,
    stream_id: StreamId,
}

impl StreamName {
    /// Separator between stream type and stream id.
    pub const SEPARATOR: char = ':';

    /// Builds a stream name from its parts.
    pub const fn new(stream_type: StreamType, stream_id: StreamId) -> Self {
        Self {
            stream_type,
            stream_id,
        }
    }

    /// Type half of the name.
    pub const fn stream_type(&self) -> &StreamType {
        &self.stream_type
    }

    /// Id half of the name.
    pub const fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.stream_type, Self::SEPARATOR, self.stream_id)
    }
}

impl FromStr for StreamName {
    type Err = StreamNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let (stream_type, stream_id) = name
            .split_once(Self::SEPARATOR)
            .ok_or_else(|| StreamNameError::MissingSeparator(name.to_string()))?;

        let stream_type =
            StreamType::try_new(stream_type).map_err(|error| StreamNameError::InvalidType {
                name: name.to_string(),
                detail: error.to_string(),
            })?;
        let stream_id =
            StreamId::try_new(stream_id).map_err(|error| StreamNameError::InvalidId {
                name: name.to_string(),
                detail: error.to_string(),
            })?;

        Ok(Self::new(stream_type, stream_id))
    }
}

impl TryFrom<String> for StreamName {
    type Error = StreamNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamName> for String {
    fn from(name: StreamName) -> Self {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn stream_name_splits_at_first_separator() {
        let name: StreamName = "shopping_cart:tenant:42".parse().expect("valid stream name");

        assert_eq!(name.stream_type().as_ref(), "shopping_cart");
        assert_eq!(name.stream_id().as_ref(), "tenant:42");
        assert_eq!(name.to_string(), "shopping_cart:tenant:42");
    }

    #[test]
    fn stream_name_without_separator_is_rejected() {
        let result = "shopping_cart".parse::<StreamName>();

        assert_eq!(
            result,
            Err(StreamNameError::MissingSeparator("shopping_cart".to_string()))
        );
    }

    #[test]
    fn stream_name_with_empty_halves_is_rejected() {
        assert!(matches!(
            ":42".parse::<StreamName>(),
            Err(StreamNameError::InvalidType { .. })
        ));
        assert!(matches!(
            "shopping_cart:".parse::<StreamName>(),
            Err(StreamNameError::InvalidId { .. })
        ));
    }

    #[test]
    fn stream_type_rejects_separator() {
        assert!(StreamType::try_new("shopping:cart").is_err());
    }

    #[test]
    fn stream_name_serializes_as_plain_string() {
        let name: StreamName = "order:1".parse().expect("valid stream name");

        let json = serde_json::to_string(&name).expect("serializes");
        let back: StreamName = serde_json::from_str(&json).expect("deserializes");

        assert_eq!(json, "\"order:1\"");
        assert_eq!(back, name);
    }

    #[test]
    fn batch_size_must_be_positive() {
        assert!(BatchSize::try_new(0).is_err());
        assert_eq!(BatchSize::default_size().into_inner(), 100);
    }

    #[test]
    fn stream_version_advances_by_batch_length() {
        let version = StreamVersion::initial();

        assert!(version.is_initial());
        assert_eq!(version.advance_by(3), StreamVersion::new(3));
    }

    proptest! {
        #[test]
        fn stream_name_display_parses_back(
            stream_type in "[a-z_]{1,32}",
            stream_id in "[a-zA-Z0-9:-]{1,64}",
        ) {
            let name = StreamName::new(
                StreamType::try_new(stream_type).expect("valid type"),
                StreamId::try_new(stream_id).expect("valid id"),
            );

            let parsed: StreamName = name.to_string().parse().expect("parses back");
            prop_assert_eq!(parsed, name);
        }

        #[test]
        fn global_position_next_is_strictly_greater(value in 0u64..u64::MAX) {
            let position = GlobalPosition::new(value);
            prop_assert!(position.next() > position);
        }
    }
}

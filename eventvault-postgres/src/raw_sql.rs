//! Parameterized SQL statements and projections built from them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventvault::{
    EventType, HandlerContext, HandlerError, ProcessorProjection, ProjectionName, ReadEvent,
};
use serde_json::Value;
use uuid::Uuid;

use crate::PostgresExecutor;

/// A value bound to a `$n` placeholder.
///
/// `Null` is sent as a text-typed NULL; cast the placeholder (`$1::int`) when
/// the target column has another type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// `BOOLEAN`.
    Bool(bool),
    /// `BIGINT`.
    Int(i64),
    /// `DOUBLE PRECISION`.
    Float(f64),
    /// `TEXT`.
    Text(String),
    /// `JSONB`.
    Json(Value),
    /// `UUID`.
    Uuid(Uuid),
    /// `TIMESTAMPTZ`.
    Timestamp(DateTime<Utc>),
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A statement with positional parameters. Values are always bound, never
/// interpolated into the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// SQL text with `$1`, `$2`, ... placeholders.
    pub sql: String,
    /// Values for the placeholders, in order.
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    /// A statement without parameters yet.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Appends the value for the next placeholder.
    #[must_use]
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Processor projection that turns handled events into SQL statements run in
/// the processor's transaction.
pub struct RawSqlProjection<F> {
    name: ProjectionName,
    can_handle: Vec<EventType>,
    statements: F,
}

impl<F> RawSqlProjection<F>
where
    F: Fn(&[ReadEvent]) -> Result<Vec<SqlStatement>, HandlerError> + Send + Sync,
{
    /// Creates a projection from a statement builder.
    pub const fn new(name: ProjectionName, can_handle: Vec<EventType>, statements: F) -> Self {
        Self {
            name,
            can_handle,
            statements,
        }
    }
}

#[async_trait]
impl<F> ProcessorProjection<PostgresExecutor> for RawSqlProjection<F>
where
    F: Fn(&[ReadEvent]) -> Result<Vec<SqlStatement>, HandlerError> + Send + Sync,
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
        context: &mut HandlerContext<'_, PostgresExecutor>,
    ) -> Result<(), HandlerError> {
        for statement in (self.statements)(events)? {
            context.transaction.execute_statement(&statement).await?;
        }
        Ok(())
    }
}

impl<F> std::fmt::Debug for RawSqlProjection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSqlProjection")
            .field("name", &self.name)
            .field("can_handle", &self.can_handle)
            .finish_non_exhaustive()
    }
}

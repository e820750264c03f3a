//! Shared fixtures for eventvault-postgres integration tests.
//!
//! Tests connect to the database named by `EVENTVAULT_POSTGRES_URL` and are
//! skipped when it is unset. Every test works in its own storage location,
//! so tests can share one database and run in parallel.

// Allow dead_code because not all test binaries use all exports from this module
#![allow(dead_code)]

use std::env;

use eventvault::{
    Event, EventStore, EventStoreOptions, EventType, ProcessorId, ProjectionName,
    StorageLocation, StorageResolver, StreamName,
};
use eventvault_postgres::PostgresExecutor;
use uuid::Uuid;

/// Environment variable holding the test database connection string.
pub const DATABASE_URL_VAR: &str = "EVENTVAULT_POSTGRES_URL";

/// Connection string of the test database, if configured.
pub fn database_url() -> Option<String> {
    env::var(DATABASE_URL_VAR).ok()
}

/// A store writing every stream to a location unique to the calling test.
pub struct PostgresTestFixture {
    pub executor: PostgresExecutor,
    pub store: EventStore<PostgresExecutor>,
    pub location: StorageLocation,
}

impl PostgresTestFixture {
    /// Connects to the test database, or returns `None` to skip the test.
    pub async fn new() -> Option<Self> {
        let url = database_url()?;
        let executor = PostgresExecutor::new(url)
            .await
            .expect("should connect to test database");
        let location = StorageLocation::new(format!("test_{}", Uuid::now_v7().simple()));
        let resolved = location.clone();
        let store = EventStore::with_options(
            executor.clone(),
            EventStoreOptions::default()
                .with_storage(StorageResolver::custom(move |_| resolved.clone())),
        );
        Some(Self {
            executor,
            store,
            location,
        })
    }
}

/// Unique name so parallel tests never share processors or collections.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

pub fn stream(name: &str) -> StreamName {
    name.parse().expect("valid stream name")
}

pub fn event_type(name: &str) -> EventType {
    EventType::try_new(name).expect("valid event type")
}

pub fn processor_id(name: &str) -> ProcessorId {
    ProcessorId::try_new(name).expect("valid processor id")
}

pub fn projection_name(name: &str) -> ProjectionName {
    ProjectionName::try_new(name).expect("valid projection name")
}

pub fn item_added(price: u64) -> Event {
    Event::new(
        event_type("ProductItemAdded"),
        serde_json::json!({ "productId": "book", "price": price, "quantity": 1 }),
    )
}

//! Shared fixtures for eventvault scenario tests: a small shopping cart
//! domain with an inline summary projection.

// Allow dead_code because not all test binaries use all exports from this module
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use eventvault::{
    Event, EventStore, EventStoreOptions, EventType, ExpectedStreamVersion, GlobalPosition,
    HandlerError, InlineProjection, MessageHandler, MessageHandlerResult, ProcessorId,
    ProjectionError, ProjectionName, ReadEvent, StreamName,
};
use eventvault_memory::InMemoryExecutor;
use serde::{Deserialize, Serialize};

pub const PRODUCT_ITEM_ADDED: &str = "ProductItemAdded";
pub const DISCOUNT_APPLIED: &str = "DiscountApplied";
pub const CART_SUMMARY: &str = "cart_summary";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductItemAdded {
    pub product_id: String,
    pub price: u64,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountApplied {
    pub percent: u64,
    pub coupon_id: String,
}

/// Inline read model of a cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub product_items_count: u64,
    pub total_amount: u64,
    pub applied_coupons: Vec<String>,
}

/// Keeps [`CartSummary`] up to date. Discounts are recorded by coupon id, so a
/// re-delivered `DiscountApplied` does not discount twice.
pub struct CartSummaryProjection {
    name: ProjectionName,
    can_handle: Vec<EventType>,
}

impl CartSummaryProjection {
    pub fn new() -> Self {
        Self {
            name: projection_name(CART_SUMMARY),
            can_handle: vec![event_type(PRODUCT_ITEM_ADDED), event_type(DISCOUNT_APPLIED)],
        }
    }
}

impl InlineProjection for CartSummaryProjection {
    type Document = CartSummary;

    fn name(&self) -> &ProjectionName {
        &self.name
    }

    fn can_handle(&self) -> &[EventType] {
        &self.can_handle
    }

    fn evolve(
        &self,
        document: Option<CartSummary>,
        event: &ReadEvent,
    ) -> Result<Option<CartSummary>, ProjectionError> {
        let mut summary = document.unwrap_or_default();

        match event.event_type().as_ref() {
            PRODUCT_ITEM_ADDED => {
                let added: ProductItemAdded = event.data_as()?;
                summary.product_items_count += added.quantity;
                summary.total_amount += added.price * added.quantity;
            }
            DISCOUNT_APPLIED => {
                let discount: DiscountApplied = event.data_as()?;
                if summary.applied_coupons.contains(&discount.coupon_id) {
                    return Ok(Some(summary));
                }
                summary.total_amount = summary.total_amount * (100 - discount.percent) / 100;
                summary.applied_coupons.push(discount.coupon_id);
            }
            other => {
                return Err(ProjectionError::Evolve(format!(
                    "unexpected event type {other}"
                )))
            }
        }
        Ok(Some(summary))
    }
}

pub fn event_type(name: &str) -> EventType {
    EventType::try_new(name).expect("valid event type")
}

pub fn projection_name(name: &str) -> ProjectionName {
    ProjectionName::try_new(name).expect("valid projection name")
}

pub fn processor_id(name: &str) -> ProcessorId {
    ProcessorId::try_new(name).expect("valid processor id")
}

pub fn stream(name: &str) -> StreamName {
    name.parse().expect("valid stream name")
}

pub fn product_item_added(product_id: &str, price: u64, quantity: u64) -> Event {
    Event::from_data(
        event_type(PRODUCT_ITEM_ADDED),
        &ProductItemAdded {
            product_id: product_id.to_string(),
            price,
            quantity,
        },
    )
    .expect("event serializes")
}

pub fn discount_applied(percent: u64, coupon_id: &str) -> Event {
    Event::from_data(
        event_type(DISCOUNT_APPLIED),
        &DiscountApplied {
            percent,
            coupon_id: coupon_id.to_string(),
        },
    )
    .expect("event serializes")
}

/// Store with the cart summary projection and the default storage layout.
pub fn cart_store() -> (InMemoryExecutor, EventStore<InMemoryExecutor>) {
    let executor = InMemoryExecutor::new();
    let store = EventStore::with_options(
        executor.clone(),
        EventStoreOptions::default().with_inline_projection(CartSummaryProjection::new()),
    );
    (executor, store)
}

/// Appends one item to each of `count` carts and returns the global positions.
pub async fn seed_carts(store: &EventStore<InMemoryExecutor>, count: usize) -> Vec<GlobalPosition> {
    seed_carts_named(store, "cart", count).await
}

/// Like [`seed_carts`], with cart ids prefixed by `prefix` so repeated seeding
/// creates new streams.
pub async fn seed_carts_named(
    store: &EventStore<InMemoryExecutor>,
    prefix: &str,
    count: usize,
) -> Vec<GlobalPosition> {
    let mut positions = Vec::with_capacity(count);
    for index in 0..count {
        let appended = store
            .append_to_stream(
                &stream(&format!("shopping_cart:{prefix}-{index}")),
                vec![product_item_added("book", 10, 1)],
                ExpectedStreamVersion::StreamDoesNotExist,
            )
            .await
            .expect("seed append succeeds");
        positions.push(appended.last_event_global_position);
    }
    positions
}

/// Message handler recording the positions it saw and answering from a
/// per-position script.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<GlobalPosition>>>,
    stop_at: Option<GlobalPosition>,
    fail_at: Option<GlobalPosition>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stopping_at(position: GlobalPosition) -> Self {
        Self {
            stop_at: Some(position),
            ..Self::default()
        }
    }

    pub fn failing_at(position: GlobalPosition) -> Self {
        Self {
            fail_at: Some(position),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<GlobalPosition> {
        self.seen.lock().expect("lock is not poisoned").clone()
    }
}

#[async_trait::async_trait]
impl MessageHandler<InMemoryExecutor> for RecordingHandler {
    async fn handle(
        &self,
        event: &ReadEvent,
        _context: &mut eventvault::HandlerContext<'_, InMemoryExecutor>,
    ) -> Result<MessageHandlerResult, HandlerError> {
        let position = event.global_position();
        if Some(position) == self.fail_at {
            return Err(HandlerError::new(format!("handler failed at {position}")));
        }

        self.seen
            .lock()
            .expect("lock is not poisoned")
            .push(position);

        if Some(position) == self.stop_at {
            return Ok(MessageHandlerResult::stop("requested by handler"));
        }
        Ok(MessageHandlerResult::Continue)
    }
}

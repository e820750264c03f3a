//! Shopping cart example application
//!
//! This example demonstrates:
//! - Appending to streams with optimistic concurrency
//! - Rebuilding state from a stream
//! - A processor reacting to events through a consumer

use std::error::Error;
use std::time::Duration;

use eventvault::{
    BatchPullerOptions, BatchSize, ConsumerOptions, Event, EventStore, EventStoreConsumer,
    EventType, ExpectedStreamVersion, HandlerError, MessageHandlerResult, Processor,
    ProcessorHandler, ProcessorId, ProcessorOptions, ReadEvent, ReadStreamOptions, StreamName,
};
use eventvault_memory::InMemoryExecutor;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Serialize, Deserialize)]
struct ProductItemAdded {
    product_id: String,
    price: u64,
}

#[derive(Debug, Default)]
struct Cart {
    items: Vec<String>,
    total: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let executor = InMemoryExecutor::new();
    let store = EventStore::new(executor.clone());
    let item_added = EventType::try_new("ProductItemAdded")?;
    let cart: StreamName = "shopping_cart:42".parse()?;

    let appended = store
        .append_to_stream(
            &cart,
            vec![Event::from_data(
                item_added.clone(),
                &ProductItemAdded {
                    product_id: "book".to_string(),
                    price: 25,
                },
            )?],
            ExpectedStreamVersion::StreamDoesNotExist,
        )
        .await?;
    store
        .append_to_stream(
            &cart,
            vec![Event::from_data(
                item_added,
                &ProductItemAdded {
                    product_id: "pen".to_string(),
                    price: 3,
                },
            )?],
            ExpectedStreamVersion::Exact(appended.next_expected_stream_version),
        )
        .await?;

    let rebuilt = store
        .aggregate_stream(&cart, Cart::default(), |mut cart, event| {
            if let Ok(added) = event.data_as::<ProductItemAdded>() {
                cart.items.push(added.product_id);
                cart.total += added.price;
            }
            cart
        })
        .await?;
    info!(
        items = ?rebuilt.state.items,
        total = rebuilt.state.total,
        version = %rebuilt.current_stream_version,
        "Cart rebuilt from its stream"
    );

    let last = store
        .read_stream(&cart, ReadStreamOptions::default())
        .await?
        .events
        .last()
        .map(ReadEvent::global_position);
    let notifier = Processor::new(
        ProcessorOptions::new(ProcessorId::try_new("cart-notifier")?)
            .with_stop_after(move |event| Some(event.global_position()) == last),
        ProcessorHandler::message(
            |event: &ReadEvent| -> Result<MessageHandlerResult, HandlerError> {
                info!(
                    stream = %event.stream_name(),
                    position = %event.global_position(),
                    "Notifying about cart change"
                );
                Ok(MessageHandlerResult::Continue)
            },
        ),
    )?;

    let mut consumer = EventStoreConsumer::new(
        executor,
        ConsumerOptions {
            puller: BatchPullerOptions {
                batch_size: BatchSize::try_new(10)?,
                poll_interval: Duration::from_millis(20),
            },
        },
    )
    .with_processor(notifier);
    consumer.run().await?;

    info!("Example completed");
    Ok(())
}

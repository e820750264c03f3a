//! Consumer scenarios: one puller feeding several processors.
//!
//! Scenario: Developer runs several processors from one consumer
//! - Given processors at different checkpoints
//! - When the consumer runs
//! - Then every processor sees each pending event exactly once, in order
//! - And the run ends when all processors stopped or shutdown is requested

mod common;

use std::time::Duration;

use common::{cart_store, processor_id, seed_carts, RecordingHandler};
use eventvault::{
    BatchPullerOptions, BatchSize, ConsumerError, ConsumerOptions, EventStoreConsumer,
    GlobalPosition, Processor, ProcessorError, ProcessorHandler, ProcessorOptions,
    ProcessorStatus,
};
use eventvault_memory::InMemoryExecutor;

fn fast_options() -> ConsumerOptions {
    ConsumerOptions {
        puller: BatchPullerOptions {
            batch_size: BatchSize::try_new(2).expect("valid batch size"),
            poll_interval: Duration::from_millis(5),
        },
    }
}

fn stopping_processor(
    name: &str,
    handler: RecordingHandler,
    stop_at: GlobalPosition,
) -> Processor<InMemoryExecutor> {
    Processor::new(
        ProcessorOptions::new(processor_id(name))
            .with_stop_after(move |event| event.global_position() == stop_at),
        ProcessorHandler::message(handler),
    )
    .expect("processor builds")
}

#[tokio::test]
async fn consumer_runs_until_every_processor_stopped() {
    // Given: Five events, and two processors stopping at different positions
    let (executor, store) = cart_store();
    let positions = seed_carts(&store, 5).await;
    let early = RecordingHandler::new();
    let late = RecordingHandler::new();
    let mut consumer = EventStoreConsumer::new(executor.clone(), fast_options())
        .with_processor(stopping_processor("early", early.clone(), positions[1]))
        .with_processor(stopping_processor("late", late.clone(), positions[4]));

    // When
    tokio::time::timeout(Duration::from_secs(5), consumer.run())
        .await
        .expect("consumer finishes")
        .expect("consumer succeeds");

    // Then: Each processor handled its prefix of the log, in order
    assert_eq!(early.seen(), positions[..2].to_vec());
    assert_eq!(late.seen(), positions);
    assert!(consumer
        .processors()
        .iter()
        .all(|processor| processor.status() == ProcessorStatus::Stopped));
    assert_eq!(
        executor
            .checkpoint(&processor_id("early"), None)
            .await
            .expect("checkpoint stored")
            .last_processed_position,
        positions[1]
    );
}

#[tokio::test]
async fn processors_at_different_checkpoints_share_one_puller() {
    // Given: One processor already checkpointed past the first two events
    let (executor, store) = cart_store();
    let positions = seed_carts(&store, 4).await;
    let warm_up = RecordingHandler::new();
    let mut veteran = stopping_processor("veteran", warm_up.clone(), positions[1]);
    veteran
        .start(Some(&executor))
        .await
        .expect("veteran starts");
    veteran
        .handle(
            &eventvault::Executor::read_all(&executor, None, BatchSize::default_size())
                .await
                .expect("read all succeeds"),
            Some(&executor),
        )
        .await
        .expect("veteran handles batch");

    // When: It runs in a consumer next to a brand new processor
    let resumed = RecordingHandler::new();
    let newcomer = RecordingHandler::new();
    let mut consumer = EventStoreConsumer::new(executor.clone(), fast_options())
        .with_processor(stopping_processor("veteran", resumed.clone(), positions[3]))
        .with_processor(stopping_processor("newcomer", newcomer.clone(), positions[3]));
    tokio::time::timeout(Duration::from_secs(5), consumer.run())
        .await
        .expect("consumer finishes")
        .expect("consumer succeeds");

    // Then: The veteran resumed after its checkpoint, the newcomer saw everything
    assert_eq!(warm_up.seen(), positions[..2].to_vec());
    assert_eq!(resumed.seen(), positions[2..].to_vec());
    assert_eq!(newcomer.seen(), positions);
}

#[tokio::test]
async fn shutdown_handle_stops_a_consumer_waiting_for_events() {
    // Given: A consumer over a log that keeps growing
    let (executor, store) = cart_store();
    let handler = RecordingHandler::new();
    let mut consumer = EventStoreConsumer::new(executor.clone(), fast_options()).with_processor(
        Processor::new(
            ProcessorOptions::new(processor_id("tailer")),
            ProcessorHandler::message(handler.clone()),
        )
        .expect("processor builds"),
    );
    let shutdown = consumer.shutdown_handle();

    // When: Events arrive while it runs, and shutdown follows once they are handled
    let producer = async {
        let positions = seed_carts(&store, 3).await;
        let last = positions[2];
        while executor
            .checkpoint(&processor_id("tailer"), None)
            .await
            .map(|record| record.last_processed_position)
            != Some(last)
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.shutdown();
        positions
    };
    let (result, positions) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(consumer.run(), producer)
    })
    .await
    .expect("consumer shuts down");

    // Then
    result.expect("consumer succeeds");
    assert_eq!(handler.seen(), positions);
    assert_eq!(consumer.processors()[0].status(), ProcessorStatus::Stopped);
}

#[tokio::test]
async fn consumer_without_processors_refuses_to_run() {
    let executor = InMemoryExecutor::new();
    let mut consumer = EventStoreConsumer::new(executor, ConsumerOptions::default());

    let result = consumer.run().await;

    assert!(matches!(result, Err(ConsumerError::NoProcessors)));
}

#[tokio::test]
async fn failing_processor_ends_the_run_with_its_error() {
    let (executor, store) = cart_store();
    let positions = seed_carts(&store, 2).await;
    let mut consumer = EventStoreConsumer::new(executor, fast_options()).with_processor(
        Processor::new(
            ProcessorOptions::new(processor_id("brittle")),
            ProcessorHandler::message(RecordingHandler::failing_at(positions[1])),
        )
        .expect("processor builds"),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), consumer.run())
        .await
        .expect("consumer finishes");

    assert!(matches!(
        result,
        Err(ConsumerError::Processor(ProcessorError::Handler { position, .. }))
            if position == positions[1]
    ));
    assert_eq!(consumer.processors()[0].status(), ProcessorStatus::Failed);
}

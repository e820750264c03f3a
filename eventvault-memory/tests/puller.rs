//! Batch puller scenarios.

mod common;

use std::time::Duration;

use common::{cart_store, seed_carts};
use eventvault::{BatchPullerOptions, BatchSize, GlobalPosition, MessageBatchPuller, StartFrom};
use futures::StreamExt;

fn options(batch_size: usize) -> BatchPullerOptions {
    BatchPullerOptions {
        batch_size: BatchSize::try_new(batch_size).expect("valid batch size"),
        poll_interval: Duration::from_millis(5),
    }
}

fn positions_of(batch: &[eventvault::ReadEvent]) -> Vec<GlobalPosition> {
    batch.iter().map(eventvault::ReadEvent::global_position).collect()
}

#[tokio::test]
async fn pulls_contiguous_batches_in_position_order() {
    // Given: Five events in the global log
    let (executor, store) = cart_store();
    let positions = seed_carts(&store, 5).await;
    let mut puller = MessageBatchPuller::start(executor, StartFrom::Beginning, options(2))
        .await
        .expect("puller starts");

    // When: Batches of two are pulled until the log is drained
    let first = puller.pull().await.expect("first batch");
    let second = puller.pull().await.expect("second batch");
    let third = puller.pull().await.expect("third batch");
    let drained = puller.pull().await.expect("drained batch");

    // Then: Every event appears once, in order, and the cursor tracks the last one
    assert_eq!(positions_of(&first), positions[..2].to_vec());
    assert_eq!(positions_of(&second), positions[2..4].to_vec());
    assert_eq!(positions_of(&third), positions[4..].to_vec());
    assert!(drained.is_empty());
    assert_eq!(puller.position(), Some(positions[4]));
}

#[tokio::test]
async fn start_from_end_skips_existing_events() {
    let (executor, store) = cart_store();
    let existing = seed_carts(&store, 2).await;
    let mut puller = MessageBatchPuller::start(executor, StartFrom::End, options(10))
        .await
        .expect("puller starts");

    assert_eq!(puller.position(), Some(existing[1]));
    assert!(puller.pull().await.expect("pull succeeds").is_empty());
}

#[tokio::test]
async fn start_from_end_of_empty_log_reads_from_the_beginning() {
    let (executor, store) = cart_store();
    let mut puller = MessageBatchPuller::start(executor, StartFrom::End, options(10))
        .await
        .expect("puller starts");

    let positions = seed_carts(&store, 1).await;

    assert_eq!(
        positions_of(&puller.pull().await.expect("pull succeeds")),
        positions
    );
}

#[tokio::test]
async fn reset_rewinds_the_cursor() {
    let (executor, store) = cart_store();
    let positions = seed_carts(&store, 3).await;
    let mut puller = MessageBatchPuller::start(executor, StartFrom::Beginning, options(10))
        .await
        .expect("puller starts");
    puller.pull().await.expect("pull succeeds");

    puller
        .reset(StartFrom::After(positions[0]))
        .await
        .expect("reset succeeds");

    assert_eq!(
        positions_of(&puller.pull().await.expect("pull succeeds")),
        positions[1..].to_vec()
    );
}

#[tokio::test]
async fn stream_waits_for_new_events_instead_of_ending() {
    // Given: A stream over a drained log
    let (executor, store) = cart_store();
    let existing = seed_carts(&store, 1).await;
    let puller = MessageBatchPuller::start(executor, StartFrom::Beginning, options(10))
        .await
        .expect("puller starts");
    let mut batches = Box::pin(puller.into_stream());
    let first = batches
        .next()
        .await
        .expect("stream yields")
        .expect("batch pulled");

    // When: Another event is appended while the stream polls
    let (next, appended) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(5), batches.next()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            common::seed_carts_named(&store, "late", 1).await
        }
    );

    // Then
    assert_eq!(positions_of(&first), existing);
    let next = next
        .expect("stream yields before timeout")
        .expect("stream has not ended")
        .expect("batch pulled");
    assert_eq!(positions_of(&next), appended);
}

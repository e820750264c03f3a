//! Ordered batches of the global log.

use std::time::Duration;

use futures::stream::{self, Stream};
use tracing::{debug, instrument};

use crate::errors::StorageError;
use crate::event::ReadEvent;
use crate::executor::Executor;
use crate::types::{BatchSize, GlobalPosition};

/// Where a puller starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// The first event of the log.
    Beginning,
    /// The first event after this position.
    After(GlobalPosition),
    /// Only events appended after the puller started.
    End,
}

/// Configuration for a [`MessageBatchPuller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPullerOptions {
    /// Maximum events per batch (default: 100).
    pub batch_size: BatchSize,
    /// Wait between pulls of a drained log (default: 100 ms).
    pub poll_interval: Duration,
}

impl Default for BatchPullerOptions {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::default_size(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Pulls contiguous, position-ordered slices of the global log.
///
/// The cursor only moves past events that were returned, so no event in the
/// requested range is skipped or reordered. Empty batches do not end the
/// sequence.
#[derive(Debug, Clone)]
pub struct MessageBatchPuller<E: Executor> {
    executor: E,
    options: BatchPullerOptions,
    cursor: Option<GlobalPosition>,
}

impl<E: Executor> MessageBatchPuller<E> {
    /// Creates a puller, resolving [`StartFrom::End`] to the current tail.
    pub async fn start(
        executor: E,
        start_from: StartFrom,
        options: BatchPullerOptions,
    ) -> Result<Self, StorageError> {
        let cursor = resolve_cursor(&executor, start_from).await?;
        Ok(Self {
            executor,
            options,
            cursor,
        })
    }

    /// Position of the last event returned, or of the start position.
    pub const fn position(&self) -> Option<GlobalPosition> {
        self.cursor
    }

    /// The options this puller runs with.
    pub const fn options(&self) -> &BatchPullerOptions {
        &self.options
    }

    /// Restarts the puller from another position.
    pub async fn reset(&mut self, start_from: StartFrom) -> Result<(), StorageError> {
        self.cursor = resolve_cursor(&self.executor, start_from).await?;
        Ok(())
    }

    /// Pulls the next batch. An empty batch means the log is drained for now.
    #[instrument(name = "puller.pull", skip(self), fields(after = ?self.cursor))]
    pub async fn pull(&mut self) -> Result<Vec<ReadEvent>, StorageError> {
        let batch = self
            .executor
            .read_all(self.cursor, self.options.batch_size)
            .await?;

        if let Some(last) = batch.last() {
            self.cursor = Some(last.global_position());
            debug!(
                event_count = batch.len(),
                position = %last.global_position(),
                "[puller.pull] pulled batch"
            );
        }
        Ok(batch)
    }

    /// Turns the puller into an endless stream of non-empty batches.
    ///
    /// A drained log is polled again after `poll_interval`. The stream ends
    /// after yielding the first storage error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<ReadEvent>, StorageError>> {
        stream::unfold(Some(self), |state| async move {
            let mut puller = state?;
            loop {
                match puller.pull().await {
                    Ok(batch) if batch.is_empty() => {
                        tokio::time::sleep(puller.options.poll_interval).await;
                    }
                    Ok(batch) => return Some((Ok(batch), Some(puller))),
                    Err(error) => return Some((Err(error), None)),
                }
            }
        })
    }
}

async fn resolve_cursor<E: Executor>(
    executor: &E,
    start_from: StartFrom,
) -> Result<Option<GlobalPosition>, StorageError> {
    match start_from {
        StartFrom::Beginning => Ok(None),
        StartFrom::After(position) => Ok(Some(position)),
        StartFrom::End => executor.last_global_position().await,
    }
}

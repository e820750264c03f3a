//! Drives several processors from one batch puller.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::errors::ConsumerError;
use crate::executor::Executor;
use crate::processor::Processor;
use crate::puller::{BatchPullerOptions, MessageBatchPuller, StartFrom};

/// Configuration of an [`EventStoreConsumer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Options of the shared puller.
    pub puller: BatchPullerOptions,
}

/// Asks a running consumer to stop.
///
/// The consumer finishes the batch it is handling, so no transaction is cut
/// short, then stops every processor.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Requests shutdown.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true once shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Pulls the global log once and hands every batch to each active processor.
#[derive(Debug)]
pub struct EventStoreConsumer<E: Executor> {
    executor: E,
    processors: Vec<Processor<E>>,
    options: ConsumerOptions,
    shutdown: ShutdownHandle,
}

impl<E: Executor> EventStoreConsumer<E> {
    /// Creates a consumer without processors.
    pub fn new(executor: E, options: ConsumerOptions) -> Self {
        Self {
            executor,
            processors: Vec::new(),
            options,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Adds a processor.
    #[must_use]
    pub fn with_processor(mut self, processor: Processor<E>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Adds a processor.
    pub fn add_processor(&mut self, processor: Processor<E>) {
        self.processors.push(processor);
    }

    /// The managed processors.
    pub fn processors(&self) -> &[Processor<E>] {
        &self.processors
    }

    /// Handle that stops [`EventStoreConsumer::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs until every processor stopped or shutdown was requested.
    ///
    /// The first processor error ends the run and is returned.
    #[instrument(name = "consumer.run", skip(self), fields(processors = self.processors.len()))]
    pub async fn run(&mut self) -> Result<(), ConsumerError> {
        if self.processors.is_empty() {
            return Err(ConsumerError::NoProcessors);
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut start = None;
        for processor in &mut self.processors {
            let processor_start = processor.start(Some(&self.executor)).await?;
            start = Some(earliest(start, processor_start));
        }
        let start = start.unwrap_or(StartFrom::Beginning);

        info!(start = ?start, "[consumer.run] consumer started");
        let mut puller =
            MessageBatchPuller::start(self.executor.clone(), start, self.options.puller).await?;

        loop {
            if *shutdown.borrow() {
                info!("[consumer.run] shutdown requested");
                break;
            }
            if !self.processors.iter().any(Processor::is_active) {
                info!("[consumer.run] no active processors left");
                break;
            }

            let batch = puller.pull().await?;
            if batch.is_empty() {
                tokio::select! {
                    () = tokio::time::sleep(self.options.puller.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            debug!(event_count = batch.len(), "[consumer.run] dispatching batch");
            for processor in self.processors.iter_mut().filter(|processor| processor.is_active()) {
                processor.handle(&batch, Some(&self.executor)).await?;
            }
        }

        for processor in &mut self.processors {
            processor.stop();
        }
        Ok(())
    }
}

fn earliest(current: Option<StartFrom>, candidate: StartFrom) -> StartFrom {
    match (current, candidate) {
        (None, candidate) => candidate,
        (Some(StartFrom::Beginning), _) | (_, StartFrom::Beginning) => StartFrom::Beginning,
        (Some(StartFrom::After(current)), StartFrom::After(candidate)) => {
            StartFrom::After(current.min(candidate))
        }
        (Some(StartFrom::End), other) | (Some(other), StartFrom::End) => other,
    }
}

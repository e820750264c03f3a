//! Checkpointed processors.
//!
//! A [`Processor`] consumes the global log once, in position order, invoking a
//! handler for every event and advancing its checkpoint in the same
//! transaction as the handler's side effects. The checkpoint therefore moves
//! iff the side effects commit.
//!
//! ```text
//! Starting ──start()──> Active ──Stop / stop_after / stop()──> Stopped
//!                         │
//!                         └──────────── error ───────────────> Failed
//! ```
//!
//! A stopped or failed processor may be started again; it then resumes from
//! its committed checkpoint.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::{
    self, StoreCheckpoint, StoreCheckpointResult, DEFAULT_CHECKPOINT_VERSION,
};
use crate::errors::{CheckpointError, HandlerError, ProcessorError};
use crate::event::ReadEvent;
use crate::executor::{self, Executor};
use crate::projection::ProcessorProjection;
use crate::puller::StartFrom;
use crate::types::{GlobalPosition, PartitionKey, ProcessorId, ProjectionName};

/// Lifecycle state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorStatus {
    /// Created, or resolving its start position.
    Starting,
    /// Handling batches.
    Active,
    /// Halted by a handler, the `stop_after` predicate, or [`Processor::stop`].
    Stopped,
    /// Halted by an error.
    Failed,
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(status)
    }
}

/// Where a processor starts on its first run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessorStartFrom {
    /// The first event of the log.
    Beginning,
    /// The first event after this position.
    After(GlobalPosition),
    /// Events appended after the processor started.
    End,
    /// The stored checkpoint, or the beginning when there is none.
    #[default]
    Current,
}

/// How many messages share one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionScope {
    /// One transaction per message.
    #[default]
    PerMessage,
    /// One transaction per handled batch.
    PerBatch,
}

/// A request to stop processing, committed together with the message that
/// triggered it.
#[derive(Debug)]
pub struct StopRequest {
    /// Why processing stopped.
    pub reason: Option<String>,
    /// Diagnostic error carried by the request.
    pub error: Option<HandlerError>,
}

impl StopRequest {
    /// A stop request with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            error: None,
        }
    }

    /// Attaches a diagnostic error.
    #[must_use]
    pub fn with_error(mut self, error: HandlerError) -> Self {
        self.error = Some(error);
        self
    }
}

/// What a handler wants to happen after a message.
#[derive(Debug)]
pub enum MessageHandlerResult {
    /// Commit and continue with the next message.
    Continue,
    /// The message was deliberately ignored; commit and continue.
    Skip {
        /// Why the message was skipped.
        reason: Option<String>,
    },
    /// Commit this message, then stop.
    Stop(StopRequest),
}

impl MessageHandlerResult {
    /// Skips with a reason.
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: Some(reason.into()),
        }
    }

    /// Stops with a reason.
    pub fn stop(reason: impl Into<String>) -> Self {
        Self::Stop(StopRequest::new(reason))
    }
}

/// Outcome of [`Processor::handle`].
#[derive(Debug)]
pub enum BatchOutcome {
    /// Every pending message was committed; the processor stays active.
    Continue,
    /// Processing stopped after committing the stopping message.
    Stopped(StopRequest),
    /// The processor is not active; nothing was handled.
    Inactive,
}

/// What a handler can reach while processing.
pub struct HandlerContext<'a, E: Executor> {
    /// The transaction that also stores the checkpoint.
    pub transaction: &'a mut E::Transaction,
    /// Executor the processor runs on. Do not begin a second transaction on
    /// an executor that serializes transactions.
    pub executor: &'a E,
    /// Id of the running processor.
    pub processor_id: &'a ProcessorId,
    /// Checkpoint partition of the running processor.
    pub partition: Option<&'a PartitionKey>,
}

/// Handles one message at a time.
#[async_trait]
pub trait MessageHandler<E: Executor>: Send + Sync {
    /// Handles a message inside the processor's transaction.
    async fn handle(
        &self,
        event: &ReadEvent,
        context: &mut HandlerContext<'_, E>,
    ) -> Result<MessageHandlerResult, HandlerError>;
}

#[async_trait]
impl<E, F> MessageHandler<E> for F
where
    E: Executor,
    F: Fn(&ReadEvent) -> Result<MessageHandlerResult, HandlerError> + Send + Sync,
{
    async fn handle(
        &self,
        event: &ReadEvent,
        _context: &mut HandlerContext<'_, E>,
    ) -> Result<MessageHandlerResult, HandlerError> {
        self(event)
    }
}

/// Handles every pending message of a batch in one call and one transaction.
#[async_trait]
pub trait BatchHandler<E: Executor>: Send + Sync {
    /// Handles the messages inside the processor's transaction.
    async fn handle(
        &self,
        events: &[ReadEvent],
        context: &mut HandlerContext<'_, E>,
    ) -> Result<MessageHandlerResult, HandlerError>;
}

/// The handler a processor drives.
pub enum ProcessorHandler<E: Executor> {
    /// Per-message handler.
    Message(Box<dyn MessageHandler<E>>),
    /// Per-batch handler.
    Batch(Box<dyn BatchHandler<E>>),
    /// Projection, dispatched by event type.
    Projection(Box<dyn ProcessorProjection<E>>),
}

impl<E: Executor> ProcessorHandler<E> {
    /// Wraps a per-message handler.
    pub fn message<H: MessageHandler<E> + 'static>(handler: H) -> Self {
        Self::Message(Box::new(handler))
    }

    /// Wraps a per-batch handler.
    pub fn batch<H: BatchHandler<E> + 'static>(handler: H) -> Self {
        Self::Batch(Box::new(handler))
    }

    /// Wraps a projection.
    pub fn projection<P: ProcessorProjection<E> + 'static>(projection: P) -> Self {
        Self::Projection(Box::new(projection))
    }
}

impl<E: Executor> fmt::Debug for ProcessorHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(_) => f.write_str("Message(..)"),
            Self::Batch(_) => f.write_str("Batch(..)"),
            Self::Projection(projection) => {
                f.debug_tuple("Projection").field(projection.name()).finish()
            }
        }
    }
}

/// Predicate evaluated after each committed message; `true` stops the processor.
pub type StopAfter = Arc<dyn Fn(&ReadEvent) -> bool + Send + Sync>;

/// How a processor reaches the database, in order of precedence: an explicit
/// executor, then a connection string, then the executor passed by the caller
/// of [`Processor::start`] and [`Processor::handle`].
#[derive(Debug, Clone)]
pub struct ProcessorConnection<E> {
    /// Executor owned by the processor.
    pub executor: Option<E>,
    /// Connection string turned into an executor at construction.
    pub connection_string: Option<String>,
}

impl<E> Default for ProcessorConnection<E> {
    fn default() -> Self {
        Self {
            executor: None,
            connection_string: None,
        }
    }
}

/// Configuration of a [`Processor`].
pub struct ProcessorOptions<E> {
    /// Checkpoint identity of the processor.
    pub processor_id: ProcessorId,
    /// Checkpoint version; bump to replay from `start_from` (default: 1).
    pub version: u32,
    /// Checkpoint partition.
    pub partition: Option<PartitionKey>,
    /// Start position of the first run (default: `Current`).
    pub start_from: ProcessorStartFrom,
    /// Stops the processor after a matching message.
    pub stop_after: Option<StopAfter>,
    /// Transaction granularity (default: per message).
    pub transaction_scope: TransactionScope,
    /// Database access.
    pub connection: ProcessorConnection<E>,
}

impl<E> ProcessorOptions<E> {
    /// Defaults for a processor with the given id.
    pub fn new(processor_id: ProcessorId) -> Self {
        Self {
            processor_id,
            version: DEFAULT_CHECKPOINT_VERSION,
            partition: None,
            start_from: ProcessorStartFrom::default(),
            stop_after: None,
            transaction_scope: TransactionScope::default(),
            connection: ProcessorConnection::default(),
        }
    }

    /// Defaults for a projection processor, with id `projection:<name>`.
    pub fn for_projection(name: &ProjectionName) -> Self {
        match ProcessorId::try_new(format!("projection:{name}")) {
            Ok(processor_id) => Self::new(processor_id),
            Err(_) => unreachable!("projection names always form valid processor ids"),
        }
    }

    /// Sets the checkpoint version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the checkpoint partition.
    #[must_use]
    pub fn with_partition(mut self, partition: PartitionKey) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Sets the start position of the first run.
    #[must_use]
    pub const fn with_start_from(mut self, start_from: ProcessorStartFrom) -> Self {
        self.start_from = start_from;
        self
    }

    /// Stops the processor after the first message matching `predicate`.
    #[must_use]
    pub fn with_stop_after<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ReadEvent) -> bool + Send + Sync + 'static,
    {
        self.stop_after = Some(Arc::new(predicate));
        self
    }

    /// Sets the transaction granularity.
    #[must_use]
    pub const fn with_transaction_scope(mut self, transaction_scope: TransactionScope) -> Self {
        self.transaction_scope = transaction_scope;
        self
    }

    /// Gives the processor its own executor.
    #[must_use]
    pub fn with_executor(mut self, executor: E) -> Self {
        self.connection.executor = Some(executor);
        self
    }

    /// Gives the processor a connection string.
    #[must_use]
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection.connection_string = Some(connection_string.into());
        self
    }
}

/// Runtime state, owned and mutated only by its processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorState {
    /// Lifecycle status.
    pub status: ProcessorStatus,
    /// Last position handled or skipped over; later events are pending.
    pub cursor: Option<GlobalPosition>,
    /// Last checkpoint known to be stored.
    pub checkpoint: Option<GlobalPosition>,
    /// Messages committed since construction.
    pub messages_processed: u64,
}

struct UnitOutcome {
    processed: u64,
    last_position: Option<GlobalPosition>,
    checkpoint: Option<GlobalPosition>,
    stop: Option<StopRequest>,
}

/// A checkpointed consumer of the global log.
pub struct Processor<E: Executor> {
    processor_id: ProcessorId,
    version: u32,
    partition: Option<PartitionKey>,
    start_from: ProcessorStartFrom,
    stop_after: Option<StopAfter>,
    transaction_scope: TransactionScope,
    executor: Option<E>,
    handler: ProcessorHandler<E>,
    state: ProcessorState,
}

impl<E: Executor> Processor<E> {
    /// Creates a processor, resolving its connection once.
    ///
    /// A connection string that cannot be turned into an executor is a
    /// [`ProcessorError::Configuration`].
    pub fn new(
        options: ProcessorOptions<E>,
        handler: ProcessorHandler<E>,
    ) -> Result<Self, ProcessorError> {
        let ProcessorOptions {
            processor_id,
            version,
            partition,
            start_from,
            stop_after,
            transaction_scope,
            connection,
        } = options;

        let executor = match (connection.executor, connection.connection_string) {
            (Some(executor), _) => Some(executor),
            (None, Some(connection_string)) => {
                Some(E::connect_lazy(&connection_string).map_err(|error| {
                    ProcessorError::Configuration {
                        processor_id: processor_id.clone(),
                        detail: error.to_string(),
                    }
                })?)
            }
            (None, None) => None,
        };

        Ok(Self {
            processor_id,
            version,
            partition,
            start_from,
            stop_after,
            transaction_scope,
            executor,
            handler,
            state: ProcessorState {
                status: ProcessorStatus::Starting,
                cursor: None,
                checkpoint: None,
                messages_processed: 0,
            },
        })
    }

    /// Checkpoint identity.
    pub const fn processor_id(&self) -> &ProcessorId {
        &self.processor_id
    }

    /// Snapshot of the runtime state.
    pub const fn state(&self) -> ProcessorState {
        self.state
    }

    /// Current lifecycle status.
    pub const fn status(&self) -> ProcessorStatus {
        self.state.status
    }

    /// Returns true while the processor accepts batches.
    pub fn is_active(&self) -> bool {
        self.state.status == ProcessorStatus::Active
    }

    fn resolve_executor(&self, context: Option<&E>) -> Result<E, ProcessorError> {
        self.executor
            .clone()
            .or_else(|| context.cloned())
            .ok_or_else(|| ProcessorError::Configuration {
                processor_id: self.processor_id.clone(),
                detail: "no executor, connection string or caller-supplied executor".to_string(),
            })
    }

    /// Reads the checkpoint and resolves where to start reading the log.
    ///
    /// A restart after [`ProcessorStatus::Stopped`] or
    /// [`ProcessorStatus::Failed`] resumes from the checkpoint, whatever the
    /// configured start.
    #[instrument(
        name = "processor.start",
        skip(self, context),
        fields(processor_id = %self.processor_id)
    )]
    pub async fn start(&mut self, context: Option<&E>) -> Result<StartFrom, ProcessorError> {
        if self.is_active() {
            return Err(ProcessorError::InvalidState {
                processor_id: self.processor_id.clone(),
                status: self.state.status,
                action: "start",
            });
        }

        let restarting = self.state.status != ProcessorStatus::Starting;
        self.state.status = ProcessorStatus::Starting;

        match self.resolve_start(context, restarting).await {
            Ok(start) => {
                self.state.status = ProcessorStatus::Active;
                info!(
                    processor_id = %self.processor_id,
                    start = ?start,
                    checkpoint = ?self.state.checkpoint,
                    "[processor.start] processor active"
                );
                Ok(start)
            }
            Err(failure) => {
                self.state.status = ProcessorStatus::Failed;
                error!(
                    processor_id = %self.processor_id,
                    error = %failure,
                    "[processor.start] processor failed to start"
                );
                Err(failure)
            }
        }
    }

    async fn resolve_start(
        &mut self,
        context: Option<&E>,
        restarting: bool,
    ) -> Result<StartFrom, ProcessorError> {
        let executor = self.resolve_executor(context)?;

        let mut transaction = executor.begin().await?;
        let stored = checkpoint::read_processor_checkpoint(
            &mut transaction,
            &self.processor_id,
            self.partition.as_ref(),
            self.version,
        )
        .await;
        let stored = executor::complete(transaction, stored).await?;

        let start_from = if restarting {
            ProcessorStartFrom::Current
        } else {
            self.start_from
        };
        let start = match start_from {
            ProcessorStartFrom::Beginning => StartFrom::Beginning,
            ProcessorStartFrom::After(position) => StartFrom::After(position),
            ProcessorStartFrom::End => executor
                .last_global_position()
                .await?
                .map_or(StartFrom::Beginning, StartFrom::After),
            ProcessorStartFrom::Current => stored.map_or(StartFrom::Beginning, StartFrom::After),
        };

        self.state.checkpoint = stored;
        self.state.cursor = match start {
            StartFrom::After(position) => Some(position),
            StartFrom::Beginning | StartFrom::End => None,
        };
        Ok(start)
    }

    /// Handles a pulled batch.
    ///
    /// Events at or before the cursor are ignored. On error the failing unit
    /// is rolled back, the processor becomes [`ProcessorStatus::Failed`] and
    /// its checkpoint stays at the last committed message.
    #[instrument(
        name = "processor.handle",
        skip(self, batch, context),
        fields(processor_id = %self.processor_id, batch_size = batch.len())
    )]
    pub async fn handle(
        &mut self,
        batch: &[ReadEvent],
        context: Option<&E>,
    ) -> Result<BatchOutcome, ProcessorError> {
        if !self.is_active() {
            return Ok(BatchOutcome::Inactive);
        }

        let cursor = self.state.cursor;
        let pending_from = batch.partition_point(|event| Some(event.global_position()) <= cursor);
        let pending = &batch[pending_from..];
        if pending.is_empty() {
            return Ok(BatchOutcome::Continue);
        }

        match self.handle_pending(pending, context).await {
            Ok(BatchOutcome::Stopped(request)) => {
                self.state.status = ProcessorStatus::Stopped;
                info!(
                    processor_id = %self.processor_id,
                    reason = ?request.reason,
                    checkpoint = ?self.state.checkpoint,
                    "[processor.handle] processor stopped"
                );
                Ok(BatchOutcome::Stopped(request))
            }
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                self.state.status = ProcessorStatus::Failed;
                if matches!(failure, ProcessorError::CheckpointConflict { .. }) {
                    warn!(
                        processor_id = %self.processor_id,
                        error = %failure,
                        "[processor.handle] checkpoint conflict"
                    );
                } else {
                    error!(
                        processor_id = %self.processor_id,
                        error = %failure,
                        "[processor.handle] batch failed"
                    );
                }
                Err(failure)
            }
        }
    }

    /// Stops an active processor between batches.
    pub fn stop(&mut self) {
        if self.is_active() {
            self.state.status = ProcessorStatus::Stopped;
            info!(
                processor_id = %self.processor_id,
                checkpoint = ?self.state.checkpoint,
                "[processor.stop] processor stopped"
            );
        }
    }

    async fn handle_pending(
        &mut self,
        pending: &[ReadEvent],
        context: Option<&E>,
    ) -> Result<BatchOutcome, ProcessorError> {
        let executor = self.resolve_executor(context)?;

        let whole_batch = matches!(self.handler, ProcessorHandler::Batch(_))
            || self.transaction_scope == TransactionScope::PerBatch;
        if whole_batch {
            let stop = self.process_unit(&executor, pending).await?;
            return Ok(stop.map_or(BatchOutcome::Continue, BatchOutcome::Stopped));
        }

        for event in pending {
            if let Some(request) = self
                .process_unit(&executor, std::slice::from_ref(event))
                .await?
            {
                return Ok(BatchOutcome::Stopped(request));
            }
        }
        Ok(BatchOutcome::Continue)
    }

    async fn process_unit(
        &mut self,
        executor: &E,
        events: &[ReadEvent],
    ) -> Result<Option<StopRequest>, ProcessorError> {
        let mut transaction = executor.begin().await?;
        let result = self
            .process_in_transaction(executor, &mut transaction, events)
            .await;
        let unit = executor::complete(transaction, result).await?;

        if let Some(position) = unit.last_position {
            self.state.cursor = Some(position);
        }
        self.state.checkpoint = unit.checkpoint;
        self.state.messages_processed += unit.processed;
        Ok(unit.stop)
    }

    async fn process_in_transaction(
        &self,
        executor: &E,
        transaction: &mut E::Transaction,
        events: &[ReadEvent],
    ) -> Result<UnitOutcome, ProcessorError> {
        if let ProcessorHandler::Batch(handler) = &self.handler {
            return self
                .process_batch(handler.as_ref(), executor, transaction, events)
                .await;
        }

        let mut unit = UnitOutcome {
            processed: 0,
            last_position: None,
            checkpoint: self.state.checkpoint,
            stop: None,
        };

        for event in events {
            let position = event.global_position();
            let result = self
                .dispatch(executor, transaction, event)
                .await
                .map_err(|source| self.handler_error(position, source))?;

            unit.checkpoint = Some(
                self.store_checkpoint(transaction, unit.checkpoint, position)
                    .await?,
            );
            unit.processed += 1;
            unit.last_position = Some(position);

            match result {
                MessageHandlerResult::Continue => {}
                MessageHandlerResult::Skip { reason } => debug!(
                    processor_id = %self.processor_id,
                    position = %position,
                    reason = ?reason,
                    "[processor.handle] message skipped"
                ),
                MessageHandlerResult::Stop(request) => {
                    unit.stop = Some(request);
                    break;
                }
            }

            if self.stops_after(event) {
                unit.stop = Some(StopRequest::new("stop_after predicate matched"));
                break;
            }
        }
        Ok(unit)
    }

    async fn process_batch(
        &self,
        handler: &dyn BatchHandler<E>,
        executor: &E,
        transaction: &mut E::Transaction,
        events: &[ReadEvent],
    ) -> Result<UnitOutcome, ProcessorError> {
        let stop_index = events.iter().position(|event| self.stops_after(event));
        let events = stop_index.map_or(events, |index| &events[..=index]);

        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(UnitOutcome {
                processed: 0,
                last_position: None,
                checkpoint: self.state.checkpoint,
                stop: None,
            });
        };

        let result = {
            let mut context = self.context(executor, transaction);
            handler.handle(events, &mut context).await
        }
        .map_err(|source| self.handler_error(first.global_position(), source))?;

        let checkpoint = self
            .store_checkpoint(transaction, self.state.checkpoint, last.global_position())
            .await?;

        let stop = match result {
            MessageHandlerResult::Stop(request) => Some(request),
            MessageHandlerResult::Continue | MessageHandlerResult::Skip { .. } => stop_index
                .map(|_| StopRequest::new("stop_after predicate matched")),
        };

        Ok(UnitOutcome {
            processed: events.len() as u64,
            last_position: Some(last.global_position()),
            checkpoint: Some(checkpoint),
            stop,
        })
    }

    async fn dispatch(
        &self,
        executor: &E,
        transaction: &mut E::Transaction,
        event: &ReadEvent,
    ) -> Result<MessageHandlerResult, HandlerError> {
        let mut context = self.context(executor, transaction);
        match &self.handler {
            ProcessorHandler::Message(handler) => handler.handle(event, &mut context).await,
            ProcessorHandler::Batch(handler) => {
                handler
                    .handle(std::slice::from_ref(event), &mut context)
                    .await
            }
            ProcessorHandler::Projection(projection) => {
                if !projection.can_handle().contains(event.event_type()) {
                    return Ok(MessageHandlerResult::skip(
                        "event type not handled by projection",
                    ));
                }
                projection
                    .handle(std::slice::from_ref(event), &mut context)
                    .await?;
                Ok(MessageHandlerResult::Continue)
            }
        }
    }

    fn context<'a>(
        &'a self,
        executor: &'a E,
        transaction: &'a mut E::Transaction,
    ) -> HandlerContext<'a, E> {
        HandlerContext {
            transaction,
            executor,
            processor_id: &self.processor_id,
            partition: self.partition.as_ref(),
        }
    }

    fn stops_after(&self, event: &ReadEvent) -> bool {
        self.stop_after
            .as_ref()
            .is_some_and(|predicate| predicate(event))
    }

    fn handler_error(&self, position: GlobalPosition, source: HandlerError) -> ProcessorError {
        ProcessorError::Handler {
            processor_id: self.processor_id.clone(),
            position,
            source,
        }
    }

    async fn store_checkpoint(
        &self,
        transaction: &mut E::Transaction,
        expected: Option<GlobalPosition>,
        new_position: GlobalPosition,
    ) -> Result<GlobalPosition, ProcessorError> {
        let request = StoreCheckpoint {
            processor_id: &self.processor_id,
            partition: self.partition.as_ref(),
            version: self.version,
            last_processed_position: expected,
            new_position,
        };

        match checkpoint::store_processor_checkpoint(transaction, request).await {
            Ok(StoreCheckpointResult::Stored) => Ok(new_position),
            Ok(StoreCheckpointResult::Ignored { current }) => Ok(current),
            Err(CheckpointError::Conflict { expected, actual }) => {
                Err(ProcessorError::CheckpointConflict {
                    processor_id: self.processor_id.clone(),
                    partition: self.partition.clone(),
                    expected,
                    actual,
                })
            }
            Err(CheckpointError::Storage(error)) => Err(error.into()),
        }
    }
}

impl<E: Executor> fmt::Debug for Processor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("processor_id", &self.processor_id)
            .field("version", &self.version)
            .field("partition", &self.partition)
            .field("start_from", &self.start_from)
            .field("transaction_scope", &self.transaction_scope)
            .field("handler", &self.handler)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

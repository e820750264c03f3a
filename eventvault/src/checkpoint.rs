//! Durable processor checkpoints with optimistic writes.
//!
//! A checkpoint records the last global position a processor committed.
//! Writes are conditional on the value the writer last saw, so two instances
//! of the same processor can never silently overwrite each other, and they
//! never move a checkpoint backwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{CheckpointError, StorageError};
use crate::executor::Transaction;
use crate::types::{GlobalPosition, PartitionKey, ProcessorId};

/// Checkpoint version used when a processor does not set one.
pub const DEFAULT_CHECKPOINT_VERSION: u32 = 1;

/// One stored checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Owning processor.
    pub processor_id: ProcessorId,
    /// Partition of the processor, if any.
    pub partition: Option<PartitionKey>,
    /// Checkpoint schema version of the processor that wrote the row.
    pub version: u32,
    /// Last committed global position.
    pub last_processed_position: GlobalPosition,
}

/// Request to advance a checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct StoreCheckpoint<'a> {
    /// Owning processor.
    pub processor_id: &'a ProcessorId,
    /// Partition of the processor, if any.
    pub partition: Option<&'a PartitionKey>,
    /// Checkpoint schema version of the writer.
    pub version: u32,
    /// The checkpoint the writer last saw (`None` = none yet).
    pub last_processed_position: Option<GlobalPosition>,
    /// The position to store.
    pub new_position: GlobalPosition,
}

/// Successful outcome of [`store_processor_checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCheckpointResult {
    /// The new position was written.
    Stored,
    /// The stored checkpoint is already at or past the new position; nothing
    /// was written.
    Ignored {
        /// The stored position.
        current: GlobalPosition,
    },
}

/// Returns the stored position, treating a row of another version as absent.
fn effective_position(record: Option<&CheckpointRecord>, version: u32) -> Option<GlobalPosition> {
    record
        .filter(|record| record.version == version)
        .map(|record| record.last_processed_position)
}

/// Reads a processor's checkpoint.
///
/// A row written with a different checkpoint version is reported as `None`,
/// which restarts the processor from its configured start position.
pub async fn read_processor_checkpoint<T: Transaction>(
    transaction: &mut T,
    processor_id: &ProcessorId,
    partition: Option<&PartitionKey>,
    version: u32,
) -> Result<Option<GlobalPosition>, StorageError> {
    let record = transaction.read_checkpoint(processor_id, partition).await?;
    Ok(effective_position(record.as_ref(), version))
}

/// Advances a processor's checkpoint if nobody else moved it.
pub async fn store_processor_checkpoint<T: Transaction>(
    transaction: &mut T,
    request: StoreCheckpoint<'_>,
) -> Result<StoreCheckpointResult, CheckpointError> {
    let stored = transaction
        .read_checkpoint(request.processor_id, request.partition)
        .await?;
    let current = effective_position(stored.as_ref(), request.version);

    if current != request.last_processed_position {
        warn!(
            processor_id = %request.processor_id,
            expected = ?request.last_processed_position,
            actual = ?current,
            "[checkpoint.store] checkpoint moved concurrently"
        );
        return Err(CheckpointError::Conflict {
            expected: request.last_processed_position,
            actual: current,
        });
    }

    if let Some(current) = current {
        if current >= request.new_position {
            debug!(
                processor_id = %request.processor_id,
                current = %current,
                new_position = %request.new_position,
                "[checkpoint.store] checkpoint already past position"
            );
            return Ok(StoreCheckpointResult::Ignored { current });
        }
    }

    let record = CheckpointRecord {
        processor_id: request.processor_id.clone(),
        partition: request.partition.cloned(),
        version: request.version,
        last_processed_position: request.new_position,
    };

    if transaction.write_checkpoint(&record, stored.as_ref()).await? {
        return Ok(StoreCheckpointResult::Stored);
    }

    let actual = transaction
        .read_checkpoint(request.processor_id, request.partition)
        .await?;
    let actual = effective_position(actual.as_ref(), request.version);
    warn!(
        processor_id = %request.processor_id,
        expected = ?request.last_processed_position,
        actual = ?actual,
        "[checkpoint.store] concurrent checkpoint write detected"
    );
    Err(CheckpointError::Conflict {
        expected: request.last_processed_position,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u32, position: u64) -> CheckpointRecord {
        CheckpointRecord {
            processor_id: ProcessorId::try_new("carts").expect("valid processor id"),
            partition: None,
            version,
            last_processed_position: GlobalPosition::new(position),
        }
    }

    #[test]
    fn row_of_same_version_is_effective() {
        let stored = record(1, 5);

        assert_eq!(
            effective_position(Some(&stored), 1),
            Some(GlobalPosition::new(5))
        );
    }

    #[test]
    fn row_of_other_version_counts_as_missing() {
        let stored = record(1, 5);

        assert_eq!(effective_position(Some(&stored), 2), None);
        assert_eq!(effective_position(None, 1), None);
    }
}

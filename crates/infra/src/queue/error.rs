use thiserror::Error;

use payqueue_core::QueueItemId;

use super::lifecycle::TransitionError;
use super::registry::CodecError;
use crate::storage::StorageError;

/// Queue service error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The stored payload of an item could not be turned back into a task.
    /// The item is left untouched.
    #[error("queue item {id} has an undecodable task: {source}")]
    Deserialization {
        id: QueueItemId,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("queue item {0} not found")]
    NotFound(QueueItemId),

    #[error("queue item has not been persisted yet")]
    NotPersisted,

    /// The stored item changed between read and conditional write.
    #[error("queue item {0} was modified concurrently")]
    Conflict(QueueItemId),
}

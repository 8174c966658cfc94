//! Queue and tracker error types.

use thiserror::Error;
use vision_core::{RequestId, RequestStatus};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("request already queued: {0}")]
    Duplicate(RequestId),

    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
}

pub type QueueResult<T> = Result<T, QueueError>;

//! Scheduler error types.

use thiserror::Error;
use vision_core::{ModelError, RequestId, UnknownAction};

/// A malformed submission. The request never enters the queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("request has no images")]
    NoImages,

    #[error("model name is empty")]
    EmptyModel,

    #[error("owner e-mail is empty")]
    EmptyOwner,

    #[error(transparent)]
    UnknownAction(#[from] UnknownAction),

    #[error("image {0} has an empty payload")]
    EmptyPayload(String),

    #[error("image id {0} appears more than once")]
    DuplicateImageId(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("original images for request {0} are no longer available")]
    ImagesUnavailable(RequestId),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("queue error: {0}")]
    Queue(#[from] visiongrid_queue::QueueError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

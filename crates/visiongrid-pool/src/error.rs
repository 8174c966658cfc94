//! Worker pool error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("worker already registered: {0}")]
    AlreadyRegistered(String),

    #[error("port {0} is already in use by another worker")]
    PortInUse(u16),

    #[error("worker pool is at capacity ({0} workers)")]
    AtCapacity(u32),

    #[error("failed to launch worker: {0}")]
    Launch(String),

    #[error("worker {worker_id} not ready after {timeout:?}")]
    NotReady { worker_id: String, timeout: Duration },

    #[error("failed to terminate worker process: {0}")]
    Terminate(String),

    #[error("fabric error: {0}")]
    Fabric(#[from] visiongrid_fabric::FabricError),

    #[error("model error: {0}")]
    Model(#[from] vision_core::ModelError),
}

pub type PoolResult<T> = Result<T, PoolError>;

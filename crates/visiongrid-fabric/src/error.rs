//! Fabric error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("no host with role worker in datacenter {0}")]
    NoWorkerHost(String),

    #[error(
        "insufficient capacity for vm (cpu={cpu}, ram_gb={ram_gb}, storage_gb={storage_gb})"
    )]
    InsufficientCapacity {
        cpu: u32,
        ram_gb: u32,
        storage_gb: u32,
    },

    #[error("vm not found: {0}")]
    VmNotFound(String),

    #[error("vm {0} is not running")]
    VmNotRunning(String),

    #[error("vm {vm_id} already hosts {app}")]
    VmOccupied { vm_id: String, app: String },
}

pub type FabricResult<T> = Result<T, FabricError>;

//! visiongrid-pool — the worker pool registry and worker lifecycle.
//!
//! [`WorkerRegistry`] maps worker identity to address, VM, specialization and
//! health, and owns the pool of unclaimed ready workers. [`WorkerSupervisor`]
//! starts, stops and restarts worker processes on fabric VMs and keeps the
//! registry in step.

pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod registry;

pub use error::{PoolError, PoolResult};
pub use launcher::{ChildProcess, LaunchSpec, ProcessLauncher, WorkerLauncher, WorkerProcess};
pub use lifecycle::{SupervisorSettings, WorkerSupervisor};
pub use registry::{WorkerHealth, WorkerRecord, WorkerRegistry};

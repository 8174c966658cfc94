//! visiongrid-fabric — logical compute capacity for worker placement.
//!
//! Hosts, VMs, and the datacenter that owns them, plus the [`ResourceFabric`]
//! service the worker supervisor uses to allocate and release worker VMs.

pub mod error;
pub mod fabric;
pub mod host;
pub mod vm;

pub use error::{FabricError, FabricResult};
pub use fabric::{HostUsage, ResourceFabric};
pub use host::{Datacenter, Host};
pub use vm::{VirtualMachine, VmSize, VmStatus};

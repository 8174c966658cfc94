//! Logical virtual machines.
//!
//! A VM here is a resource-accounting unit, not an isolation boundary. It is
//! sized in cpu/ram/storage, carries a simulated address, and hosts at most
//! one worker application.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use vision_core::VmId;

use crate::error::{FabricError, FabricResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Stopped,
    Running,
}

/// Resource sizing for one VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSize {
    pub cpu: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub vm_id: VmId,
    pub size: VmSize,
    pub status: VmStatus,
    pub ip: Ipv4Addr,
    pub hosted_app: Option<String>,
}

impl VirtualMachine {
    pub fn new(vm_id: VmId, size: VmSize, ip: Ipv4Addr) -> Self {
        Self {
            vm_id,
            size,
            status: VmStatus::Stopped,
            ip,
            hosted_app: None,
        }
    }

    pub fn start(&mut self) {
        self.status = VmStatus::Running;
    }

    /// Stopping a VM detaches whatever it was hosting.
    pub fn stop(&mut self) {
        self.hosted_app = None;
        self.status = VmStatus::Stopped;
    }

    pub fn attach(&mut self, app: &str) -> FabricResult<()> {
        if self.status != VmStatus::Running {
            return Err(FabricError::VmNotRunning(self.vm_id.clone()));
        }
        if let Some(existing) = &self.hosted_app {
            return Err(FabricError::VmOccupied {
                vm_id: self.vm_id.clone(),
                app: existing.clone(),
            });
        }
        self.hosted_app = Some(app.to_string());
        Ok(())
    }

    pub fn detach(&mut self) -> Option<String> {
        self.hosted_app.take()
    }
}

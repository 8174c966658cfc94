//! Hosts and the datacenter that owns them.

use serde::{Deserialize, Serialize};
use vision_core::config::{HostConfig, HostRole};

use crate::error::{FabricError, FabricResult};
use crate::vm::{VirtualMachine, VmSize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub host_id: String,
    pub os: String,
    pub arch: String,
    pub role: HostRole,
    pub capacity: VmSize,
    pub vms: Vec<VirtualMachine>,
}

impl Host {
    pub fn from_config(cfg: &HostConfig) -> Self {
        Self {
            host_id: cfg.id.clone(),
            os: cfg.os.clone(),
            arch: cfg.arch.clone(),
            role: cfg.role,
            capacity: VmSize {
                cpu: cfg.cpu,
                ram_gb: cfg.ram_gb,
                storage_gb: cfg.storage_gb,
            },
            vms: Vec::new(),
        }
    }

    pub fn used(&self) -> VmSize {
        self.vms.iter().fold(
            VmSize {
                cpu: 0,
                ram_gb: 0,
                storage_gb: 0,
            },
            |acc, vm| VmSize {
                cpu: acc.cpu + vm.size.cpu,
                ram_gb: acc.ram_gb + vm.size.ram_gb,
                storage_gb: acc.storage_gb + vm.size.storage_gb,
            },
        )
    }

    pub fn free_cpu(&self) -> u32 {
        self.capacity.cpu.saturating_sub(self.used().cpu)
    }

    pub fn free_ram_gb(&self) -> u32 {
        self.capacity.ram_gb.saturating_sub(self.used().ram_gb)
    }

    pub fn free_storage_gb(&self) -> u32 {
        self.capacity.storage_gb.saturating_sub(self.used().storage_gb)
    }

    pub fn can_fit(&self, size: &VmSize) -> bool {
        self.free_cpu() >= size.cpu
            && self.free_ram_gb() >= size.ram_gb
            && self.free_storage_gb() >= size.storage_gb
    }

    /// Place a VM on this host. The sum of VM sizes never exceeds capacity.
    pub fn allocate_vm(&mut self, vm: VirtualMachine) -> FabricResult<()> {
        if !self.can_fit(&vm.size) {
            return Err(FabricError::InsufficientCapacity {
                cpu: vm.size.cpu,
                ram_gb: vm.size.ram_gb,
                storage_gb: vm.size.storage_gb,
            });
        }
        self.vms.push(vm);
        Ok(())
    }

    pub fn deallocate_vm(&mut self, vm_id: &str) -> Option<VirtualMachine> {
        let idx = self.vms.iter().position(|vm| vm.vm_id == vm_id)?;
        Some(self.vms.remove(idx))
    }

    pub fn vm_mut(&mut self, vm_id: &str) -> Option<&mut VirtualMachine> {
        self.vms.iter_mut().find(|vm| vm.vm_id == vm_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datacenter {
    pub datacenter_id: String,
    pub hosts: Vec<Host>,
}

impl Datacenter {
    pub fn vm_mut(&mut self, vm_id: &str) -> Option<&mut VirtualMachine> {
        self.hosts.iter_mut().find_map(|h| h.vm_mut(vm_id))
    }

    pub fn host_of_mut(&mut self, vm_id: &str) -> Option<&mut Host> {
        self.hosts
            .iter_mut()
            .find(|h| h.vms.iter().any(|vm| vm.vm_id == vm_id))
    }
}

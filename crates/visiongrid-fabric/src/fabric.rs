//! Resource fabric service.
//!
//! Owns the datacenter and serializes every VM mutation behind one lock.
//! Worker VMs are placed first-fit on worker-role hosts.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use vision_core::VmId;
use vision_core::config::{FabricConfig, HostRole};

use crate::error::{FabricError, FabricResult};
use crate::host::{Datacenter, Host};
use crate::vm::{VirtualMachine, VmSize, VmStatus};

/// Per-host utilization, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostUsage {
    pub host_id: String,
    pub role: HostRole,
    pub vm_count: usize,
    pub running_vms: usize,
    pub used: VmSize,
    pub capacity: VmSize,
}

pub struct ResourceFabric {
    datacenter: Mutex<Datacenter>,
    vm_size: VmSize,
    next_vm: AtomicU64,
}

impl ResourceFabric {
    pub fn from_config(cfg: &FabricConfig) -> Self {
        let datacenter = Datacenter {
            datacenter_id: cfg.datacenter.clone(),
            hosts: cfg.hosts.iter().map(Host::from_config).collect(),
        };
        Self {
            datacenter: Mutex::new(datacenter),
            vm_size: VmSize {
                cpu: cfg.vm_cpu,
                ram_gb: cfg.vm_ram_gb,
                storage_gb: cfg.vm_storage_gb,
            },
            next_vm: AtomicU64::new(1),
        }
    }

    /// Allocate a worker-sized VM on the first worker host with room.
    pub async fn allocate_vm(&self) -> FabricResult<VmId> {
        let mut dc = self.datacenter.lock().await;
        let size = self.vm_size;

        if !dc.hosts.iter().any(|h| h.role == HostRole::Worker) {
            return Err(FabricError::NoWorkerHost(dc.datacenter_id.clone()));
        }

        let host = dc
            .hosts
            .iter_mut()
            .filter(|h| h.role == HostRole::Worker)
            .find(|h| h.can_fit(&size))
            .ok_or(FabricError::InsufficientCapacity {
                cpu: size.cpu,
                ram_gb: size.ram_gb,
                storage_gb: size.storage_gb,
            })?;

        let n = self.next_vm.fetch_add(1, Ordering::Relaxed);
        let vm_id = format!("vm-{n}");
        let ip = simulated_ip(n);
        host.allocate_vm(VirtualMachine::new(vm_id.clone(), size, ip))?;

        debug!(%vm_id, host = %host.host_id, %ip, "vm allocated");
        Ok(vm_id)
    }

    pub async fn start_vm(&self, vm_id: &str) -> FabricResult<()> {
        let mut dc = self.datacenter.lock().await;
        let vm = dc
            .vm_mut(vm_id)
            .ok_or_else(|| FabricError::VmNotFound(vm_id.to_string()))?;
        vm.start();
        Ok(())
    }

    /// Associate a worker application with a running VM.
    pub async fn attach_worker(&self, vm_id: &str, app: &str) -> FabricResult<()> {
        let mut dc = self.datacenter.lock().await;
        let vm = dc
            .vm_mut(vm_id)
            .ok_or_else(|| FabricError::VmNotFound(vm_id.to_string()))?;
        vm.attach(app)
    }

    /// Detach the worker, stop the VM, and return its resources to the host.
    pub async fn release_vm(&self, vm_id: &str) -> FabricResult<()> {
        let mut dc = self.datacenter.lock().await;
        let host = dc
            .host_of_mut(vm_id)
            .ok_or_else(|| FabricError::VmNotFound(vm_id.to_string()))?;
        let host_id = host.host_id.clone();
        if let Some(mut vm) = host.deallocate_vm(vm_id) {
            let app = vm.detach();
            vm.stop();
            info!(%vm_id, host = %host_id, app = ?app, "vm released");
        }
        Ok(())
    }

    pub async fn vm(&self, vm_id: &str) -> Option<VirtualMachine> {
        let dc = self.datacenter.lock().await;
        dc.hosts
            .iter()
            .flat_map(|h| h.vms.iter())
            .find(|vm| vm.vm_id == vm_id)
            .cloned()
    }

    pub async fn vm_count(&self) -> usize {
        let dc = self.datacenter.lock().await;
        dc.hosts.iter().map(|h| h.vms.len()).sum()
    }

    pub async fn snapshot(&self) -> Vec<HostUsage> {
        let dc = self.datacenter.lock().await;
        dc.hosts
            .iter()
            .map(|h| HostUsage {
                host_id: h.host_id.clone(),
                role: h.role,
                vm_count: h.vms.len(),
                running_vms: h
                    .vms
                    .iter()
                    .filter(|vm| vm.status == VmStatus::Running)
                    .count(),
                used: h.used(),
                capacity: h.capacity,
            })
            .collect()
    }
}

fn simulated_ip(n: u64) -> Ipv4Addr {
    // 192.168.1.2 ..= 192.168.1.254
    let last = 2 + (n % 253) as u8;
    Ipv4Addr::new(192, 168, 1, last)
}

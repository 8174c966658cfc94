//! Worker lifecycle: start, stop, restart.
//!
//! Starting a worker walks the fabric and the launcher outside the registry
//! lock:
//!
//! ```text
//! reserve port ─▶ allocate VM ─▶ start VM ─▶ resolve model ─▶ launch
//!      ─▶ attach to VM ─▶ wait_until_ready ─▶ register (Ready, pooled)
//! ```
//!
//! Any failure along the way rolls back what was done: the process is
//! terminated, the VM released, and the port reservation dropped. The slot
//! stays empty until the next autoscaler tick re-evaluates the deficit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use vision_core::{ModelCatalog, Specialization, VmId, WorkerId, worker_id_for_port};
use visiongrid_fabric::ResourceFabric;
use visiongrid_health::HealthProber;

use crate::error::{PoolError, PoolResult};
use crate::launcher::{LaunchSpec, WorkerLauncher, WorkerProcess};
use crate::registry::{WorkerRecord, WorkerRegistry};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub base_worker_port: u16,
    pub max_workers: u32,
    /// How long a freshly launched worker has to pass its readiness probe.
    pub ready_timeout: Duration,
}

pub struct WorkerSupervisor {
    registry: Arc<WorkerRegistry>,
    fabric: Arc<ResourceFabric>,
    launcher: Arc<dyn WorkerLauncher>,
    prober: HealthProber,
    catalog: Arc<ModelCatalog>,
    settings: SupervisorSettings,
    processes: Mutex<HashMap<WorkerId, Box<dyn WorkerProcess>>>,
}

impl WorkerSupervisor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        fabric: Arc<ResourceFabric>,
        launcher: Arc<dyn WorkerLauncher>,
        prober: HealthProber,
        catalog: Arc<ModelCatalog>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            registry,
            fabric,
            launcher,
            prober,
            catalog,
            settings,
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn prober(&self) -> &HealthProber {
        &self.prober
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    // ── Start ─────────────────────────────────────────────────────

    /// Start up to `count` workers for `specialization` concurrently.
    /// Returns how many became ready; failures are logged.
    pub async fn start_workers(
        self: &Arc<Self>,
        count: u32,
        specialization: &Specialization,
    ) -> u32 {
        let ports = self
            .registry
            .reserve_slots(
                count,
                self.settings.base_worker_port,
                self.settings.max_workers,
                specialization,
            )
            .await;
        self.start_on_ports(ports, specialization).await
    }

    /// Start workers for `specialization` until `target` are live.
    pub async fn scale_up_to(
        self: &Arc<Self>,
        target: u32,
        specialization: &Specialization,
    ) -> u32 {
        let ports = self
            .registry
            .reserve_to_target(
                target,
                self.settings.base_worker_port,
                self.settings.max_workers,
                specialization,
            )
            .await;
        self.start_on_ports(ports, specialization).await
    }

    async fn start_on_ports(
        self: &Arc<Self>,
        ports: Vec<u16>,
        specialization: &Specialization,
    ) -> u32 {
        if ports.is_empty() {
            return 0;
        }

        let mut set = JoinSet::new();
        for port in ports {
            let this = Arc::clone(self);
            let spec = specialization.clone();
            set.spawn(async move { this.start_reserved(port, &spec).await });
        }

        let mut started = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(_)) => started += 1,
                Ok(Err(e)) => warn!(error = %e, "worker start failed; slot left empty"),
                Err(e) => error!(error = %e, "worker start task panicked"),
            }
        }
        started
    }

    /// Start a single worker at the lowest free port.
    pub async fn start_worker(&self, specialization: &Specialization) -> PoolResult<WorkerRecord> {
        let ports = self
            .registry
            .reserve_slots(
                1,
                self.settings.base_worker_port,
                self.settings.max_workers,
                specialization,
            )
            .await;
        let port = ports
            .first()
            .copied()
            .ok_or(PoolError::AtCapacity(self.settings.max_workers))?;
        self.start_reserved(port, specialization).await
    }

    /// Bring up a worker on an already reserved port.
    async fn start_reserved(
        &self,
        port: u16,
        specialization: &Specialization,
    ) -> PoolResult<WorkerRecord> {
        let worker_id = worker_id_for_port(port);
        let vm_id = match self.fabric.allocate_vm().await {
            Ok(vm_id) => vm_id,
            Err(e) => {
                self.registry.abandon_reservation(port).await;
                return Err(e.into());
            }
        };

        match self.launch_on_vm(&worker_id, port, &vm_id, specialization).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.rollback(&worker_id, port, &vm_id).await;
                Err(e)
            }
        }
    }

    async fn launch_on_vm(
        &self,
        worker_id: &str,
        port: u16,
        vm_id: &VmId,
        specialization: &Specialization,
    ) -> PoolResult<WorkerRecord> {
        self.fabric.start_vm(vm_id).await?;
        let model_path = self.catalog.resolve(&specialization.model_name)?;

        let spec = LaunchSpec {
            port,
            vm_id: vm_id.clone(),
            model_name: specialization.model_name.clone(),
            action_type: specialization.action_type,
            model_path,
        };
        let process = self.launcher.launch(&spec).await?;
        self.processes
            .lock()
            .await
            .insert(worker_id.to_string(), process);

        self.fabric.attach_worker(vm_id, worker_id).await?;

        let address = self.registry.address_for(port);
        if !self
            .prober
            .wait_until_ready(&address, self.settings.ready_timeout)
            .await
        {
            return Err(PoolError::NotReady {
                worker_id: worker_id.to_string(),
                timeout: self.settings.ready_timeout,
            });
        }

        self.registry
            .register_worker(worker_id, port, vm_id.clone(), specialization)
            .await
    }

    async fn rollback(&self, worker_id: &str, port: u16, vm_id: &str) {
        self.terminate_process(worker_id).await;
        if let Err(e) = self.fabric.release_vm(vm_id).await {
            warn!(%worker_id, %vm_id, error = %e, "vm release during rollback failed");
        }
        self.registry.abandon_reservation(port).await;
    }

    // ── Stop ──────────────────────────────────────────────────────

    /// Remove a worker from the registry and pool, terminate its process,
    /// and release its VM. Termination failures are logged, not returned.
    pub async fn stop_worker(&self, worker_id: &str) -> PoolResult<WorkerRecord> {
        let record = self
            .registry
            .remove_worker(worker_id)
            .await
            .ok_or_else(|| PoolError::WorkerNotFound(worker_id.to_string()))?;
        self.teardown(&record).await;
        Ok(record)
    }

    /// Stop a worker only if it is idle in the pool. Returns the removed
    /// record, or `None` if the worker was claimed or already gone.
    pub async fn stop_if_idle(&self, worker_id: &str) -> Option<WorkerRecord> {
        let record = self.registry.remove_if_idle(worker_id).await?;
        self.teardown(&record).await;
        Some(record)
    }

    async fn teardown(&self, record: &WorkerRecord) {
        self.terminate_process(&record.worker_id).await;
        if let Some(vm_id) = &record.vm_id
            && let Err(e) = self.fabric.release_vm(vm_id).await
        {
            warn!(worker_id = %record.worker_id, %vm_id, error = %e, "vm release failed");
        }
        info!(worker_id = %record.worker_id, address = %record.address, "worker stopped");
    }

    async fn terminate_process(&self, worker_id: &str) {
        let process = self.processes.lock().await.remove(worker_id);
        if let Some(mut process) = process
            && let Err(e) = process.terminate().await
        {
            warn!(%worker_id, error = %e, "worker process termination failed");
        }
    }

    // ── Restart ───────────────────────────────────────────────────

    /// Stop a worker and start a fresh one at the same port with the same
    /// specialization.
    pub async fn restart_worker(&self, worker_id: &str) -> PoolResult<WorkerRecord> {
        let old = self.stop_worker(worker_id).await?;
        self.registry
            .reserve_port(old.port, self.settings.max_workers, &old.specialization)
            .await?;
        info!(%worker_id, port = old.port, specialization = %old.specialization, "restarting worker");
        self.start_reserved(old.port, &old.specialization).await
    }

    /// Whether the worker's process is still running. `None` when no
    /// process is tracked for it.
    pub async fn process_alive(&self, worker_id: &str) -> Option<bool> {
        let mut processes = self.processes.lock().await;
        let process = processes.get_mut(worker_id)?;
        Some(process.is_alive().await)
    }

    /// Stop every registered worker.
    pub async fn stop_all(&self) {
        for record in self.registry.snapshot().await {
            if let Err(e) = self.stop_worker(&record.worker_id).await {
                warn!(worker_id = %record.worker_id, error = %e, "stop during shutdown failed");
            }
        }
    }
}

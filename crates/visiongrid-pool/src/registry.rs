//! Worker registry and available pool.
//!
//! One mutex guards both the worker records and the available pool, so a
//! worker leaves the registry and the pool in the same critical section.
//! Every address in the pool belongs to a `Ready` record. The lock is never
//! held across a network call or a process spawn.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vision_core::{Specialization, VmId, WorkerId, worker_id_for_port};

use crate::error::{PoolError, PoolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    /// Port reserved, process launching or not yet ready.
    Starting,
    Ready,
    /// A dispatch to this worker failed; the monitor decides its fate.
    Unresponsive,
    /// Removed from the registry. Only ever seen on returned records.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub address: String,
    pub port: u16,
    /// `None` only while `Starting`.
    pub vm_id: Option<VmId>,
    pub specialization: Specialization,
    pub health: WorkerHealth,
    pub registered_at: Instant,
    pub last_active_at: Instant,
}

impl WorkerRecord {
    pub fn is_live(&self) -> bool {
        matches!(
            self.health,
            WorkerHealth::Starting | WorkerHealth::Ready | WorkerHealth::Unresponsive
        )
    }
}

#[derive(Default)]
struct RegistryInner {
    workers: HashMap<WorkerId, WorkerRecord>,
    /// Unclaimed ready workers, in release order.
    available: VecDeque<WorkerId>,
}

impl RegistryInner {
    fn live_count(&self) -> u32 {
        self.workers.values().filter(|w| w.is_live()).count() as u32
    }

    fn find_by_address(&self, address: &str) -> Option<WorkerId> {
        self.workers
            .values()
            .find(|w| w.address == address)
            .map(|w| w.worker_id.clone())
    }

    fn drop_from_pool(&mut self, worker_id: &str) {
        self.available.retain(|id| id != worker_id);
    }
}

pub struct WorkerRegistry {
    worker_host: String,
    inner: Mutex<RegistryInner>,
}

impl WorkerRegistry {
    pub fn new(worker_host: impl Into<String>) -> Self {
        Self {
            worker_host: worker_host.into(),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn address_for(&self, port: u16) -> String {
        format!("{}:{port}", self.worker_host)
    }

    fn starting_record(&self, port: u16, specialization: &Specialization) -> WorkerRecord {
        let now = Instant::now();
        WorkerRecord {
            worker_id: worker_id_for_port(port),
            address: self.address_for(port),
            port,
            vm_id: None,
            specialization: specialization.clone(),
            health: WorkerHealth::Starting,
            registered_at: now,
            last_active_at: now,
        }
    }

    // ── Reservations ──────────────────────────────────────────────

    /// Reserve up to `count` ports for new workers, bounded by `max_workers`
    /// live workers in total. Picks the lowest free ports at or above
    /// `base_port` and records them as `Starting`.
    pub async fn reserve_slots(
        &self,
        count: u32,
        base_port: u16,
        max_workers: u32,
        specialization: &Specialization,
    ) -> Vec<u16> {
        let mut inner = self.inner.lock().await;
        self.reserve_locked(&mut inner, count, base_port, max_workers, specialization)
    }

    /// Reserve enough ports to bring the live count up to `target`. The
    /// deficit is computed under the same lock as the reservation, so
    /// concurrent scalers never overshoot.
    pub async fn reserve_to_target(
        &self,
        target: u32,
        base_port: u16,
        max_workers: u32,
        specialization: &Specialization,
    ) -> Vec<u16> {
        let mut inner = self.inner.lock().await;
        let deficit = target.saturating_sub(inner.live_count());
        self.reserve_locked(&mut inner, deficit, base_port, max_workers, specialization)
    }

    fn reserve_locked(
        &self,
        inner: &mut RegistryInner,
        count: u32,
        base_port: u16,
        max_workers: u32,
        specialization: &Specialization,
    ) -> Vec<u16> {
        let room = max_workers.saturating_sub(inner.live_count());
        let wanted = count.min(room) as usize;

        let used: HashSet<u16> = inner.workers.values().map(|w| w.port).collect();
        let mut ports = Vec::with_capacity(wanted);
        let mut next = Some(base_port);
        while ports.len() < wanted {
            let Some(port) = next else { break };
            if !used.contains(&port) {
                ports.push(port);
            }
            next = port.checked_add(1);
        }

        for &port in &ports {
            let record = self.starting_record(port, specialization);
            inner.workers.insert(record.worker_id.clone(), record);
        }
        if !ports.is_empty() {
            debug!(?ports, %specialization, "reserved worker slots");
        }
        ports
    }

    /// Reserve one specific port (used when restarting a worker in place).
    pub async fn reserve_port(
        &self,
        port: u16,
        max_workers: u32,
        specialization: &Specialization,
    ) -> PoolResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.workers.values().any(|w| w.port == port) {
            return Err(PoolError::PortInUse(port));
        }
        if inner.live_count() >= max_workers {
            return Err(PoolError::AtCapacity(max_workers));
        }
        let record = self.starting_record(port, specialization);
        inner.workers.insert(record.worker_id.clone(), record);
        Ok(())
    }

    /// Drop a `Starting` reservation whose worker never became ready.
    pub async fn abandon_reservation(&self, port: u16) {
        let mut inner = self.inner.lock().await;
        let worker_id = worker_id_for_port(port);
        if inner
            .workers
            .get(&worker_id)
            .is_some_and(|w| w.health == WorkerHealth::Starting)
        {
            inner.workers.remove(&worker_id);
        }
    }

    // ── Registration ──────────────────────────────────────────────

    /// Mark a worker `Ready` and place it into the available pool. Call only
    /// after the worker passed its readiness probe.
    pub async fn register_worker(
        &self,
        worker_id: &str,
        port: u16,
        vm_id: VmId,
        specialization: &Specialization,
    ) -> PoolResult<WorkerRecord> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.workers.get(worker_id)
            && existing.health != WorkerHealth::Starting
        {
            return Err(PoolError::AlreadyRegistered(worker_id.to_string()));
        }
        if inner
            .workers
            .values()
            .any(|w| w.port == port && w.worker_id != worker_id)
        {
            return Err(PoolError::PortInUse(port));
        }

        let now = Instant::now();
        let record = WorkerRecord {
            worker_id: worker_id.to_string(),
            address: self.address_for(port),
            port,
            vm_id: Some(vm_id),
            specialization: specialization.clone(),
            health: WorkerHealth::Ready,
            registered_at: now,
            last_active_at: now,
        };
        inner.workers.insert(worker_id.to_string(), record.clone());
        inner.available.push_back(worker_id.to_string());

        info!(
            %worker_id,
            address = %record.address,
            vm_id = ?record.vm_id,
            %specialization,
            "worker registered"
        );
        Ok(record)
    }

    /// Remove a worker from the registry and the pool in one step.
    /// The returned record carries `health = Stopped`.
    pub async fn remove_worker(&self, worker_id: &str) -> Option<WorkerRecord> {
        let mut inner = self.inner.lock().await;
        let mut record = inner.workers.remove(worker_id)?;
        inner.drop_from_pool(worker_id);
        record.health = WorkerHealth::Stopped;
        debug!(%worker_id, "worker removed from registry");
        Some(record)
    }

    /// Remove a worker only if it is sitting unclaimed in the pool.
    pub async fn remove_if_idle(&self, worker_id: &str) -> Option<WorkerRecord> {
        let mut inner = self.inner.lock().await;
        if !inner.available.iter().any(|id| id == worker_id) {
            return None;
        }
        let mut record = inner.workers.remove(worker_id)?;
        inner.drop_from_pool(worker_id);
        record.health = WorkerHealth::Stopped;
        Some(record)
    }

    // ── Claims ────────────────────────────────────────────────────

    /// Pop the first available worker launched for `specialization`.
    /// Non-blocking.
    pub async fn claim_worker(&self, specialization: &Specialization) -> Option<WorkerRecord> {
        self.claim_worker_excluding(specialization, &[]).await
    }

    /// Like [`claim_worker`](Self::claim_worker), skipping workers whose
    /// address is in `exclude`. Skipped workers stay in the pool.
    pub async fn claim_worker_excluding(
        &self,
        specialization: &Specialization,
        exclude: &[String],
    ) -> Option<WorkerRecord> {
        let mut inner = self.inner.lock().await;
        let pos = inner.available.iter().position(|id| {
            inner.workers.get(id).is_some_and(|w| {
                &w.specialization == specialization && !exclude.contains(&w.address)
            })
        })?;
        let worker_id = inner.available.remove(pos)?;
        inner.workers.get(&worker_id).cloned()
    }

    /// Return a worker to the pool and refresh its activity timestamp.
    /// Only `Ready` workers go back; returns whether it did.
    pub async fn release_worker(&self, address: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(worker_id) = inner.find_by_address(address) else {
            debug!(%address, "release of unknown worker ignored");
            return false;
        };
        if inner.available.contains(&worker_id) {
            return false;
        }
        let Some(record) = inner.workers.get_mut(&worker_id) else {
            return false;
        };
        if record.health != WorkerHealth::Ready {
            return false;
        }
        record.last_active_at = Instant::now();
        inner.available.push_back(worker_id);
        true
    }

    /// Record a failed dispatch. The worker stays out of the pool until the
    /// monitor either restores or restarts it.
    pub async fn mark_unresponsive(&self, address: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(worker_id) = inner.find_by_address(address) else {
            return false;
        };
        inner.drop_from_pool(&worker_id);
        match inner.workers.get_mut(&worker_id) {
            Some(record) if record.health == WorkerHealth::Ready => {
                record.health = WorkerHealth::Unresponsive;
                warn!(%worker_id, %address, "worker marked unresponsive");
                true
            }
            _ => false,
        }
    }

    /// Put an `Unresponsive` worker that passed its liveness probe back into
    /// the pool.
    pub async fn mark_ready(&self, worker_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.workers.get_mut(worker_id) {
            Some(record) if record.health == WorkerHealth::Unresponsive => {
                record.health = WorkerHealth::Ready;
                record.last_active_at = Instant::now();
                inner.available.push_back(worker_id.to_string());
                info!(%worker_id, "worker restored to pool");
                true
            }
            _ => false,
        }
    }

    // ── Reads ─────────────────────────────────────────────────────

    pub async fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.inner.lock().await.workers.get(worker_id).cloned()
    }

    /// Number of registered records, including reservations.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.workers.len()
    }

    pub async fn count_ready(&self) -> u32 {
        let inner = self.inner.lock().await;
        inner
            .workers
            .values()
            .filter(|w| w.health == WorkerHealth::Ready)
            .count() as u32
    }

    /// Starting + Ready + Unresponsive.
    pub async fn count_live(&self) -> u32 {
        self.inner.lock().await.live_count()
    }

    pub async fn count_live_for(&self, specialization: &Specialization) -> u32 {
        let inner = self.inner.lock().await;
        inner
            .workers
            .values()
            .filter(|w| w.is_live() && &w.specialization == specialization)
            .count() as u32
    }

    pub async fn available_count(&self) -> usize {
        self.inner.lock().await.available.len()
    }

    /// Addresses currently in the available pool, in claim order.
    pub async fn pool_addresses(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .available
            .iter()
            .filter_map(|id| inner.workers.get(id).map(|w| w.address.clone()))
            .collect()
    }

    /// Unclaimed ready workers, oldest-registered first.
    pub async fn idle_workers(&self) -> Vec<WorkerRecord> {
        let inner = self.inner.lock().await;
        let mut idle: Vec<WorkerRecord> = inner
            .available
            .iter()
            .filter_map(|id| inner.workers.get(id).cloned())
            .collect();
        idle.sort_by_key(|w| w.registered_at);
        idle
    }

    /// All records, ordered by port.
    pub async fn snapshot(&self) -> Vec<WorkerRecord> {
        let inner = self.inner.lock().await;
        let mut records: Vec<WorkerRecord> = inner.workers.values().cloned().collect();
        records.sort_by_key(|w| w.port);
        records
    }
}

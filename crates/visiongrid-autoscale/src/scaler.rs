//! Autoscaler: queue-depth driven worker scaling and fault eviction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vision_core::Specialization;
use visiongrid_pool::{WorkerHealth, WorkerSupervisor};
use visiongrid_queue::WorkQueue;

/// Shortest monitor period `run` accepts; `tokio::time::interval` panics on zero.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// A scaling decision for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Start this many workers.
    ScaleUp(u32),
    /// Stop up to this many idle workers.
    ScaleDown(u32),
    NoChange,
}

/// Compute the target pool size and the decision to reach it.
pub fn evaluate(outstanding: usize, live: u32, min: u32, max: u32) -> (u32, ScaleDecision) {
    let demand = u32::try_from(outstanding).unwrap_or(u32::MAX);
    let target = demand.clamp(min, max.max(min));
    let decision = if live < target {
        ScaleDecision::ScaleUp(target - live)
    } else if live > target {
        ScaleDecision::ScaleDown(live - target)
    } else {
        ScaleDecision::NoChange
    };
    (target, decision)
}

#[derive(Debug, Clone)]
pub struct AutoscalerSettings {
    pub min_workers: u32,
    pub max_workers: u32,
    pub idle_timeout: Duration,
    /// Specialization used to warm the pool when the queue is empty.
    pub default_specialization: Specialization,
}

/// What one monitor tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub target: u32,
    pub started: u32,
    pub stopped: u32,
    pub restarted: u32,
    pub restored: u32,
    pub evicted: u32,
}

impl TickReport {
    pub fn changed_anything(&self) -> bool {
        self.started + self.stopped + self.restarted + self.restored + self.evicted > 0
    }
}

pub struct Autoscaler {
    supervisor: Arc<WorkerSupervisor>,
    queue: Arc<WorkQueue>,
    settings: AutoscalerSettings,
}

impl Autoscaler {
    pub fn new(
        supervisor: Arc<WorkerSupervisor>,
        queue: Arc<WorkQueue>,
        settings: AutoscalerSettings,
    ) -> Self {
        Self {
            supervisor,
            queue,
            settings,
        }
    }

    pub fn settings(&self) -> &AutoscalerSettings {
        &self.settings
    }

    /// One monitor pass: scale to target, then evict faulty and idle workers.
    pub async fn tick(&self) -> TickReport {
        let specialization = self
            .queue
            .peek_specialization()
            .await
            .unwrap_or_else(|| self.settings.default_specialization.clone());

        let mut report = TickReport::default();
        self.scale_to_target(&specialization, &mut report).await;
        self.evict_faults(&mut report).await;

        if report.changed_anything() {
            info!(
                target = report.target,
                started = report.started,
                stopped = report.stopped,
                restarted = report.restarted,
                restored = report.restored,
                evicted = report.evicted,
                "autoscaler tick"
            );
        }
        report
    }

    async fn scale_to_target(&self, specialization: &Specialization, report: &mut TickReport) {
        let registry = self.supervisor.registry();
        let outstanding = self.queue.outstanding().await;
        let live = registry.count_live().await;
        let (target, decision) = evaluate(
            outstanding,
            live,
            self.settings.min_workers,
            self.settings.max_workers,
        );
        report.target = target;

        match decision {
            ScaleDecision::ScaleUp(n) => {
                debug!(outstanding, live, target, n, %specialization, "scaling up");
                report.started += self.supervisor.scale_up_to(target, specialization).await;
            }
            ScaleDecision::ScaleDown(n) => {
                debug!(outstanding, live, target, n, "scaling down");
                for worker in registry.idle_workers().await.into_iter().take(n as usize) {
                    if self.supervisor.stop_if_idle(&worker.worker_id).await.is_some() {
                        report.stopped += 1;
                    }
                }
            }
            ScaleDecision::NoChange => {}
        }
    }

    async fn evict_faults(&self, report: &mut TickReport) {
        let registry = self.supervisor.registry();
        let candidates: Vec<_> = registry
            .snapshot()
            .await
            .into_iter()
            .filter(|w| matches!(w.health, WorkerHealth::Ready | WorkerHealth::Unresponsive))
            .collect();

        // Probe concurrently; act on the results one by one.
        let mut probes = JoinSet::new();
        for worker in candidates {
            let prober = self.supervisor.prober().clone();
            let exited = self.supervisor.process_alive(&worker.worker_id).await == Some(false);
            probes.spawn(async move {
                let healthy = !exited && prober.is_healthy(&worker.address).await;
                (worker, healthy)
            });
        }

        let mut healthy_ready = Vec::new();
        while let Some(joined) = probes.join_next().await {
            let (worker, healthy) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "health probe task panicked");
                    continue;
                }
            };

            if !healthy {
                warn!(worker_id = %worker.worker_id, address = %worker.address, "liveness probe failed; restarting worker");
                match self.supervisor.restart_worker(&worker.worker_id).await {
                    Ok(_) => report.restarted += 1,
                    Err(e) => warn!(worker_id = %worker.worker_id, error = %e, "worker restart failed; slot left empty"),
                }
                continue;
            }

            if worker.health == WorkerHealth::Unresponsive {
                if registry.mark_ready(&worker.worker_id).await {
                    report.restored += 1;
                }
                continue;
            }
            healthy_ready.push(worker.worker_id);
        }

        self.evict_idle(&healthy_ready, report).await;
    }

    async fn evict_idle(&self, healthy: &[String], report: &mut TickReport) {
        let registry = self.supervisor.registry();
        let mut live = registry.count_live().await;

        for worker in registry.idle_workers().await {
            if live <= self.settings.min_workers {
                break;
            }
            if !healthy.contains(&worker.worker_id)
                || worker.last_active_at.elapsed() <= self.settings.idle_timeout
            {
                continue;
            }
            if self.supervisor.stop_if_idle(&worker.worker_id).await.is_some() {
                info!(
                    worker_id = %worker.worker_id,
                    idle_secs = worker.last_active_at.elapsed().as_secs(),
                    "idle worker evicted"
                );
                live -= 1;
                report.evicted += 1;
            }
        }
    }

    /// Make sure the pool can serve `specialization` before dispatch.
    ///
    /// Scales toward the current target for that specialization and, if no
    /// live worker serves it, starts one, first stopping an idle worker of
    /// another specialization when the pool is full. Returns the number of
    /// workers started.
    pub async fn ensure_capacity(&self, specialization: &Specialization) -> u32 {
        let registry = self.supervisor.registry();
        let outstanding = self.queue.outstanding().await;
        let (target, _) = evaluate(
            outstanding,
            0,
            self.settings.min_workers,
            self.settings.max_workers,
        );

        let mut started = self.supervisor.scale_up_to(target, specialization).await;

        if registry.count_live_for(specialization).await == 0 {
            if registry.count_live().await >= self.settings.max_workers {
                let victim = registry
                    .idle_workers()
                    .await
                    .into_iter()
                    .find(|w| &w.specialization != specialization);
                if let Some(victim) = victim
                    && self.supervisor.stop_if_idle(&victim.worker_id).await.is_some()
                {
                    info!(
                        worker_id = %victim.worker_id,
                        from = %victim.specialization,
                        to = %specialization,
                        "evicted idle worker to make room"
                    );
                }
            }
            match self.supervisor.start_worker(specialization).await {
                Ok(_) => started += 1,
                Err(e) => warn!(%specialization, error = %e, "could not start specialized worker"),
            }
        }
        started
    }

    /// Run the monitor loop until `shutdown` flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if interval < MIN_MONITOR_INTERVAL {
            warn!(?interval, floor = ?MIN_MONITOR_INTERVAL, "monitor interval raised to floor");
        }
        let interval = interval.max(MIN_MONITOR_INTERVAL);
        info!(interval_ms = interval.as_millis() as u64, "autoscaler started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

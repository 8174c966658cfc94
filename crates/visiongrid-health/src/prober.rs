//! Worker health probes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use visiongrid_rpc::{RpcError, WorkerClient};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The worker answered with an ok status.
    Healthy,
    /// The worker answered, but not with an ok status.
    Unhealthy,
    /// The probe could not be executed (connection error, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeResult::Healthy)
    }
}

#[derive(Clone)]
pub struct HealthProber {
    client: Arc<dyn WorkerClient>,
    /// Bound on a single probe RPC.
    probe_timeout: Duration,
    /// Fixed sleep between readiness attempts.
    backoff: Duration,
}

impl HealthProber {
    pub fn new(client: Arc<dyn WorkerClient>, probe_timeout: Duration, backoff: Duration) -> Self {
        Self {
            client,
            probe_timeout,
            backoff,
        }
    }

    /// Issue one health RPC.
    pub async fn probe(&self, address: &str) -> ProbeResult {
        match self.client.health_check(address, self.probe_timeout).await {
            Ok(resp) if resp.is_ok() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(%address, status = %resp.status, "health probe not ok");
                ProbeResult::Unhealthy
            }
            Err(RpcError::Status { status, .. }) => {
                debug!(%address, status, "health probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(%address, error = %e, "health probe failed");
                ProbeResult::Failed
            }
        }
    }

    /// Single-shot liveness check used by the monitor loop.
    pub async fn is_healthy(&self, address: &str) -> bool {
        self.probe(address).await.is_healthy()
    }

    /// Probe with a fixed backoff until the worker answers or `timeout` elapses.
    pub async fn wait_until_ready(&self, address: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let per_probe = self.probe_timeout.min(remaining);
            let result = match tokio::time::timeout(
                per_probe,
                self.client.health_check(address, per_probe),
            )
            .await
            {
                Ok(Ok(resp)) if resp.is_ok() => ProbeResult::Healthy,
                Ok(Ok(_)) => ProbeResult::Unhealthy,
                Ok(Err(_)) | Err(_) => ProbeResult::Failed,
            };

            if result.is_healthy() {
                info!(%address, attempts, "worker ready");
                return true;
            }

            if Instant::now() + self.backoff >= deadline {
                warn!(%address, attempts, ?timeout, "worker not ready before deadline");
                return false;
            }
            tokio::time::sleep(self.backoff).await;
        }
    }
}

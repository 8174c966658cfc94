//! In-process fakes for scheduler tests: no sockets, no child processes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use vision_core::config::FabricConfig;
use vision_core::{
    ActionType, Credentials, ModelCatalog, Request, RequestStatus, RequestSummary, Specialization,
};
use visiongrid_autoscale::{Autoscaler, AutoscalerSettings};
use visiongrid_fabric::ResourceFabric;
use visiongrid_health::HealthProber;
use visiongrid_pool::{
    LaunchSpec, PoolResult, SupervisorSettings, WorkerLauncher, WorkerProcess, WorkerRegistry,
    WorkerSupervisor,
};
use visiongrid_queue::WorkQueue;
use visiongrid_rpc::{ChunkResponse, HealthResponse, RpcError, RpcResult, WorkerClient};
use visiongrid_scheduler::{
    Authenticator, Collaborators, DescriptionGenerator, DispatchSettings, ImageFetcher,
    ImageStore, Persistence, Scheduler, SchedulerSettings, TemplateDescriber,
};

// ── Workers ───────────────────────────────────────────────────────

/// Simulated worker fleet, keyed by port.
#[derive(Default)]
pub struct Fleet {
    /// Every launch, in order.
    pub launches: StdMutex<Vec<LaunchSpec>>,
    /// Ports with a running worker.
    pub running: StdMutex<HashSet<u16>>,
    /// Ports whose worker hangs: RPCs time out and health checks fail.
    pub hung: StdMutex<HashSet<u16>>,
    /// Address of every `process_chunk` call.
    pub calls: StdMutex<Vec<String>>,
    /// Simulated processing time per chunk.
    pub latency: StdMutex<Duration>,
}

impl Fleet {
    pub fn hang(&self, port: u16) {
        self.hung.lock().unwrap().insert(port);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn distinct_call_addresses(&self) -> usize {
        self.calls.lock().unwrap().iter().collect::<HashSet<_>>().len()
    }
}

fn port_of(address: &str) -> u16 {
    address
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

pub struct FakeLauncher(pub Arc<Fleet>);

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> PoolResult<Box<dyn WorkerProcess>> {
        self.0.launches.lock().unwrap().push(spec.clone());
        self.0.running.lock().unwrap().insert(spec.port);
        // A fresh process replaces whatever hung on this port.
        self.0.hung.lock().unwrap().remove(&spec.port);
        Ok(Box::new(FakeProcess {
            port: spec.port,
            fleet: self.0.clone(),
        }))
    }
}

pub struct FakeProcess {
    port: u16,
    fleet: Arc<Fleet>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    async fn is_alive(&mut self) -> bool {
        self.fleet.running.lock().unwrap().contains(&self.port)
    }

    async fn terminate(&mut self) -> PoolResult<()> {
        self.fleet.running.lock().unwrap().remove(&self.port);
        Ok(())
    }
}

pub struct FakeClient(pub Arc<Fleet>);

#[async_trait]
impl WorkerClient for FakeClient {
    async fn health_check(&self, address: &str, _timeout: Duration) -> RpcResult<HealthResponse> {
        let port = port_of(address);
        let up = self.0.running.lock().unwrap().contains(&port)
            && !self.0.hung.lock().unwrap().contains(&port);
        if up {
            Ok(HealthResponse::ok())
        } else {
            Err(RpcError::Connect {
                address: address.to_string(),
                reason: "connection refused".into(),
            })
        }
    }

    async fn process_chunk(
        &self,
        address: &str,
        _payload: Bytes,
        action: ActionType,
        timeout: Duration,
    ) -> RpcResult<ChunkResponse> {
        self.0.calls.lock().unwrap().push(address.to_string());
        let port = port_of(address);
        if self.0.hung.lock().unwrap().contains(&port) {
            tokio::time::sleep(timeout).await;
            return Err(RpcError::Timeout {
                address: address.to_string(),
                timeout,
            });
        }
        let latency = *self.0.latency.lock().unwrap();
        tokio::time::sleep(latency).await;

        let result = match action {
            ActionType::Classify => {
                r#"{"predicted_class": "benign", "confidence": 0.75}"#.to_string()
            }
            _ => format!(r#"[{{"class": "object-{port}", "confidence": 0.9}}]"#),
        };
        Ok(ChunkResponse {
            result,
            worker_id: format!("worker-{port}"),
        })
    }
}

// ── Collaborators ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryPersistence {
    pub requests: StdMutex<HashMap<String, Request>>,
    pub results: StdMutex<HashMap<String, Vec<String>>>,
    /// Every status written, in order.
    pub history: StdMutex<Vec<(String, RequestStatus)>>,
}

impl MemoryPersistence {
    pub fn statuses_of(&self, request_id: &str) -> Vec<RequestStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == request_id)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save_request(&self, request: &Request) -> anyhow::Result<()> {
        self.history
            .lock()
            .unwrap()
            .push((request.id.clone(), request.status));
        self.requests
            .lock()
            .unwrap()
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        failure_reason: Option<String>,
    ) -> anyhow::Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| anyhow::anyhow!("request not found: {request_id}"))?;
        request.status = status;
        if failure_reason.is_some() {
            request.failure_reason = failure_reason;
        }
        self.history
            .lock()
            .unwrap()
            .push((request_id.to_string(), status));
        Ok(())
    }

    async fn save_result(
        &self,
        request_id: &str,
        _owner_email: &str,
        descriptions: &[String],
    ) -> anyhow::Result<()> {
        self.results
            .lock()
            .unwrap()
            .insert(request_id.to_string(), descriptions.to_vec());
        Ok(())
    }

    async fn get_result(&self, request_id: &str) -> anyhow::Result<Option<Vec<String>>> {
        Ok(self.results.lock().unwrap().get(request_id).cloned())
    }

    async fn get_request(&self, request_id: &str) -> anyhow::Result<Option<Request>> {
        let mut request = match self.requests.lock().unwrap().get(request_id) {
            Some(r) => r.clone(),
            None => return Ok(None),
        };
        request.result = self.results.lock().unwrap().get(request_id).cloned();
        Ok(Some(request))
    }

    async fn delete_request(&self, request_id: &str) -> anyhow::Result<bool> {
        self.results.lock().unwrap().remove(request_id);
        Ok(self.requests.lock().unwrap().remove(request_id).is_some())
    }

    async fn list_requests(&self, owner_email: &str) -> anyhow::Result<Vec<RequestSummary>> {
        let mut out: Vec<RequestSummary> = self
            .requests
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.owner_email == owner_email)
            .map(|r| RequestSummary {
                request_id: r.id.clone(),
                status: r.status,
                created_at: r.created_at,
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

/// Accepts a single hard-coded password.
pub struct PasswordAuth;

#[async_trait]
impl Authenticator for PasswordAuth {
    async fn authenticate(&self, credentials: &Credentials) -> anyhow::Result<bool> {
        Ok(credentials.password == "secret")
    }
}

/// Serves a fixed set of URLs; everything else fails.
#[derive(Default)]
pub struct MapFetcher {
    pub images: StdMutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl ImageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Bytes> {
        self.images
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 for {url}"))
    }
}

#[derive(Default)]
pub struct MemoryImages {
    pub stored: StdMutex<HashMap<(String, String), Bytes>>,
}

#[async_trait]
impl ImageStore for MemoryImages {
    async fn store(&self, request_id: &str, image_id: &str, bytes: &Bytes) -> anyhow::Result<()> {
        self.stored
            .lock()
            .unwrap()
            .insert((request_id.to_string(), image_id.to_string()), bytes.clone());
        Ok(())
    }

    async fn load(&self, request_id: &str, image_id: &str) -> anyhow::Result<Option<Bytes>> {
        Ok(self
            .stored
            .lock()
            .unwrap()
            .get(&(request_id.to_string(), image_id.to_string()))
            .cloned())
    }

    async fn remove(&self, request_id: &str, image_ids: &[String]) -> anyhow::Result<()> {
        let mut stored = self.stored.lock().unwrap();
        for image_id in image_ids {
            stored.remove(&(request_id.to_string(), image_id.clone()));
        }
        Ok(())
    }
}

/// Counts how many detections it was asked to describe.
pub struct CountingDescriber {
    inner: TemplateDescriber,
    pub seen: StdMutex<Vec<Value>>,
}

#[async_trait]
impl DescriptionGenerator for CountingDescriber {
    async fn describe(&self, detections: &[Value]) -> Vec<String> {
        self.seen.lock().unwrap().extend(detections.iter().cloned());
        self.inner.describe(detections).await
    }
}

// ── Harness ───────────────────────────────────────────────────────

pub struct Knobs {
    pub min_workers: u32,
    pub max_workers: u32,
    pub idle_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub dispatch_attempts: u32,
    pub monitor_interval: Duration,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 10,
            idle_timeout: Duration::from_secs(360),
            dispatch_timeout: Duration::from_millis(200),
            dispatch_attempts: 2,
            monitor_interval: Duration::from_millis(50),
        }
    }
}

pub struct Harness {
    pub scheduler: Arc<Scheduler>,
    pub fleet: Arc<Fleet>,
    pub registry: Arc<WorkerRegistry>,
    pub fabric: Arc<ResourceFabric>,
    pub persistence: Arc<MemoryPersistence>,
    pub fetcher: Arc<MapFetcher>,
    pub images: Arc<MemoryImages>,
    pub describer: Arc<CountingDescriber>,
}

pub fn detect() -> Specialization {
    Specialization::new("yolov8n", ActionType::Detect)
}

pub fn harness(knobs: Knobs) -> Harness {
    let fleet = Arc::new(Fleet::default());
    *fleet.latency.lock().unwrap() = Duration::from_millis(20);

    let client: Arc<dyn WorkerClient> = Arc::new(FakeClient(fleet.clone()));
    let registry = Arc::new(WorkerRegistry::new("127.0.0.1"));

    let mut fabric_cfg = FabricConfig::default();
    for host in &mut fabric_cfg.hosts {
        host.cpu = 1024;
        host.ram_gb = 4096;
        host.storage_gb = 100_000;
    }
    let fabric = Arc::new(ResourceFabric::from_config(&fabric_cfg));

    let prober = HealthProber::new(
        client.clone(),
        Duration::from_millis(50),
        Duration::from_millis(10),
    );
    // No catalog file exists, so model names pass through to workers.
    let catalog = Arc::new(ModelCatalog::new("/nonexistent-models", &[]));
    let supervisor = Arc::new(WorkerSupervisor::new(
        registry.clone(),
        fabric.clone(),
        Arc::new(FakeLauncher(fleet.clone())),
        prober,
        catalog.clone(),
        SupervisorSettings {
            base_worker_port: 50052,
            max_workers: knobs.max_workers,
            ready_timeout: Duration::from_millis(200),
        },
    ));

    let queue = Arc::new(WorkQueue::new());
    let autoscaler = Arc::new(Autoscaler::new(
        supervisor.clone(),
        queue.clone(),
        AutoscalerSettings {
            min_workers: knobs.min_workers,
            max_workers: knobs.max_workers,
            idle_timeout: knobs.idle_timeout,
            default_specialization: detect(),
        },
    ));

    let persistence = Arc::new(MemoryPersistence::default());
    let fetcher = Arc::new(MapFetcher::default());
    let images = Arc::new(MemoryImages::default());
    let describer = Arc::new(CountingDescriber {
        inner: TemplateDescriber::new(),
        seen: StdMutex::new(Vec::new()),
    });

    let scheduler = Arc::new(Scheduler::new(
        queue,
        supervisor,
        autoscaler,
        client,
        catalog,
        Collaborators {
            persistence: persistence.clone(),
            authenticator: Arc::new(PasswordAuth),
            fetcher: fetcher.clone(),
            images: images.clone(),
            describer: describer.clone(),
        },
        SchedulerSettings {
            dispatch: DispatchSettings {
                claim_attempts: 20,
                claim_backoff: Duration::from_millis(10),
                dispatch_timeout: knobs.dispatch_timeout,
                dispatch_attempts: knobs.dispatch_attempts,
            },
            dispatch_loops: 1,
            monitor_interval: knobs.monitor_interval,
        },
    ));

    Harness {
        scheduler,
        fleet,
        registry,
        fabric,
        persistence,
        fetcher,
        images,
        describer,
    }
}

pub fn jpeg(tag: &str) -> Bytes {
    Bytes::from(format!("\u{ff}\u{d8}{tag}").into_bytes())
}

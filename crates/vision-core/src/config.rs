//! visiongrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ActionType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub fabric: FabricConfig,
    pub storage: StorageConfig,
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub base_worker_port: u16,
    pub min_workers: u32,
    pub max_workers: u32,
    pub worker_idle_timeout: String,
    pub health_probe_timeout: String,
    pub readiness_backoff: String,
    pub dispatch_timeout: String,
    pub monitor_interval: String,
    pub claim_attempts: u32,
    pub claim_backoff: String,
    pub dispatch_attempts: u32,
    pub dispatch_loops: u32,
    pub worker_host: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_worker_port: 50052,
            min_workers: 2,
            max_workers: 10,
            worker_idle_timeout: "360s".to_string(),
            health_probe_timeout: "15s".to_string(),
            readiness_backoff: "1s".to_string(),
            dispatch_timeout: "30s".to_string(),
            monitor_interval: "10s".to_string(),
            claim_attempts: 50,
            claim_backoff: "200ms".to_string(),
            dispatch_attempts: 2,
            dispatch_loops: 1,
            worker_host: "127.0.0.1".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn worker_idle_timeout(&self) -> Duration {
        parse_duration(&self.worker_idle_timeout).unwrap_or(Duration::from_secs(360))
    }

    pub fn health_probe_timeout(&self) -> Duration {
        parse_duration(&self.health_probe_timeout).unwrap_or(Duration::from_secs(15))
    }

    pub fn readiness_backoff(&self) -> Duration {
        parse_duration(&self.readiness_backoff).unwrap_or(Duration::from_secs(1))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        parse_duration(&self.dispatch_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn monitor_interval(&self) -> Duration {
        parse_duration(&self.monitor_interval).unwrap_or(Duration::from_secs(10))
    }

    pub fn claim_backoff(&self) -> Duration {
        parse_duration(&self.claim_backoff).unwrap_or(Duration::from_millis(200))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Argv prefix used to launch a worker process. The launcher appends
    /// `port vm_id model action model_path`.
    pub command: Vec<String>,
    pub default_model: String,
    pub default_action: ActionType,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "worker.py".to_string()],
            default_model: "yolov8".to_string(),
            default_action: ActionType::Detect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    Master,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub id: String,
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    pub cpu: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
    pub role: HostRole,
}

fn default_os() -> String {
    "linux".to_string()
}

fn default_arch() -> String {
    "x86_64".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub datacenter: String,
    pub hosts: Vec<HostConfig>,
    pub vm_cpu: u32,
    pub vm_ram_gb: u32,
    pub vm_storage_gb: u32,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            datacenter: "dc-1".to_string(),
            hosts: vec![
                HostConfig {
                    id: "host-master".to_string(),
                    os: default_os(),
                    arch: default_arch(),
                    cpu: 8,
                    ram_gb: 16,
                    storage_gb: 256,
                    role: HostRole::Master,
                },
                HostConfig {
                    id: "host-worker-1".to_string(),
                    os: default_os(),
                    arch: default_arch(),
                    cpu: 64,
                    ram_gb: 128,
                    storage_gb: 1024,
                    role: HostRole::Worker,
                },
            ],
            vm_cpu: 4,
            vm_ram_gb: 8,
            vm_storage_gb: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            models_dir: PathBuf::from("models"),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("visiongrid.redb")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl VisionConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VisionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.scheduler;
        if s.max_workers == 0 {
            anyhow::bail!("scheduler.max_workers must be at least 1");
        }
        if s.min_workers > s.max_workers {
            anyhow::bail!(
                "scheduler.min_workers ({}) exceeds scheduler.max_workers ({})",
                s.min_workers,
                s.max_workers
            );
        }
        if u32::from(s.base_worker_port) + s.max_workers > u32::from(u16::MAX) + 1 {
            anyhow::bail!("worker port range overflows starting at {}", s.base_worker_port);
        }
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            anyhow::bail!("worker.command must not be empty");
        }
        if !self.fabric.hosts.iter().any(|h| h.role == HostRole::Worker) {
            anyhow::bail!("fabric must contain at least one host with role = \"worker\"");
        }
        if s.claim_attempts == 0 {
            anyhow::bail!("scheduler.claim_attempts must be at least 1");
        }
        if s.dispatch_attempts == 0 {
            anyhow::bail!("scheduler.dispatch_attempts must be at least 1");
        }
        if s.dispatch_loops == 0 {
            anyhow::bail!("scheduler.dispatch_loops must be at least 1");
        }
        for (field, value) in [
            ("worker_idle_timeout", &s.worker_idle_timeout),
            ("health_probe_timeout", &s.health_probe_timeout),
            ("readiness_backoff", &s.readiness_backoff),
            ("dispatch_timeout", &s.dispatch_timeout),
            ("monitor_interval", &s.monitor_interval),
            ("claim_backoff", &s.claim_backoff),
        ] {
            match parse_duration(value) {
                None => anyhow::bail!("scheduler.{field}: invalid duration {value:?}"),
                // Periods and timeouts; zero panics tokio's interval or
                // expires every call immediately.
                Some(d) if d.is_zero() => anyhow::bail!("scheduler.{field} must be non-zero"),
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

//! Worker process launching.
//!
//! The supervisor only sees [`WorkerLauncher`] and [`WorkerProcess`], so tests
//! can substitute in-process fakes for real subprocesses.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};
use vision_core::{ActionType, VmId};

use crate::error::{PoolError, PoolResult};

/// Everything a worker process needs on its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub port: u16,
    pub vm_id: VmId,
    pub model_name: String,
    pub action_type: ActionType,
    pub model_path: String,
}

impl LaunchSpec {
    /// Arguments appended to the configured command prefix.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.port.to_string(),
            self.vm_id.clone(),
            self.model_name.clone(),
            self.action_type.as_str().to_string(),
            self.model_path.clone(),
        ]
    }
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> PoolResult<Box<dyn WorkerProcess>>;
}

#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// Whether the process has not exited yet.
    async fn is_alive(&mut self) -> bool;

    /// Kill the process and reap it.
    async fn terminate(&mut self) -> PoolResult<()>;
}

/// Spawns `<command...> <port> <vm_id> <model> <action> <model_path>`.
pub struct ProcessLauncher {
    command: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> PoolResult<Box<dyn WorkerProcess>> {
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or_else(|| PoolError::Launch("empty worker command".to_string()))?;

        let child = Command::new(program)
            .args(prefix)
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PoolError::Launch(format!("{program}: {e}")))?;

        info!(
            port = spec.port,
            vm_id = %spec.vm_id,
            model = %spec.model_name,
            action = %spec.action_type,
            pid = ?child.id(),
            "worker process spawned"
        );
        Ok(Box::new(ChildProcess { child }))
    }
}

pub struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    async fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) -> PoolResult<()> {
        if !self.is_alive().await {
            debug!("worker process already exited");
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| PoolError::Terminate(e.to_string()))
    }
}

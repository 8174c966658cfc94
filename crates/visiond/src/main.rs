//! visiond — the VisionGrid daemon.
//!
//! Single binary that assembles every VisionGrid subsystem:
//! - State store (redb) for requests, results and users
//! - Resource fabric, worker registry and supervisor
//! - Health prober and worker RPC client
//! - Autoscaler / monitor loop
//! - Scheduler with its Dispatch Loops
//!
//! # Usage
//!
//! ```text
//! visiond run --config visiongrid.toml
//! visiond check-config --config visiongrid.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vision_core::{ModelCatalog, Specialization, VisionConfig};
use visiongrid_autoscale::{Autoscaler, AutoscalerSettings};
use visiongrid_fabric::ResourceFabric;
use visiongrid_health::HealthProber;
use visiongrid_pool::{ProcessLauncher, SupervisorSettings, WorkerRegistry, WorkerSupervisor};
use visiongrid_queue::WorkQueue;
use visiongrid_rpc::{HttpWorkerClient, WorkerClient};
use visiongrid_scheduler::{
    Collaborators, FsImageStore, HttpImageFetcher, Scheduler, SchedulerSettings,
    StoreAuthenticator, TemplateDescriber,
};
use visiongrid_state::StateStore;

#[derive(Parser)]
#[command(name = "visiond", about = "VisionGrid image-analysis scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, worker pool and autoscaler until Ctrl-C.
    Run {
        /// Path to visiongrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,visiond=debug,visiongrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(load_config(config.as_deref())?).await,
        Command::CheckConfig { config } => {
            let cfg = load_config(config.as_deref())?;
            print!("{}", cfg.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<VisionConfig> {
    let cfg = match path {
        Some(path) => VisionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => VisionConfig::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Wire every subsystem together.
fn assemble(cfg: &VisionConfig) -> anyhow::Result<Arc<Scheduler>> {
    std::fs::create_dir_all(&cfg.storage.data_dir)
        .with_context(|| format!("creating {}", cfg.storage.data_dir.display()))?;

    // ── Storage ────────────────────────────────────────────────

    let db_path = cfg.storage.db_path();
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let catalog = Arc::new(ModelCatalog::new(&cfg.storage.models_dir, &cfg.models));
    info!(models = catalog.list().len(), dir = ?cfg.storage.models_dir, "model catalog loaded");

    // ── Worker pool ────────────────────────────────────────────

    let sched = &cfg.scheduler;
    let fabric = Arc::new(ResourceFabric::from_config(&cfg.fabric));
    let registry = Arc::new(WorkerRegistry::new(sched.worker_host.clone()));
    let client: Arc<dyn WorkerClient> = Arc::new(HttpWorkerClient::new());
    let prober = HealthProber::new(
        client.clone(),
        sched.health_probe_timeout(),
        sched.readiness_backoff(),
    );
    let supervisor = Arc::new(WorkerSupervisor::new(
        registry,
        fabric,
        Arc::new(ProcessLauncher::new(cfg.worker.command.clone())),
        prober,
        catalog.clone(),
        SupervisorSettings {
            base_worker_port: sched.base_worker_port,
            max_workers: sched.max_workers,
            ready_timeout: sched.health_probe_timeout(),
        },
    ));
    info!(
        base_port = sched.base_worker_port,
        min = sched.min_workers,
        max = sched.max_workers,
        command = ?cfg.worker.command,
        "worker supervisor initialized"
    );

    // ── Scheduling ─────────────────────────────────────────────

    let queue = Arc::new(WorkQueue::new());
    let autoscaler = Arc::new(Autoscaler::new(
        supervisor.clone(),
        queue.clone(),
        AutoscalerSettings {
            min_workers: sched.min_workers,
            max_workers: sched.max_workers,
            idle_timeout: sched.worker_idle_timeout(),
            default_specialization: Specialization::new(
                cfg.worker.default_model.clone(),
                cfg.worker.default_action,
            ),
        },
    ));

    let collaborators = Collaborators {
        persistence: Arc::new(state.clone()),
        authenticator: Arc::new(StoreAuthenticator::new(state)),
        fetcher: Arc::new(HttpImageFetcher::with_defaults()?),
        images: Arc::new(FsImageStore::new(cfg.storage.images_dir())),
        describer: Arc::new(TemplateDescriber::new()),
    };

    Ok(Arc::new(Scheduler::new(
        queue,
        supervisor,
        autoscaler,
        client,
        catalog,
        collaborators,
        SchedulerSettings::from_config(sched),
    )))
}

async fn run(cfg: VisionConfig) -> anyhow::Result<()> {
    info!("VisionGrid daemon starting");
    let scheduler = assemble(&cfg)?;
    let handle = scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    handle.shutdown().await;
    info!("VisionGrid daemon stopped");
    Ok(())
}

//! Scheduler: the explicitly constructed owner of every shared subsystem.
//!
//! The ingress surface (`submit`, `query_status`, `reprocess`,
//! `list_requests`, `delete_request`, `authenticate`, model listing) runs on
//! the caller's task. `start` spawns the Dispatch Loops and the Autoscaler;
//! all three share the queue, tracker and registry through this object.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vision_core::config::SchedulerConfig;
use vision_core::{
    ActionType, Credentials, ImagePayload, ImageRef, ImageSource, ModelCatalog, ModelEntry,
    Request, RequestId, RequestStatus, RequestSummary, Specialization, WorkItem, new_request_id,
};
use visiongrid_autoscale::Autoscaler;
use visiongrid_pool::WorkerSupervisor;
use visiongrid_queue::{QueueError, RequestTracker, WorkQueue};
use visiongrid_rpc::WorkerClient;

use crate::collab::{Authenticator, DescriptionGenerator, ImageFetcher, ImageStore, Persistence};
use crate::dispatch::{DispatchSettings, run_loop};
use crate::error::{AdmissionError, SchedulerError, SchedulerResult};

/// Reason recorded when none of a request's images could be resolved.
pub const NO_IMAGE_RESOLVED: &str = "no image could be resolved";

/// The external collaborators the scheduler core depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub persistence: Arc<dyn Persistence>,
    pub authenticator: Arc<dyn Authenticator>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub images: Arc<dyn ImageStore>,
    pub describer: Arc<dyn DescriptionGenerator>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub dispatch: DispatchSettings,
    /// Number of concurrent Dispatch Loops.
    pub dispatch_loops: u32,
    pub monitor_interval: Duration,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            dispatch: DispatchSettings {
                claim_attempts: cfg.claim_attempts,
                claim_backoff: cfg.claim_backoff(),
                dispatch_timeout: cfg.dispatch_timeout(),
                dispatch_attempts: cfg.dispatch_attempts,
            },
            dispatch_loops: cfg.dispatch_loops.max(1),
            monitor_interval: cfg.monitor_interval(),
        }
    }
}

/// What `query_status` reports for a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub result: Option<Vec<String>>,
    pub failure_reason: Option<String>,
}

impl From<Request> for StatusReport {
    fn from(r: Request) -> Self {
        Self {
            request_id: r.id,
            status: r.status,
            result: r.result,
            failure_reason: r.failure_reason,
        }
    }
}

pub struct Scheduler {
    pub(crate) tracker: RequestTracker,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) supervisor: Arc<WorkerSupervisor>,
    pub(crate) autoscaler: Arc<Autoscaler>,
    pub(crate) client: Arc<dyn WorkerClient>,
    catalog: Arc<ModelCatalog>,
    pub(crate) collab: Collaborators,
    pub(crate) settings: SchedulerSettings,
}

impl Scheduler {
    /// `autoscaler` must watch the same `queue` and `supervisor`.
    pub fn new(
        queue: Arc<WorkQueue>,
        supervisor: Arc<WorkerSupervisor>,
        autoscaler: Arc<Autoscaler>,
        client: Arc<dyn WorkerClient>,
        catalog: Arc<ModelCatalog>,
        collab: Collaborators,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            tracker: RequestTracker::new(),
            queue,
            supervisor,
            autoscaler,
            client,
            catalog,
            collab,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    pub fn autoscaler(&self) -> &Arc<Autoscaler> {
        &self.autoscaler
    }

    // ── Admission ─────────────────────────────────────────────────

    /// Validate and admit a request. Returns its id once it is queued, or
    /// once it has failed because none of its images could be resolved.
    pub async fn submit(
        &self,
        owner_email: &str,
        model_name: &str,
        action_type: &str,
        images: Vec<ImageRef>,
    ) -> SchedulerResult<RequestId> {
        let specialization = validate(owner_email, model_name, action_type, &images)?;
        self.admit(owner_email.trim(), specialization, images).await
    }

    async fn admit(
        &self,
        owner_email: &str,
        specialization: Specialization,
        images: Vec<ImageRef>,
    ) -> SchedulerResult<RequestId> {
        if self.queue.is_closed().await {
            return Err(SchedulerError::ShuttingDown);
        }

        let request_id = new_request_id();
        let image_ids = images.iter().map(|i| i.image_id.clone()).collect();
        let request = Request::pending(
            request_id.clone(),
            owner_email,
            specialization.clone(),
            image_ids,
        );
        self.tracker.insert(request.clone()).await?;
        if let Err(e) = self.collab.persistence.save_request(&request).await {
            warn!(%request_id, error = %e, "request persistence failed");
        }
        debug!(%request_id, %specialization, images = images.len(), "request admitted");

        let payloads = self.resolve_images(&request_id, images).await;
        if payloads.is_empty() {
            self.finalize_failed(&request_id, NO_IMAGE_RESOLVED).await;
            return Ok(request_id);
        }

        self.tracker.mark_queued(&request_id).await?;
        // Persisted before the push so a dispatch loop's Processing write
        // can never be overwritten.
        self.persist_status(&request_id, RequestStatus::Queued, None)
            .await;
        let item = WorkItem {
            request_id: request_id.clone(),
            payloads,
            specialization,
            owner_email: owner_email.to_string(),
        };
        match self.queue.push(item).await {
            Ok(()) => {}
            Err(QueueError::Closed) => {
                self.finalize_failed(&request_id, "scheduler shutting down")
                    .await;
                return Err(SchedulerError::ShuttingDown);
            }
            Err(e) => return Err(e.into()),
        }
        info!(%request_id, owner = %owner_email, "request queued");
        Ok(request_id)
    }

    /// Fetch remote images and keep a local copy of every payload. Images
    /// that cannot be fetched are dropped with a warning.
    async fn resolve_images(&self, request_id: &str, images: Vec<ImageRef>) -> Vec<ImagePayload> {
        let mut payloads = Vec::with_capacity(images.len());
        for ImageRef { image_id, source } in images {
            let bytes = match source {
                ImageSource::Local(bytes) => bytes,
                ImageSource::Remote(url) => match self.collab.fetcher.fetch(&url).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(%request_id, %image_id, %url, error = %e, "image fetch failed");
                        continue;
                    }
                },
            };
            if let Err(e) = self.collab.images.store(request_id, &image_id, &bytes).await {
                warn!(%request_id, %image_id, error = %e, "image copy not stored");
            }
            payloads.push(ImagePayload { image_id, bytes });
        }
        payloads
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Live status, falling back to persistence for requests no longer in
    /// memory.
    pub async fn query_status(&self, request_id: &str) -> SchedulerResult<StatusReport> {
        Ok(self.find_request(request_id).await?.into())
    }

    async fn find_request(&self, request_id: &str) -> SchedulerResult<Request> {
        if let Ok(request) = self.tracker.get(request_id).await {
            return Ok(request);
        }
        self.collab
            .persistence
            .get_request(request_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(request_id.to_string()))
    }

    /// Requests owned by `owner_email`, newest first. In-memory status wins
    /// over the stored one.
    pub async fn list_requests(&self, owner_email: &str) -> SchedulerResult<Vec<RequestSummary>> {
        let mut by_id: HashMap<RequestId, RequestSummary> = self
            .collab
            .persistence
            .list_requests(owner_email)
            .await?
            .into_iter()
            .map(|s| (s.request_id.clone(), s))
            .collect();
        for live in self.tracker.list_for(owner_email).await {
            by_id.insert(live.request_id.clone(), live);
        }

        let mut out: Vec<RequestSummary> = by_id.into_values().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.request_id.cmp(&b.request_id)));
        Ok(out)
    }

    // ── Reprocess / delete ────────────────────────────────────────

    /// Re-admit a request's stored images under a new request id. The
    /// original request is left untouched.
    pub async fn reprocess(&self, request_id: &str) -> SchedulerResult<RequestId> {
        let original = self.find_request(request_id).await?;

        let mut images = Vec::with_capacity(original.image_ids.len());
        for image_id in &original.image_ids {
            match self.collab.images.load(request_id, image_id).await {
                Ok(Some(bytes)) => images.push(ImageRef::local(image_id.clone(), bytes)),
                Ok(None) => warn!(%request_id, %image_id, "stored image missing"),
                Err(e) => warn!(%request_id, %image_id, error = %e, "stored image unreadable"),
            }
        }
        if images.is_empty() {
            return Err(SchedulerError::ImagesUnavailable(request_id.to_string()));
        }

        let new_id = self
            .admit(&original.owner_email, original.specialization, images)
            .await?;
        info!(original = %request_id, %new_id, "request reprocessed");
        Ok(new_id)
    }

    /// Delete a request owned by `owner_email`, with its result and stored
    /// images. Returns false if it does not exist or belongs to someone else.
    pub async fn delete_request(&self, request_id: &str, owner_email: &str) -> SchedulerResult<bool> {
        let request = match self.find_request(request_id).await {
            Ok(request) => request,
            Err(SchedulerError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let owner_email = owner_email.trim();
        if request.owner_email != owner_email {
            warn!(%request_id, requested_by = %owner_email, "delete refused: not the owner");
            return Ok(false);
        }

        self.tracker.remove(request_id).await;
        self.collab.persistence.delete_request(request_id).await?;
        if let Err(e) = self.collab.images.remove(request_id, &request.image_ids).await {
            warn!(%request_id, error = %e, "stored images not removed");
        }
        info!(%request_id, "request deleted");
        Ok(true)
    }

    // ── Auth / models ─────────────────────────────────────────────

    pub async fn authenticate(&self, credentials: &Credentials) -> SchedulerResult<()> {
        if self.collab.authenticator.authenticate(credentials).await? {
            Ok(())
        } else {
            Err(SchedulerError::Unauthorized)
        }
    }

    pub fn list_models(&self) -> Vec<ModelEntry> {
        self.catalog.list().to_vec()
    }

    pub fn model_details(&self, name: &str) -> SchedulerResult<ModelEntry> {
        Ok(self.catalog.get(name)?.clone())
    }

    // ── Loops ─────────────────────────────────────────────────────

    /// Spawn the Dispatch Loops and the Autoscaler.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let autoscaler = tokio::spawn(
            self.autoscaler
                .clone()
                .run(self.settings.monitor_interval, shutdown_rx),
        );
        let dispatchers = (0..self.settings.dispatch_loops)
            .map(|loop_id| tokio::spawn(run_loop(Arc::clone(self), loop_id)))
            .collect();

        info!(
            dispatch_loops = self.settings.dispatch_loops,
            monitor_interval_secs = self.settings.monitor_interval.as_secs(),
            "scheduler started"
        );
        SchedulerHandle {
            scheduler: Arc::clone(self),
            shutdown_tx,
            autoscaler,
            dispatchers,
        }
    }
}

/// Running loops of a started scheduler.
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    shutdown_tx: watch::Sender<bool>,
    autoscaler: JoinHandle<()>,
    dispatchers: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop admitting, drain the queue, stop the loops, then stop every
    /// worker.
    pub async fn shutdown(self) {
        info!("scheduler shutting down");
        self.scheduler.queue.close().await;
        for handle in self.dispatchers {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch loop ended abnormally");
            }
        }

        // Err only when the autoscaler task already exited.
        if self.shutdown_tx.send(true).is_err() {
            debug!("autoscaler already stopped");
        }
        if let Err(e) = self.autoscaler.await {
            warn!(error = %e, "autoscaler ended abnormally");
        }

        self.scheduler.supervisor.stop_all().await;
        info!("scheduler stopped");
    }
}

fn validate(
    owner_email: &str,
    model_name: &str,
    action_type: &str,
    images: &[ImageRef],
) -> Result<Specialization, AdmissionError> {
    if images.is_empty() {
        return Err(AdmissionError::NoImages);
    }
    if model_name.trim().is_empty() {
        return Err(AdmissionError::EmptyModel);
    }
    if owner_email.trim().is_empty() {
        return Err(AdmissionError::EmptyOwner);
    }
    let action: ActionType = action_type.parse()?;
    if let Some(empty) = images
        .iter()
        .find(|i| matches!(&i.source, ImageSource::Local(b) if b.is_empty()))
    {
        return Err(AdmissionError::EmptyPayload(empty.image_id.clone()));
    }
    let mut seen = HashSet::with_capacity(images.len());
    if let Some(dup) = images.iter().find(|i| !seen.insert(i.image_id.as_str())) {
        return Err(AdmissionError::DuplicateImageId(dup.image_id.clone()));
    }
    Ok(Specialization::new(model_name.trim(), action))
}

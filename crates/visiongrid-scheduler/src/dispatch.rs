//! Dispatch / aggregation.
//!
//! Per work item:
//!
//! ```text
//! Queued ─▶ Processing ─▶ ensure capacity ─▶ fan out payloads ─▶ aggregate
//!        ─▶ describe ─▶ persist ─▶ Completed | Failed ─▶ task_done
//! ```
//!
//! Each payload claims a worker of the item's specialization, retrying the
//! claim briefly when the pool is empty. A failed RPC marks the worker
//! unresponsive (out of the pool until the monitor restores or restarts it).
//! A malformed result puts the worker back in the pool. Either way the
//! payload is retried once, on a worker it has not tried yet. A request
//! completes if at least one payload succeeded.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vision_core::{ImagePayload, RequestStatus, Specialization, WorkItem};
use visiongrid_pool::WorkerRegistry;
use visiongrid_rpc::WorkerClient;

use crate::scheduler::Scheduler;

/// Reason recorded when no payload of a request could be processed.
pub const NO_PAYLOAD_PROCESSED: &str = "no image payload could be processed";

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Claim attempts per payload before giving up on an empty pool.
    pub claim_attempts: u32,
    pub claim_backoff: Duration,
    /// Timeout of a single `process_chunk` RPC.
    pub dispatch_timeout: Duration,
    /// Workers tried per payload.
    pub dispatch_attempts: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            claim_attempts: 50,
            claim_backoff: Duration::from_millis(200),
            dispatch_timeout: Duration::from_secs(30),
            dispatch_attempts: 2,
        }
    }
}

/// Ships single payloads to workers. Cheap to clone into per-payload tasks.
#[derive(Clone)]
pub(crate) struct PayloadDispatcher {
    pub(crate) registry: Arc<WorkerRegistry>,
    pub(crate) client: Arc<dyn WorkerClient>,
    pub(crate) settings: DispatchSettings,
}

impl PayloadDispatcher {
    /// Process one payload, returning its detections or the last failure.
    pub(crate) async fn dispatch(
        self,
        request_id: String,
        payload: ImagePayload,
        specialization: Specialization,
    ) -> Result<Vec<Value>, String> {
        let mut last_error = String::from("no worker available");
        // Each retry goes to a worker this payload has not tried yet.
        let mut tried: Vec<String> = Vec::new();

        for attempt in 1..=self.settings.dispatch_attempts.max(1) {
            let Some(worker) = self.claim(&specialization, &tried).await else {
                warn!(%request_id, image_id = %payload.image_id, %specialization, "no worker could be claimed");
                return Err(last_error);
            };
            debug!(%request_id, image_id = %payload.image_id, address = %worker.address, attempt, "payload claimed worker");

            let call = self
                .client
                .process_chunk(
                    &worker.address,
                    payload.bytes.clone(),
                    specialization.action_type,
                    self.settings.dispatch_timeout,
                )
                .await;
            tried.push(worker.address.clone());

            match call {
                Ok(response) => match parse_detections(&response.result) {
                    Ok(detections) => {
                        self.registry.release_worker(&worker.address).await;
                        debug!(
                            %request_id,
                            image_id = %payload.image_id,
                            worker_id = %response.worker_id,
                            detections = detections.len(),
                            "payload processed"
                        );
                        return Ok(detections);
                    }
                    Err(e) => {
                        // The worker answered, so it goes back to the pool.
                        self.registry.release_worker(&worker.address).await;
                        warn!(%request_id, image_id = %payload.image_id, address = %worker.address, error = %e, "malformed worker result");
                        last_error = format!("malformed result from {}: {e}", worker.address);
                    }
                },
                Err(e) => {
                    warn!(%request_id, image_id = %payload.image_id, address = %worker.address, attempt, error = %e, "dispatch failed");
                    self.registry.mark_unresponsive(&worker.address).await;
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }

    async fn claim(
        &self,
        specialization: &Specialization,
        exclude: &[String],
    ) -> Option<visiongrid_pool::WorkerRecord> {
        for attempt in 0..self.settings.claim_attempts.max(1) {
            if let Some(worker) = self
                .registry
                .claim_worker_excluding(specialization, exclude)
                .await
            {
                return Some(worker);
            }
            if attempt + 1 < self.settings.claim_attempts {
                tokio::time::sleep(self.settings.claim_backoff).await;
            }
        }
        None
    }
}

/// A worker result is a JSON array of detection objects; a lone object is
/// accepted as a single detection.
pub fn parse_detections(result: &str) -> Result<Vec<Value>, serde_json::Error> {
    match serde_json::from_str(result)? {
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

impl Scheduler {
    /// Pop one work item, process it to a terminal state, and mark it done.
    /// Returns `None` once the queue is closed and drained.
    pub async fn dispatch_next(&self) -> Option<String> {
        let item = self.queue.pop().await?;
        let request_id = item.request_id.clone();
        self.process_item(item).await;
        self.queue.task_done(&request_id).await;
        Some(request_id)
    }

    async fn process_item(&self, item: WorkItem) {
        let WorkItem {
            request_id,
            payloads,
            specialization,
            owner_email,
        } = item;

        if let Err(e) = self.tracker.mark_processing(&request_id).await {
            // Deleted while queued.
            debug!(%request_id, error = %e, "skipping work item");
            return;
        }
        self.persist_status(&request_id, RequestStatus::Processing, None)
            .await;
        info!(%request_id, %specialization, payloads = payloads.len(), "processing request");

        self.autoscaler.ensure_capacity(&specialization).await;

        let dispatcher = PayloadDispatcher {
            registry: self.supervisor.registry().clone(),
            client: self.client.clone(),
            settings: self.settings.dispatch.clone(),
        };
        let mut tasks = JoinSet::new();
        for (index, payload) in payloads.into_iter().enumerate() {
            let fut = dispatcher.clone().dispatch(
                request_id.clone(),
                payload,
                specialization.clone(),
            );
            tasks.spawn(async move { (index, fut.await) });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(%request_id, error = %e, "payload task panicked"),
            }
        }
        // Aggregate in submission order regardless of completion order.
        outcomes.sort_by_key(|(index, _)| *index);

        let total = outcomes.len();
        let mut succeeded = 0;
        let mut detections = Vec::new();
        for (_, outcome) in outcomes {
            if let Ok(found) = outcome {
                succeeded += 1;
                detections.extend(found);
            }
        }

        if succeeded == 0 {
            self.finalize_failed(&request_id, NO_PAYLOAD_PROCESSED).await;
            return;
        }

        let descriptions = self.collab.describer.describe(&detections).await;
        match self.tracker.complete(&request_id, descriptions.clone()).await {
            Ok(_) => {
                if let Err(e) = self
                    .collab
                    .persistence
                    .save_result(&request_id, &owner_email, &descriptions)
                    .await
                {
                    warn!(%request_id, error = %e, "result persistence failed");
                }
                self.persist_status(&request_id, RequestStatus::Completed, None)
                    .await;
                info!(%request_id, succeeded, total, descriptions = descriptions.len(), "request completed");
            }
            Err(e) => debug!(%request_id, error = %e, "request vanished before completion"),
        }
    }

    pub(crate) async fn finalize_failed(&self, request_id: &str, reason: &str) {
        match self.tracker.fail(request_id, reason).await {
            Ok(_) => {
                self.persist_status(request_id, RequestStatus::Failed, Some(reason.to_string()))
                    .await;
                warn!(%request_id, %reason, "request failed");
            }
            Err(e) => debug!(%request_id, error = %e, "request vanished before failing"),
        }
    }

    pub(crate) async fn persist_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        reason: Option<String>,
    ) {
        if let Err(e) = self
            .collab
            .persistence
            .update_status(request_id, status, reason)
            .await
        {
            warn!(%request_id, %status, error = %e, "status persistence failed");
        }
    }
}

/// Drive `dispatch_next` until the queue closes.
pub(crate) async fn run_loop(scheduler: Arc<Scheduler>, loop_id: u32) {
    info!(loop_id, "dispatch loop started");
    while scheduler.dispatch_next().await.is_some() {}
    info!(loop_id, "dispatch loop stopped");
}

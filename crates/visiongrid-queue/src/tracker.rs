//! In-memory request state.
//!
//! The tracker is the canonical live view of every request this process has
//! admitted. It is not durable storage: the persistence collaborator is.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;
use vision_core::{Request, RequestId, RequestStatus, RequestSummary};

use crate::error::{QueueError, QueueResult};

#[derive(Default)]
pub struct RequestTracker {
    requests: Mutex<HashMap<RequestId, Request>>,
}

fn allowed(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;
    matches!(
        (from, to),
        (Pending, Queued)
            | (Pending, Failed)
            | (Queued, Processing)
            | (Queued, Failed)
            | (Processing, Completed)
            | (Processing, Failed)
    )
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new request. It must be `Pending`.
    pub async fn insert(&self, request: Request) -> QueueResult<()> {
        let mut requests = self.requests.lock().await;
        if requests.contains_key(&request.id) {
            return Err(QueueError::Duplicate(request.id));
        }
        requests.insert(request.id.clone(), request);
        Ok(())
    }

    /// Move a request forward to `status`. `result` is recorded only on
    /// `Completed`, `reason` only on `Failed`.
    pub async fn set_status(
        &self,
        id: &str,
        status: RequestStatus,
        result: Option<Vec<String>>,
        reason: Option<String>,
    ) -> QueueResult<Request> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if !allowed(request.status, status) {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: request.status,
                to: status,
            });
        }

        request.status = status;
        match status {
            RequestStatus::Completed => request.result = Some(result.unwrap_or_default()),
            RequestStatus::Failed => request.failure_reason = reason,
            _ => {}
        }
        debug!(request_id = %id, %status, "request status updated");
        Ok(request.clone())
    }

    pub async fn mark_queued(&self, id: &str) -> QueueResult<Request> {
        self.set_status(id, RequestStatus::Queued, None, None).await
    }

    pub async fn mark_processing(&self, id: &str) -> QueueResult<Request> {
        self.set_status(id, RequestStatus::Processing, None, None)
            .await
    }

    pub async fn complete(&self, id: &str, result: Vec<String>) -> QueueResult<Request> {
        self.set_status(id, RequestStatus::Completed, Some(result), None)
            .await
    }

    pub async fn fail(&self, id: &str, reason: impl Into<String>) -> QueueResult<Request> {
        self.set_status(id, RequestStatus::Failed, None, Some(reason.into()))
            .await
    }

    pub async fn get(&self, id: &str) -> QueueResult<Request> {
        self.requests
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    pub async fn remove(&self, id: &str) -> Option<Request> {
        self.requests.lock().await.remove(id)
    }

    /// Requests owned by `owner_email`, newest first.
    pub async fn list_for(&self, owner_email: &str) -> Vec<RequestSummary> {
        let requests = self.requests.lock().await;
        let mut out: Vec<RequestSummary> = requests
            .values()
            .filter(|r| r.owner_email == owner_email)
            .map(|r| RequestSummary {
                request_id: r.id.clone(),
                status: r.status,
                created_at: r.created_at,
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.request_id.cmp(&b.request_id)));
        out
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.requests.lock().await.is_empty()
    }
}

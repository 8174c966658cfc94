//! Domain types shared by every VisionGrid crate.
//!
//! These types describe admitted image-analysis requests, the work items the
//! dispatch loop consumes, and the (model, action) specialization a worker
//! process is launched for.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opaque request identifier, minted at admission.
pub type RequestId = String;

/// Worker identifier (`worker-{port}`).
pub type WorkerId = String;

/// Virtual machine identifier (`vm-{n}`).
pub type VmId = String;

/// Mint a fresh request identifier.
pub fn new_request_id() -> RequestId {
    uuid::Uuid::new_v4().to_string()
}

/// Build the worker identifier for a port.
pub fn worker_id_for_port(port: u16) -> WorkerId {
    format!("worker-{port}")
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Action / specialization ───────────────────────────────────────

/// The closed set of analysis actions a worker can be started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Detect,
    Classify,
    Categorize,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Detect => "detect",
            ActionType::Classify => "classify",
            ActionType::Categorize => "categorize",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an action string is not one of the known actions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action type: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for ActionType {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detect" => Ok(ActionType::Detect),
            "classify" => Ok(ActionType::Classify),
            "categorize" => Ok(ActionType::Categorize),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// The (model, action) pair a worker process serves. Workers are not generic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Specialization {
    pub model_name: String,
    pub action_type: ActionType,
}

impl Specialization {
    pub fn new(model_name: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            model_name: model_name.into(),
            action_type,
        }
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_name, self.action_type)
    }
}

// ── Images ────────────────────────────────────────────────────────

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Bytes uploaded with the request.
    Local(Bytes),
    /// A remote URL fetched by the image fetcher collaborator.
    Remote(String),
}

/// An image reference as submitted by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    /// Stable identifier within the request.
    pub image_id: String,
    pub source: ImageSource,
}

impl ImageRef {
    pub fn local(image_id: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            image_id: image_id.into(),
            source: ImageSource::Local(bytes.into()),
        }
    }

    pub fn remote(image_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            source: ImageSource::Remote(url.into()),
        }
    }
}

/// Image bytes resolved at admission, ready to be shipped to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub image_id: String,
    pub bytes: Bytes,
}

// ── Requests ──────────────────────────────────────────────────────

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Completed and Failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Queued => "queued",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory view of an admitted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub status: RequestStatus,
    pub owner_email: String,
    pub specialization: Specialization,
    /// Image identifiers, in submission order.
    pub image_ids: Vec<String>,
    /// Description strings; set only on Completed.
    pub result: Option<Vec<String>>,
    /// Human-readable reason; set only on Failed.
    pub failure_reason: Option<String>,
    /// Unix timestamp (seconds) of admission.
    pub created_at: u64,
}

impl Request {
    /// Create a new request in the `Pending` state.
    pub fn pending(
        id: RequestId,
        owner_email: impl Into<String>,
        specialization: Specialization,
        image_ids: Vec<String>,
    ) -> Self {
        Self {
            id,
            status: RequestStatus::Pending,
            owner_email: owner_email.into(),
            specialization,
            image_ids,
            result: None,
            failure_reason: None,
            created_at: epoch_secs(),
        }
    }
}

/// One admitted request's payload bundle as placed on the dispatch queue.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub request_id: RequestId,
    pub payloads: Vec<ImagePayload>,
    pub specialization: Specialization,
    pub owner_email: String,
}

/// Short listing entry for a request owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub created_at: u64,
}

/// User credentials presented by the ingress collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub email: String,
    pub password: String,
}

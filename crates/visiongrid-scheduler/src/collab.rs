//! Collaborator seams.
//!
//! The scheduler core talks to storage, authentication, image retrieval and
//! description generation only through these traits. Default adapters live
//! in sibling modules; tests substitute in-process fakes.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use vision_core::{Credentials, Request, RequestStatus, RequestSummary};

/// Durable storage of requests and results.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_request(&self, request: &Request) -> anyhow::Result<()>;

    async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        failure_reason: Option<String>,
    ) -> anyhow::Result<()>;

    async fn save_result(
        &self,
        request_id: &str,
        owner_email: &str,
        descriptions: &[String],
    ) -> anyhow::Result<()>;

    async fn get_result(&self, request_id: &str) -> anyhow::Result<Option<Vec<String>>>;

    /// The stored request, with its result attached when one exists.
    async fn get_request(&self, request_id: &str) -> anyhow::Result<Option<Request>>;

    /// Remove a request and its result. Returns whether it existed.
    async fn delete_request(&self, request_id: &str) -> anyhow::Result<bool>;

    /// Requests owned by `owner_email`, newest first.
    async fn list_requests(&self, owner_email: &str) -> anyhow::Result<Vec<RequestSummary>>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> anyhow::Result<bool>;
}

/// Remote image retrieval. Implementations own their retry policy.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<Bytes>;
}

/// Local copies of admitted images, keyed by request and image id.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, request_id: &str, image_id: &str, bytes: &Bytes) -> anyhow::Result<()>;

    async fn load(&self, request_id: &str, image_id: &str) -> anyhow::Result<Option<Bytes>>;

    async fn remove(&self, request_id: &str, image_ids: &[String]) -> anyhow::Result<()>;
}

/// Turns aggregated worker detections into human-readable sentences.
#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    async fn describe(&self, detections: &[Value]) -> Vec<String>;
}

//! visiongrid-scheduler — request admission, dispatch, and aggregation.
//!
//! [`Scheduler`] owns the request tracker and shares the work queue, worker
//! supervisor and autoscaler with the loops it starts. External concerns
//! (storage, auth, image retrieval, description generation) are reached
//! through the traits in [`collab`].
//!
//! # Architecture
//!
//! ```text
//! ingress ─▶ Scheduler::submit ─▶ RequestTracker (Pending ─▶ Queued)
//!                                  └─▶ WorkQueue
//! Dispatch Loop ×N ─▶ WorkQueue::pop ─▶ Autoscaler::ensure_capacity
//!                  ─▶ WorkerRegistry::claim_worker ─▶ WorkerClient::process_chunk
//!                  ─▶ DescriptionGenerator ─▶ Persistence ─▶ Completed | Failed
//! Autoscaler ─────▶ tick every monitor_interval (scale, restart, evict)
//! ```

pub mod collab;
pub mod describe;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod images;
pub mod persistence;
pub mod scheduler;

pub use collab::{Authenticator, DescriptionGenerator, ImageFetcher, ImageStore, Persistence};
pub use describe::TemplateDescriber;
pub use dispatch::{DispatchSettings, NO_PAYLOAD_PROCESSED, parse_detections};
pub use error::{AdmissionError, SchedulerError, SchedulerResult};
pub use fetch::{FetchError, HttpImageFetcher};
pub use images::FsImageStore;
pub use persistence::StoreAuthenticator;
pub use scheduler::{
    Collaborators, NO_IMAGE_RESOLVED, Scheduler, SchedulerHandle, SchedulerSettings, StatusReport,
};

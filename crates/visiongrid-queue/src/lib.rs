//! visiongrid-queue — admitted work and the canonical in-memory request state.
//!
//! [`WorkQueue`] is a FIFO of [`WorkItem`](vision_core::WorkItem)s: `pop`
//! suspends the caller while the queue is empty and wakes on `push`; items
//! are never dropped. [`RequestTracker`] holds each request's status behind a
//! single lock and enforces the forward-only lifecycle
//!
//! ```text
//! Pending ─▶ Queued ─▶ Processing ─▶ Completed
//!    │                      │
//!    └──────────────────────┴──────▶ Failed
//! ```

pub mod error;
pub mod queue;
pub mod tracker;

pub use error::{QueueError, QueueResult};
pub use queue::WorkQueue;
pub use tracker::RequestTracker;

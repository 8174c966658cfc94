//! visiongrid-rpc — the scheduler's view of a worker process.
//!
//! Workers expose two endpoints over HTTP/1.1:
//!
//! ```text
//! GET  /health                         -> {"status": "ok"}
//! POST /process  (x-action-type: ...)  -> {"result": "<json>", "worker_id": "..."}
//! ```
//!
//! Every call carries an explicit timeout. Expiry is reported as
//! [`RpcError::Timeout`] and is treated by callers as a dispatch failure,
//! not as proof that the worker crashed.

pub mod client;
pub mod error;
pub mod messages;

pub use client::{HttpWorkerClient, WorkerClient};
pub use error::{RpcError, RpcResult};
pub use messages::{ChunkResponse, HealthResponse};

//! visiongrid-autoscale — sizes the worker pool to load and reaps bad workers.
//!
//! # Scaling Algorithm
//!
//! ```text
//! outstanding = queued + in-flight work items
//! target      = clamp(outstanding, min_workers, max_workers)
//! live        = Starting + Ready + Unresponsive workers
//!
//! if live < target:
//!     start (target - live) workers for the head-of-queue specialization
//! if live > target:
//!     stop up to (live - target) idle workers, oldest-registered first
//! ```
//!
//! # Fault Eviction
//!
//! Every tick probes each registered worker once:
//!
//! - probe fails (or the process exited): remove and restart at the same port
//!   with the same specialization
//! - `Unresponsive` but the probe passes: return it to the pool
//! - idle longer than `idle_timeout` while above `min_workers`: stop it
//!
//! Only unclaimed workers are ever scaled down or evicted for idleness.

pub mod scaler;

pub use scaler::{Autoscaler, AutoscalerSettings, MIN_MONITOR_INTERVAL, ScaleDecision, TickReport};

//! visiongrid-health — readiness and liveness probing for worker processes.
//!
//! # Readiness vs. liveness
//!
//! ```text
//! wait_until_ready(address, timeout)   probe, sleep(backoff), probe, ... until deadline
//! is_healthy(address)                  exactly one probe
//! ```
//!
//! Readiness is awaited once, by whoever started the worker. Liveness is the
//! monitor loop's single-shot check: one failed probe is enough to restart the
//! worker, so there is no retry loop on that path.

pub mod prober;

pub use prober::{HealthProber, ProbeResult};

//! Wire messages exchanged with worker processes.

use serde::{Deserialize, Serialize};

/// Path of the worker health endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Path of the worker processing endpoint.
pub const PROCESS_PATH: &str = "/process";

/// Header carrying the action tag on a processing call.
pub const ACTION_HEADER: &str = "x-action-type";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok") || self.status.eq_ignore_ascii_case("healthy")
    }
}

/// Response to a processing call. `result` is a UTF-8 JSON document,
/// normally an array of detection objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub result: String,
    pub worker_id: String,
}

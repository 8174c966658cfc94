//! Persisted record types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vision_core::{Request, RequestId, RequestStatus, Specialization, epoch_secs};

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub owner_email: String,
    pub specialization: Specialization,
    pub image_ids: Vec<String>,
    pub status: RequestStatus,
    pub created_at: u64,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl RequestRecord {
    pub fn table_key(&self) -> &str {
        &self.id
    }
}

impl From<&Request> for RequestRecord {
    fn from(r: &Request) -> Self {
        Self {
            id: r.id.clone(),
            owner_email: r.owner_email.clone(),
            specialization: r.specialization.clone(),
            image_ids: r.image_ids.clone(),
            status: r.status,
            created_at: r.created_at,
            failure_reason: r.failure_reason.clone(),
        }
    }
}

// ── Results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub request_id: RequestId,
    pub owner_email: String,
    /// Description strings produced for the aggregated detections.
    pub descriptions: Vec<String>,
    pub processed_at: u64,
}

impl ResultRecord {
    pub fn new(request_id: RequestId, owner_email: String, descriptions: Vec<String>) -> Self {
        Self {
            request_id,
            owner_email,
            descriptions,
            processed_at: epoch_secs(),
        }
    }
}

// ── Users ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    /// Hex-encoded SHA-256 of the password.
    pub password_hash: String,
    pub created_at: u64,
}

impl UserRecord {
    pub fn new(username: &str, email: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password),
            created_at: epoch_secs(),
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password_hash == hash_password(password)
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

//! Remote image retrieval over HTTP(S).
//!
//! Transient failures (connect errors, timeouts, 429 and 5xx) are retried
//! with exponential backoff. A response whose content type is not `image/*`
//! is rejected without retrying.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{debug, warn};

use crate::collab::ImageFetcher;

/// Attempts per image, including the first.
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_millis(300);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("cannot reach {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("{url} is not an image (content-type: {content_type})")]
    NotAnImage { url: String, content_type: String },

    #[error("fetching {url} timed out")]
    Timeout { url: String },

    #[error("http client setup failed: {0}")]
    Client(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Connect { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    fn from_reqwest(url: &Url, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    attempts: u32,
    backoff: Duration,
}

impl HttpImageFetcher {
    /// `timeout` bounds each attempt, body included.
    pub fn new(attempts: u32, backoff: Duration, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("visiongrid-fetch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            attempts: attempts.max(1),
            backoff,
        })
    }

    /// Three attempts, 300 ms base backoff, 10 s per attempt.
    pub fn with_defaults() -> Result<Self, FetchError> {
        Self::new(
            DEFAULT_FETCH_ATTEMPTS,
            DEFAULT_FETCH_BACKOFF,
            DEFAULT_FETCH_TIMEOUT,
        )
    }

    async fn fetch_once(&self, url: &Url) -> Result<Bytes, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            return Err(FetchError::NotAnImage {
                url: url.to_string(),
                content_type,
            });
        }

        resp.bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }

    /// Delay before retry number `attempt` (1-based): `backoff * 2^(attempt-1)`.
    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Accept absolute `http://` and `https://` URLs with a host.
fn parse_url(url: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(parsed)
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Bytes> {
        let parsed = parse_url(url)?;

        let mut attempt = 1;
        loop {
            match self.fetch_once(&parsed).await {
                Ok(bytes) => {
                    debug!(%url, bytes = bytes.len(), attempt, "image fetched");
                    return Ok(bytes);
                }
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(%url, attempt, error = %e, ?delay, "image fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

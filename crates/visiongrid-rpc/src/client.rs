//! Worker RPC client.
//!
//! [`WorkerClient`] is the seam the scheduler talks to workers through.
//! [`HttpWorkerClient`] opens one HTTP/1.1 connection per call and bounds the
//! whole exchange (connect, send, read body) with the caller's timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::debug;
use vision_core::ActionType;

use crate::error::{RpcError, RpcResult};
use crate::messages::{ACTION_HEADER, ChunkResponse, HEALTH_PATH, HealthResponse, PROCESS_PATH};

#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Single-shot health check against `address` (`host:port`).
    async fn health_check(&self, address: &str, timeout: Duration) -> RpcResult<HealthResponse>;

    /// Ship one payload to a worker for processing.
    async fn process_chunk(
        &self,
        address: &str,
        payload: Bytes,
        action: ActionType,
        timeout: Duration,
    ) -> RpcResult<ChunkResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpWorkerClient;

impl HttpWorkerClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn health_check(&self, address: &str, timeout: Duration) -> RpcResult<HealthResponse> {
        let req = http::Request::builder()
            .method("GET")
            .uri(HEALTH_PATH)
            .header("host", address)
            .header("user-agent", "visiongrid-rpc/0.1")
            .body(Full::new(Bytes::new()))
            .map_err(|e| RpcError::Http(e.to_string()))?;

        let body = call(address, req, timeout).await?;
        decode(address, &body)
    }

    async fn process_chunk(
        &self,
        address: &str,
        payload: Bytes,
        action: ActionType,
        timeout: Duration,
    ) -> RpcResult<ChunkResponse> {
        let len = payload.len();
        let req = http::Request::builder()
            .method("POST")
            .uri(PROCESS_PATH)
            .header("host", address)
            .header("user-agent", "visiongrid-rpc/0.1")
            .header("content-type", "application/octet-stream")
            .header(ACTION_HEADER, action.as_str())
            .body(Full::new(payload))
            .map_err(|e| RpcError::Http(e.to_string()))?;

        debug!(%address, %action, bytes = len, "dispatching chunk");
        let body = call(address, req, timeout).await?;
        decode(address, &body)
    }
}

/// Perform one request over a fresh connection, returning the body of a 2xx.
async fn call(
    address: &str,
    req: http::Request<Full<Bytes>>,
    timeout: Duration,
) -> RpcResult<Bytes> {
    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| RpcError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RpcError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Status {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?
            .to_bytes();
        Ok(body)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout {
            address: address.to_string(),
            timeout,
        }),
    }
}

fn decode<T: serde::de::DeserializeOwned>(address: &str, body: &[u8]) -> RpcResult<T> {
    serde_json::from_slice(body).map_err(|e| RpcError::Decode {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

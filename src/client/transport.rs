//! HTTP transport seam for the query client.
//!
//! `InferenceTransport` abstracts the single POST a query performs so the
//! retry logic can be exercised against scripted replies without a
//! network. `HttpTransport` is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{QueryError, Result};

/// Wire-level reply: a decoded HTTP status plus the raw body text.
#[derive(Debug, Clone)]
pub struct WireReply {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl WireReply {
    /// `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One-method transport: POST a JSON body with a bearer credential.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Issue the request and return whatever status the service answered
    /// with. `Err` is reserved for transport-level faults (DNS, connect,
    /// TLS, timeout) that never produced an HTTP status.
    async fn post_json(&self, url: &str, credential: &str, body: &Value) -> Result<WireReply>;
}

/// Production transport over reqwest with rustls.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport with the given per-attempt timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl InferenceTransport for HttpTransport {
    async fn post_json(&self, url: &str, credential: &str, body: &Value) -> Result<WireReply> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", credential))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Transport(format!("reading response body: {e}")))?;

        Ok(WireReply { status, body })
    }
}

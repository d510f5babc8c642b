//! HTTP transport for the gateway protocol.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::McpError;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
pub const ACCEPT_VALUE: &str = "application/json, text/event-stream";

/// Raw HTTP-level outcome of one POST.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    /// Value of the `Mcp-Session-Id` response header, if present.
    pub session_id: Option<String>,
    pub content_type: Option<String>,
    /// Parsed `Retry-After` header (seconds form only).
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves JSON-RPC messages to the gateway.
///
/// Implementations only report network-level failures as errors; HTTP status
/// handling belongs to the client.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// POSTs one JSON-RPC message, attaching `session_id` when present.
    async fn post(
        &self,
        message: &Value,
        session_id: Option<&str>,
    ) -> Result<TransportResponse, McpError>;

    /// Asks the server to terminate a session. Best effort.
    async fn terminate(&self, _session_id: &str) -> Result<(), McpError> {
        Ok(())
    }
}

/// reqwest-backed transport for a streamable-HTTP gateway endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: url::Url,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, bearer_token: Option<String>) -> Result<Self, McpError> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| McpError::session(format!("Invalid gateway URL '{endpoint}': {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(McpError::session(format!(
                "Gateway URL must use http or https, got: {}",
                endpoint.scheme()
            )));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| McpError::session(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            bearer_token,
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    fn request(&self, method: reqwest::Method, session_id: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, self.endpoint.clone())
            .header(reqwest::header::ACCEPT, ACCEPT_VALUE);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(id) = session_id {
            req = req.header(SESSION_HEADER, id);
        }
        req
    }
}

fn map_reqwest_error(e: reqwest::Error) -> McpError {
    if e.is_timeout() {
        McpError::Timeout(Duration::ZERO)
    } else {
        McpError::transport(e.to_string())
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn post(
        &self,
        message: &Value,
        session_id: Option<&str>,
    ) -> Result<TransportResponse, McpError> {
        let resp = self
            .request(reqwest::Method::POST, session_id)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(message)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        let headers = resp.headers();
        let session_id = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = resp.text().await.map_err(map_reqwest_error)?;

        Ok(TransportResponse {
            status,
            session_id,
            content_type,
            retry_after,
            body,
        })
    }

    async fn terminate(&self, session_id: &str) -> Result<(), McpError> {
        let resp = self
            .request(reqwest::Method::DELETE, Some(session_id))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        tracing::debug!(status = %resp.status(), "Session termination requested");
        Ok(())
    }
}

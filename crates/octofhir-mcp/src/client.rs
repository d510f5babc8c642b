//! Session-aware gateway client.
//!
//! [`McpClient`] owns one [`Session`] and multiplexes tool calls over it.
//! The session id assigned by the server is attached to every request and
//! replaced whenever the server rotates it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};

use crate::config::GatewayConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest, codes};
use crate::retry::RetryPolicy;
use crate::session::{InitializeResult, Session, SessionState};
use crate::sse;
use crate::tools::{ToolInfo, ToolResult};
use crate::transport::{HttpTransport, McpTransport, TransportResponse};

/// Upper bound on `tools/list` cursor pages.
const MAX_LIST_PAGES: usize = 32;

/// Longest server message kept in an error.
const MAX_ERROR_BODY: usize = 512;

/// Anything that can invoke a named tool.
///
/// Implemented by [`McpClient`]; the sync and query layers depend on this
/// trait so they can run against scripted callers in tests.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError>;

    /// A single attempt with no retry of the caller's own.
    ///
    /// [`call_tool_with_retry`](crate::call_tool_with_retry) drives this so
    /// its budget counts every request.
    async fn call_tool_once(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.call_tool(name, arguments).await
    }

    /// Invoked once a retry budget ran out on a transient error.
    async fn retries_exhausted(&self, _error: &McpError) {}
}

/// Runtime options of a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub protocol_version: String,
    pub client_name: String,
    pub client_version: String,
    pub request_timeout: Duration,
    /// Schedule a single retry inside `call_tool` for transient errors.
    /// Never applies under `call_tool_with_retry`.
    pub retry_once: bool,
    /// Backoff used by the single in-call retry.
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::new(""))
    }
}

impl ClientOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            protocol_version: config.protocol_version.clone(),
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
            request_timeout: config.request_timeout(),
            retry_once: config.retry_once,
            retry: config.retry.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsPage {
    #[serde(default)]
    tools: Vec<ToolInfo>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Protocol session client for one gateway.
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    options: ClientOptions,
    session: RwLock<Session>,
    /// Serialises handshakes and keeps the outcome of the last one so
    /// callers that queued behind it can share it.
    init_gate: Mutex<Option<Result<Session, McpError>>>,
    init_generation: AtomicU64,
    next_id: AtomicU64,
    advertised_tools: RwLock<BTreeSet<String>>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>, options: ClientOptions) -> Self {
        Self {
            transport,
            options,
            session: RwLock::new(Session::new()),
            init_gate: Mutex::new(None),
            init_generation: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            advertised_tools: RwLock::new(BTreeSet::new()),
        }
    }

    /// Builds an HTTP client from gateway settings.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, McpError> {
        config.validate().map_err(McpError::session)?;
        let transport = HttpTransport::new(&config.url, config.bearer_token.clone())?;
        Ok(Self::new(
            Arc::new(transport),
            ClientOptions::from_config(config),
        ))
    }

    /// Snapshot of the current session.
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.session.read().await.state
    }

    /// Performs the handshake and returns the resulting session.
    ///
    /// A no-op on an active or degraded session. Concurrent callers share a
    /// single handshake and all observe its outcome.
    pub async fn initialize(&self) -> Result<Session, McpError> {
        if let Some(session) = self.current_if_usable().await {
            return Ok(session);
        }

        let observed = self.init_generation.load(Ordering::Acquire);
        let mut gate = self.init_gate.lock().await;

        if self.init_generation.load(Ordering::Acquire) != observed
            && let Some(outcome) = gate.as_ref()
        {
            tracing::debug!("Joined a handshake that completed while waiting");
            return outcome.clone();
        }
        if let Some(session) = self.current_if_usable().await {
            return Ok(session);
        }

        let outcome = self.handshake().await;
        *gate = Some(outcome.clone());
        self.init_generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn current_if_usable(&self) -> Option<Session> {
        let session = self.session.read().await;
        session.state.accepts_calls().then(|| session.clone())
    }

    async fn handshake(&self) -> Result<Session, McpError> {
        self.session.write().await.begin_initialize();
        tracing::debug!(
            protocol_version = %self.options.protocol_version,
            "Starting gateway handshake"
        );

        let params = json!({
            "protocolVersion": self.options.protocol_version,
            "capabilities": {},
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            },
        });

        let result = match self.send_request("initialize", params).await {
            Ok(value) => serde_json::from_value::<InitializeResult>(value)
                .map_err(|e| McpError::session(format!("Malformed initialize result: {e}"))),
            Err(McpError::Session { message }) => Err(McpError::session(message)),
            Err(e) => Err(McpError::session(format!("Handshake failed: {e}"))),
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.session.write().await.abort_initialize();
                tracing::warn!(error = %e, "Gateway handshake failed");
                return Err(e);
            }
        };

        if result.protocol_version != self.options.protocol_version {
            tracing::info!(
                requested = %self.options.protocol_version,
                negotiated = %result.protocol_version,
                "Gateway negotiated a different protocol version"
            );
        }

        {
            let mut session = self.session.write().await;
            let id = session.id.clone();
            session.activate(id, result);
        }

        if let Err(e) = self.send_notification("notifications/initialized").await {
            tracing::warn!(error = %e, "Failed to deliver initialized notification");
        }

        let session = self.session.read().await.clone();
        tracing::info!(
            session_id = session.id.as_deref().unwrap_or("-"),
            server = session.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
            "Gateway session established"
        );
        Ok(session)
    }

    /// Lists tool names advertised by the gateway.
    pub async fn list_tools(&self) -> Result<BTreeSet<String>, McpError> {
        Ok(self
            .list_tool_infos()
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    /// Lists full tool descriptors, following `nextCursor` pages.
    pub async fn list_tool_infos(&self) -> Result<Vec<ToolInfo>, McpError> {
        self.ensure_callable().await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => Value::Null,
            };
            let value = self.send_request("tools/list", params).await?;
            let page: ListToolsPage = serde_json::from_value(value).map_err(|e| {
                McpError::invalid_response(format!("malformed tools/list result: {e}"))
            })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        *self.advertised_tools.write().await = tools.iter().map(|t| t.name.clone()).collect();
        tracing::debug!(count = tools.len(), "Gateway tools listed");
        Ok(tools)
    }

    /// Ends the session. Calls issued afterwards fail with `NotInitialized`
    /// until `initialize` runs again.
    pub async fn close(&self) {
        let released = self.session.write().await.close();
        self.advertised_tools.write().await.clear();
        if let Some(id) = released {
            if let Err(e) = self.transport.terminate(&id).await {
                tracing::debug!(error = %e, "Session termination request failed");
            }
            tracing::info!(session_id = %id, "Gateway session closed");
        }
    }

    async fn ensure_callable(&self) -> Result<(), McpError> {
        if self.session.read().await.state.accepts_calls() {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    async fn invoke_tool(&self, name: &str, params: &Value) -> Result<ToolResult, McpError> {
        match self.send_request("tools/call", params.clone()).await {
            Ok(value) => {
                self.session.write().await.recover();
                let result: ToolResult = serde_json::from_value(value).map_err(|e| {
                    McpError::invalid_response(format!("malformed tools/call result: {e}"))
                })?;
                if result.is_error {
                    let message = result.text();
                    return Err(self
                        .classify_tool_error(name, codes::TOOL_EXECUTION_ERROR, message)
                        .await);
                }
                Ok(result)
            }
            Err(e) => {
                if e.is_transient() {
                    self.session.write().await.degrade();
                }
                match e {
                    McpError::Protocol { code, message } => {
                        Err(self.classify_tool_error(name, code, message).await)
                    }
                    other => Err(other),
                }
            }
        }
    }

    async fn classify_tool_error(&self, name: &str, code: i64, message: String) -> McpError {
        if is_rate_limit_message(&message) {
            return McpError::RateLimited { retry_after: None };
        }
        if is_unknown_tool_message(&message) {
            let advertised = self.advertised_tools.read().await.contains(name);
            if advertised {
                tracing::error!(tool = name, "Gateway rejected a tool it advertised");
            }
            return McpError::UnknownTool {
                name: name.to_string(),
                message,
                advertised,
            };
        }
        McpError::protocol(code, message)
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = serde_json::to_value(JsonRpcRequest::new(id, method, params))
            .map_err(|e| McpError::invalid_response(format!("failed to encode request: {e}")))?;

        let sent_session = self.session.read().await.id.clone();
        tracing::trace!(id, method, "Sending JSON-RPC request");
        let response = self.post(&message, sent_session.as_deref()).await?;
        self.absorb_session_id(&response).await;
        self.check_status(&response, sent_session.is_some(), id)
            .await?;

        let envelope = sse::decode_response(&response.body, response.content_type.as_deref(), id)?;
        envelope.into_result().map_err(rpc_error)
    }

    async fn send_notification(&self, method: &str) -> Result<(), McpError> {
        let message = serde_json::to_value(JsonRpcNotification::new(method)).map_err(|e| {
            McpError::invalid_response(format!("failed to encode notification: {e}"))
        })?;
        let sent_session = self.session.read().await.id.clone();
        let response = self.post(&message, sent_session.as_deref()).await?;
        self.absorb_session_id(&response).await;
        if response.is_success() {
            Ok(())
        } else {
            Err(McpError::protocol(
                i64::from(response.status),
                truncate(&response.body),
            ))
        }
    }

    async fn post(
        &self,
        message: &Value,
        session_id: Option<&str>,
    ) -> Result<TransportResponse, McpError> {
        let timeout = self.options.request_timeout;
        match tokio::time::timeout(timeout, self.transport.post(message, session_id)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(McpError::Timeout(_))) | Err(_) => Err(McpError::Timeout(timeout)),
            Ok(Err(e)) => Err(e),
        }
    }

    async fn absorb_session_id(&self, response: &TransportResponse) {
        if let Some(id) = &response.session_id {
            let mut session = self.session.write().await;
            if session.rotate_id(id.clone()) {
                tracing::debug!(session_id = %id, "Adopted session id from gateway");
            }
        }
    }

    async fn check_status(
        &self,
        response: &TransportResponse,
        had_session: bool,
        request_id: u64,
    ) -> Result<(), McpError> {
        match response.status {
            s if (200..300).contains(&s) => Ok(()),
            429 => Err(McpError::RateLimited {
                retry_after: response.retry_after,
            }),
            404 if had_session => {
                self.session.write().await.close();
                tracing::warn!("Gateway no longer recognises the session");
                Err(McpError::session("Session expired on the gateway (HTTP 404)"))
            }
            502..=504 => Err(McpError::transport(format!(
                "HTTP {}: {}",
                response.status,
                truncate(&response.body)
            ))),
            status => {
                // Some gateways put a JSON-RPC error envelope in a 4xx body.
                if let Ok(envelope) = sse::decode_response(
                    &response.body,
                    response.content_type.as_deref(),
                    request_id,
                ) && let Err(error) = envelope.into_result()
                {
                    return Err(rpc_error(error));
                }
                Err(McpError::protocol(
                    i64::from(status),
                    truncate(&response.body),
                ))
            }
        }
    }
}

#[async_trait]
impl ToolCaller for McpClient {
    /// Invokes a tool on the active session.
    ///
    /// Fails with `NotInitialized` unless the session is active or degraded.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.ensure_callable().await?;
        let params = json!({ "name": name, "arguments": arguments });

        match self.invoke_tool(name, &params).await {
            Err(e) if e.is_transient() && self.options.retry_once => {
                let delay = self.options.retry.delay_for(0, e.retry_after());
                tracing::info!(
                    tool = name,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying tool call once"
                );
                tokio::time::sleep(delay).await;
                self.ensure_callable().await?;
                self.invoke_tool(name, &params).await
            }
            outcome => outcome,
        }
    }

    async fn call_tool_once(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.ensure_callable().await?;
        let params = json!({ "name": name, "arguments": arguments });
        self.invoke_tool(name, &params).await
    }

    async fn retries_exhausted(&self, error: &McpError) {
        if matches!(error, McpError::Transport { .. }) {
            tracing::warn!(error = %error, "Closing session after repeated transport failures");
            self.close().await;
        }
    }
}

fn rpc_error(error: JsonRpcErrorObject) -> McpError {
    if is_rate_limit_message(&error.message) {
        McpError::RateLimited { retry_after: None }
    } else {
        McpError::protocol(error.code, error.message)
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}

fn is_unknown_tool_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["unknown tool", "tool not found", "no such tool"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

//! # octofhir-mcp
//!
//! Protocol session client for FHIR gateways that speak JSON-RPC 2.0 over
//! streamable HTTP (plain JSON or Server-Sent Events responses).
//!
//! ## Overview
//!
//! - [`McpClient`] performs the `initialize` handshake, keeps the server's
//!   `Mcp-Session-Id` and issues `tools/list` and `tools/call` on it.
//! - [`ToolCaller`] is the seam the sync and query layers depend on.
//! - [`call_tool_with_retry`] wraps any caller with bounded exponential backoff
//!   for transient failures.
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_mcp::{FhirRequest, GatewayConfig, McpClient, ToolCaller};
//!
//! let client = McpClient::from_config(&GatewayConfig::new("http://localhost:3000/mcp"))?;
//! client.initialize().await?;
//! let result = client
//!     .call_tool("fhir_request", FhirRequest::get("/Patient/p1").into_arguments())
//!     .await?;
//! let patient = result.json_payload()?;
//! ```

pub mod client;
pub mod config;
mod error;
pub mod jsonrpc;
mod retry;
pub mod session;
pub mod sse;
pub mod tools;
pub mod transport;

pub use client::{ClientOptions, McpClient, ToolCaller};
pub use config::{DEFAULT_FHIR_TOOL, DEFAULT_PROTOCOL_VERSION, GatewayConfig};
pub use error::{ErrorCategory, McpError};
pub use retry::{RetryPolicy, call_tool_with_retry};
pub use session::{ServerInfo, Session, SessionState};
pub use tools::{FhirRequest, ToolContent, ToolInfo, ToolResult};
pub use transport::{HttpTransport, McpTransport, TransportResponse};

/// Type alias for a protocol client result.
pub type McpResult<T> = Result<T, McpError>;

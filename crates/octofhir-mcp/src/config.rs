use std::collections::HashMap;
use std::time::Duration;

use octofhir_core::ResourceType;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";
pub const DEFAULT_FHIR_TOOL: &str = "fhir_request";

/// Connection settings for one gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Streamable-HTTP endpoint of the gateway.
    pub url: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Schedule one retry inside `call_tool` for transient failures. The
    /// backoff helper ignores it and counts each attempt against `retry`.
    #[serde(default)]
    pub retry_once: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Tool that proxies FHIR REST requests.
    #[serde(default = "default_fhir_tool")]
    pub fhir_tool: String,
    /// Per-resource-type tool names that replace `fhir_tool`.
    #[serde(default)]
    pub tool_overrides: HashMap<ResourceType, String>,
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

fn default_client_name() -> String {
    "octofhir-gw".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_fhir_tool() -> String {
    DEFAULT_FHIR_TOOL.to_string()
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            bearer_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            retry_once: false,
            retry: RetryPolicy::default(),
            fhir_tool: default_fhir_tool(),
            tool_overrides: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("gateway.url must not be empty".into());
        }
        if self.request_timeout_ms == 0 {
            return Err("gateway.request_timeout_ms must be > 0".into());
        }
        if self.fhir_tool.trim().is_empty() {
            return Err("gateway.fhir_tool must not be empty".into());
        }
        self.retry.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Tool name that serves requests for `resource_type`.
    pub fn tool_for(&self, resource_type: ResourceType) -> &str {
        self.tool_overrides
            .get(&resource_type)
            .map(String::as_str)
            .unwrap_or(&self.fhir_tool)
    }
}

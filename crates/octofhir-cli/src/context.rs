use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use octofhir_db_memory::{DynLocalStore, create_local_store};
use octofhir_mcp::{GatewayConfig, McpClient, McpError, ToolCaller, ToolResult};
use serde_json::Value;

use crate::config::Settings;

/// A configured gateway client, not yet connected.
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub client: Arc<McpClient>,
}

impl Gateway {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let config = settings.gateway()?;
        let client = McpClient::from_config(&config)
            .with_context(|| format!("Cannot reach gateway at {}", config.url))?;
        Ok(Self {
            config: Arc::new(config),
            client: Arc::new(client),
        })
    }

    /// A caller that performs the handshake on first use, so purely local
    /// answers never touch the network.
    pub fn on_demand(&self) -> Arc<dyn ToolCaller> {
        Arc::new(OnDemand(self.client.clone()))
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

struct OnDemand(Arc<McpClient>);

#[async_trait]
impl ToolCaller for OnDemand {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.0.initialize().await?;
        self.0.call_tool(name, arguments).await
    }

    async fn call_tool_once(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.0.initialize().await?;
        self.0.call_tool_once(name, arguments).await
    }

    async fn retries_exhausted(&self, error: &McpError) {
        self.0.retries_exhausted(error).await;
    }
}

pub async fn open_store(settings: &Settings) -> Result<DynLocalStore> {
    create_local_store(Some(settings.store.clone()))
        .await
        .with_context(|| format!("Cannot open local cache {}", settings.store.display()))
}

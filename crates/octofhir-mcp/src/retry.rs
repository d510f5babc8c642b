//! Bounded exponential backoff for transient call failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ToolCaller;
use crate::tools::ToolResult;
use crate::error::McpError;

/// Backoff policy: the delay doubles per attempt from `base_delay_ms`, capped
/// at `max_delay_ms`, for at most `max_attempts` attempts in total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt + 1` (0-based `attempt`).
    ///
    /// A server-provided `Retry-After` wins when it is longer than the computed delay.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        let computed = Duration::from_millis(millis);
        match retry_after {
            Some(server) if server > computed => server.min(Duration::from_millis(self.max_delay_ms)),
            _ => computed,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".into());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err("retry.base_delay_ms must be <= retry.max_delay_ms".into());
        }
        Ok(())
    }
}

/// Calls a tool, retrying transient failures under `policy`.
///
/// Non-transient errors are returned immediately with their classification
/// intact. When the budget is exhausted the caller is notified through
/// [`ToolCaller::retries_exhausted`] and the last error is returned.
pub async fn call_tool_with_retry(
    caller: &dyn ToolCaller,
    name: &str,
    arguments: Value,
    policy: &RetryPolicy,
) -> Result<ToolResult, McpError> {
    let mut attempt = 0;
    loop {
        match caller.call_tool_once(name, arguments.clone()).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt, e.retry_after());
                tracing::warn!(
                    tool = name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient tool call failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(tool = name, attempts = attempt + 1, error = %e, "Retry budget exhausted");
                    caller.retries_exhausted(&e).await;
                } else {
                    tracing::debug!(tool = name, category = %e.category(), error = %e, "Tool call failed, not retryable");
                }
                return Err(e);
            }
        }
    }
}

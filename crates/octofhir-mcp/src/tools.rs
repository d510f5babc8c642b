//! Tool invocation payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::McpError;
use crate::jsonrpc::codes;

/// Descriptor returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Unsupported,
}

/// Result payload of `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolResult {
    /// All text blocks joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Decodes the JSON document carried by the result.
    ///
    /// Prefers `structuredContent`, then the first text block that parses as
    /// JSON, then an embedded resource block.
    pub fn json_payload(&self) -> Result<Value, McpError> {
        if let Some(structured) = &self.structured_content {
            return Ok(structured.clone());
        }
        for block in &self.content {
            match block {
                ToolContent::Text { text } => {
                    if let Ok(value) = serde_json::from_str::<Value>(text) {
                        return Ok(value);
                    }
                }
                ToolContent::Resource { resource } => {
                    if let Some(text) = resource.get("text").and_then(Value::as_str)
                        && let Ok(value) = serde_json::from_str::<Value>(text)
                    {
                        return Ok(value);
                    }
                }
                _ => {}
            }
        }
        Err(McpError::invalid_response(
            "tool result carries no JSON payload",
        ))
    }

    /// Decodes a FHIR resource or Bundle returned by the FHIR request tool.
    ///
    /// An `OperationOutcome` payload is the FHIR server rejecting the request
    /// and becomes a protocol error carrying its diagnostics.
    pub fn fhir_payload(&self) -> Result<Value, McpError> {
        let payload = self.json_payload()?;
        if payload.get("resourceType").and_then(Value::as_str) == Some("OperationOutcome") {
            return Err(McpError::protocol(
                codes::TOOL_EXECUTION_ERROR,
                outcome_message(&payload),
            ));
        }
        Ok(payload)
    }
}

fn outcome_message(outcome: &Value) -> String {
    let messages: Vec<&str> = outcome
        .get("issue")
        .and_then(Value::as_array)
        .map(|issues| {
            issues
                .iter()
                .filter_map(|i| {
                    i.get("diagnostics")
                        .or_else(|| i.get("details").and_then(|d| d.get("text")))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default();
    if messages.is_empty() {
        "OperationOutcome without diagnostics".to_string()
    } else {
        messages.join("; ")
    }
}

/// Arguments of the gateway's FHIR request tool:
/// `{request: {method, path, body}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
}

impl FhirRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            body: None,
        }
    }

    pub fn into_arguments(self) -> Value {
        json!({ "request": self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fhir_request_arguments_shape() {
        let args = FhirRequest::get("/Observation?subject=Patient/p1&_count=50").into_arguments();
        assert_eq!(
            args,
            json!({"request": {"method": "GET", "path": "/Observation?subject=Patient/p1&_count=50", "body": null}})
        );
    }

    #[test]
    fn test_tool_result_text_payload() {
        let result: ToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "{\"resourceType\":\"Bundle\",\"entry\":[]}"}]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.json_payload().unwrap()["resourceType"], "Bundle");
    }

    #[test]
    fn test_tool_result_structured_payload_wins() {
        let result: ToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "summary"}],
            "structuredContent": {"resourceType": "Patient", "id": "p1"}
        }))
        .unwrap();
        assert_eq!(result.json_payload().unwrap()["id"], "p1");
        assert_eq!(result.text(), "summary");
    }

    #[test]
    fn test_operation_outcome_becomes_protocol_error() {
        let result = ToolResult {
            structured_content: Some(json!({
                "resourceType": "OperationOutcome",
                "issue": [{"severity": "error", "code": "not-found", "diagnostics": "Patient/p-404 not found"}]
            })),
            ..ToolResult::default()
        };
        match result.fhir_payload().unwrap_err() {
            McpError::Protocol { code, message } => {
                assert_eq!(code, codes::TOOL_EXECUTION_ERROR);
                assert_eq!(message, "Patient/p-404 not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_content_is_tolerated() {
        let result: ToolResult = serde_json::from_value(json!({
            "content": [{"type": "audio", "data": "..."}, {"type": "text", "text": "not json"}],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content[0], ToolContent::Unsupported);
        assert!(result.json_payload().is_err());
    }
}

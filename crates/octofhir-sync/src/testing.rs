//! Scripted gateway used by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use octofhir_mcp::{McpError, ToolCaller, ToolContent, ToolResult};
use serde_json::{Value, json};

/// Answers FHIR request tool calls from a path-keyed script and records
/// every requested path.
#[derive(Default)]
pub(crate) struct FakeGateway {
    routes: HashMap<String, Result<Value, McpError>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, payload: Value) -> Self {
        self.routes.insert(path.to_string(), Ok(payload));
        self
    }

    pub fn with_error(mut self, path: &str, error: McpError) -> Self {
        self.routes.insert(path.to_string(), Err(error));
        self
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolCaller for FakeGateway {
    async fn call_tool(&self, _name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        let path = arguments["request"]["path"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push(path.clone());
        match self.routes.get(&path) {
            Some(Ok(payload)) => Ok(ToolResult {
                content: vec![ToolContent::Text {
                    text: payload.to_string(),
                }],
                ..ToolResult::default()
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(McpError::protocol(404, format!("no route for {path}"))),
        }
    }
}

pub(crate) fn bundle(resource_type: &str, ids: &[&str], next: Option<&str>) -> Value {
    let entries: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "fullUrl": format!("http://fhir/{resource_type}/{id}"),
                "resource": {
                    "resourceType": resource_type,
                    "id": id,
                    "subject": {"reference": "Patient/p1"}
                }
            })
        })
        .collect();
    let mut bundle = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": ids.len(),
        "entry": entries
    });
    if let Some(next) = next {
        bundle["link"] = json!([
            {"relation": "self", "url": "http://fhir/self"},
            {"relation": "next", "url": next}
        ]);
    }
    bundle
}

pub(crate) fn patient(id: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"family": "Chalmers", "given": ["Peter"]}],
        "birthDate": "1974-12-25"
    })
}

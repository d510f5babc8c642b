//! Decoding of Server-Sent-Events framed response bodies.
//!
//! The gateway answers each POST with an SSE stream whose `data:` lines carry
//! JSON-RPC messages. A single body may interleave notifications with the
//! response, so responses are located by request id rather than position.

use serde_json::Value;

use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    /// Concatenated `data:` lines, joined with `\n`.
    pub data: String,
}

/// Splits an SSE body into events.
///
/// Blank lines dispatch the pending event, `:` lines are comments, and a
/// single space after the field colon is stripped. A trailing event without a
/// terminating blank line is still dispatched.
pub fn parse_events(body: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut current = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    let mut dispatch = |current: &mut SseEvent, data_lines: &mut Vec<&str>| {
        if !data_lines.is_empty() {
            current.data = data_lines.join("\n");
            events.push(std::mem::take(current));
        } else {
            *current = SseEvent::default();
        }
        data_lines.clear();
    };

    for raw_line in body.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() {
            dispatch(&mut current, &mut data_lines);
            continue;
        }
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => current.event = Some(value.to_string()),
            "id" => current.id = Some(value.to_string()),
            _ => {}
        }
    }
    dispatch(&mut current, &mut data_lines);

    events
}

/// Extracts the JSON-RPC response for `request_id` from a response body.
///
/// Bodies served as `application/json` (or that carry no `data:` lines at all)
/// are decoded directly; everything else is treated as an SSE stream.
pub fn decode_response(
    body: &str,
    content_type: Option<&str>,
    request_id: u64,
) -> Result<JsonRpcResponse, McpError> {
    let is_json = content_type
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);

    let payloads: Vec<String> = if is_json {
        vec![body.to_string()]
    } else {
        let events = parse_events(body);
        if events.is_empty() && body.trim_start().starts_with('{') {
            vec![body.to_string()]
        } else {
            events.into_iter().map(|e| e.data).collect()
        }
    };

    if payloads.is_empty() {
        return Err(McpError::invalid_response("response body has no data events"));
    }

    for payload in payloads {
        let value: Value = serde_json::from_str(&payload).map_err(|e| {
            McpError::invalid_response(format!("data payload is not JSON: {e}"))
        })?;

        let candidates = match value {
            Value::Array(batch) => batch,
            other => vec![other],
        };
        for candidate in candidates {
            if !JsonRpcResponse::is_response_shape(&candidate) {
                tracing::trace!(message = %candidate, "Skipping non-response SSE message");
                continue;
            }
            let response: JsonRpcResponse = serde_json::from_value(candidate).map_err(|e| {
                McpError::invalid_response(format!("malformed JSON-RPC envelope: {e}"))
            })?;
            if response.matches_id(request_id) {
                return Ok(response);
            }
            tracing::debug!(id = %response.id, expected = request_id, "Skipping response for another request");
        }
    }

    Err(McpError::invalid_response(format!(
        "no response for request id {request_id}"
    )))
}

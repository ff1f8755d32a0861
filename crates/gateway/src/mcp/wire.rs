//! JSON-RPC 2.0 wire helpers for the MCP dialect.
//!
//! The gateway speaks a fixed five-method surface, so the envelope layer
//! is a handful of serde values rather than a protocol library. Request
//! ids echo back verbatim, numeric or string.

use serde_json::{Value, json};

pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Generic server/configuration fault (decrypt failure, unknown service).
pub const SERVER_ERROR: i64 = -32000;
pub const ENDPOINT_NOT_FOUND: i64 = -32001;
pub const ENDPOINT_INACTIVE: i64 = -32002;
pub const QUOTA_EXCEEDED: i64 = -32003;

/// A structurally valid JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Value,
    pub method: String,
    pub params: Value,
}

#[derive(Debug)]
pub enum EnvelopeError {
    /// Body is not a JSON-RPC 2.0 object; carries the id to echo (null
    /// when none was readable).
    Invalid(Value),
}

/// Pull apart a parsed body. Batch requests and foreign versions are
/// rejected as invalid envelopes.
pub fn read_envelope(body: &Value) -> Result<Envelope, EnvelopeError> {
    let Some(obj) = body.as_object() else {
        return Err(EnvelopeError::Invalid(Value::Null));
    };
    let id = obj.get("id").cloned().unwrap_or(Value::Null);

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(EnvelopeError::Invalid(id));
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err(EnvelopeError::Invalid(id));
    };

    Ok(Envelope {
        id,
        method: method.to_string(),
        params: obj.get("params").cloned().unwrap_or_else(|| json!({})),
    })
}

#[must_use]
pub fn success(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

#[must_use]
pub fn error(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

/// MCP tool-call result carrying a JSON payload as text content.
#[must_use]
pub fn tool_ok(payload: &Value) -> Value {
    json!({
        "content": [ { "type": "text", "text": payload.to_string() } ],
    })
}

/// MCP convention: a failed tool call is a *successful* JSON-RPC reply
/// flagged `isError`, so the model can read and surface the failure.
#[must_use]
pub fn tool_err(message: &str) -> Value {
    json!({
        "content": [ { "type": "text", "text": json!({ "error": message }).to_string() } ],
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_requires_version_and_method() {
        let ok = read_envelope(&json!({
            "jsonrpc": "2.0", "id": 7, "method": "ping"
        }))
        .unwrap_or_else(|_| panic!("valid envelope"));
        assert_eq!(ok.id, json!(7));
        assert_eq!(ok.method, "ping");
        assert_eq!(ok.params, json!({}));

        for bad in [
            json!({ "id": 1, "method": "ping" }),
            json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }),
            json!({ "jsonrpc": "2.0", "id": 1 }),
            json!([ { "jsonrpc": "2.0", "id": 1, "method": "ping" } ]),
            json!("ping"),
        ] {
            assert!(read_envelope(&bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn string_ids_echo_verbatim() {
        let envelope = read_envelope(&json!({
            "jsonrpc": "2.0", "id": "req-9", "method": "ping"
        }))
        .unwrap_or_else(|_| panic!("valid envelope"));
        let reply = success(&envelope.id, json!({}));
        assert_eq!(reply["id"], "req-9");
    }

    #[test]
    fn tool_error_shape_follows_mcp_convention() {
        let reply = tool_err("Multiple statements not allowed");
        assert_eq!(reply["isError"], true);
        let text = reply["content"][0]["text"].as_str().unwrap();
        let decoded: Value = serde_json::from_str(text).unwrap();
        assert_eq!(decoded["error"], "Multiple statements not allowed");
    }
}

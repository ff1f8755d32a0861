//! The tools/call pipeline and method routing.
//!
//! Every request is stateless: parse, resolve the endpoint, gate, unseal,
//! invoke, log, translate. Adapter-level failures become successful
//! JSON-RPC replies with `isError: true`; only envelope, configuration,
//! and quota faults surface as JSON-RPC errors.

use super::wire::{self, Envelope, EnvelopeError};
use crate::AppState;
use crate::quota::{self, QuotaDecision};
use crate::store::{
    ResolvedEndpoint, StoreError, UsageRecord, UsageStatus, encrypted_field_names,
};
use crate::usage::redact_args;
use chrono::Utc;
use portway_adapters::{ServiceConfig, ToolOutcome};
use serde_json::{Value, json};

pub enum RpcReply {
    Json(Value),
    /// `notifications/initialized` answers HTTP 204 with no body.
    NoContent,
}

pub async fn handle_rpc(state: &AppState, endpoint_public_id: &str, body: &[u8]) -> RpcReply {
    let Ok(parsed) = serde_json::from_slice::<Value>(body) else {
        return RpcReply::Json(wire::error(&Value::Null, wire::PARSE_ERROR, "Parse error"));
    };
    let envelope = match wire::read_envelope(&parsed) {
        Ok(envelope) => envelope,
        Err(EnvelopeError::Invalid(id)) => {
            return RpcReply::Json(wire::error(&id, wire::INVALID_REQUEST, "Invalid Request"));
        }
    };

    // Stateless notification; nothing to resolve or record.
    if envelope.method == "notifications/initialized" {
        return RpcReply::NoContent;
    }

    let resolved = match state.store.resolve_endpoint(endpoint_public_id).await {
        Ok(Some(resolved)) => resolved,
        Ok(None) => {
            return RpcReply::Json(wire::error(
                &envelope.id,
                wire::ENDPOINT_NOT_FOUND,
                "Endpoint not found",
            ));
        }
        Err(StoreError::UnknownService(slug)) => {
            return RpcReply::Json(wire::error(
                &envelope.id,
                wire::SERVER_ERROR,
                format!("Service '{slug}' is not supported; re-add credentials"),
            ));
        }
        Err(e) => {
            tracing::warn!(error = %e, endpoint = %endpoint_public_id, "endpoint resolution failed");
            return RpcReply::Json(wire::error(
                &envelope.id,
                wire::SERVER_ERROR,
                "Internal error",
            ));
        }
    };
    if !resolved.endpoint.active {
        return RpcReply::Json(wire::error(
            &envelope.id,
            wire::ENDPOINT_INACTIVE,
            "Endpoint is inactive",
        ));
    }

    state.usage.touch_endpoint(resolved.endpoint.id, Utc::now());

    let reply = match envelope.method.as_str() {
        "initialize" => initialize_reply(&envelope.id),
        "ping" => wire::success(&envelope.id, json!({})),
        "tools/list" => tools_list(state, &envelope, &resolved),
        "tools/call" => tools_call(state, &envelope, &resolved).await,
        other => wire::error(
            &envelope.id,
            wire::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };
    RpcReply::Json(reply)
}

fn initialize_reply(id: &Value) -> Value {
    wire::success(
        id,
        json!({
            "protocolVersion": wire::PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "portway-gateway",
                "version": env!("CARGO_PKG_VERSION"),
            },
        }),
    )
}

fn tools_list(state: &AppState, envelope: &Envelope, resolved: &ResolvedEndpoint) -> Value {
    let Some(adapter) = state.registry.get(resolved.endpoint.service) else {
        return wire::error(
            &envelope.id,
            wire::SERVER_ERROR,
            format!(
                "No adapter registered for service '{}'",
                resolved.endpoint.service
            ),
        );
    };

    let tools: Vec<Value> = adapter
        .tools()
        .iter()
        .filter(|t| resolved.endpoint.tool_allowed(t.name))
        .map(portway_adapters::ToolDef::to_wire)
        .collect();
    wire::success(&envelope.id, json!({ "tools": tools }))
}

async fn tools_call(state: &AppState, envelope: &Envelope, resolved: &ResolvedEndpoint) -> Value {
    let Some(tool_name) = envelope.params.get("name").and_then(Value::as_str) else {
        return wire::error(&envelope.id, wire::INVALID_PARAMS, "Missing tool name");
    };
    let args = envelope
        .params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let Some(adapter) = state.registry.get(resolved.endpoint.service) else {
        return wire::error(
            &envelope.id,
            wire::SERVER_ERROR,
            format!(
                "No adapter registered for service '{}'",
                resolved.endpoint.service
            ),
        );
    };

    if !adapter.tools().iter().any(|t| t.name == tool_name) {
        return wire::error(
            &envelope.id,
            wire::METHOD_NOT_FOUND,
            format!("Unknown tool: {tool_name}"),
        );
    }
    if !resolved.endpoint.tool_allowed(tool_name) {
        return wire::error(
            &envelope.id,
            wire::METHOD_NOT_FOUND,
            format!("Tool '{tool_name}' is not enabled for this endpoint"),
        );
    }

    let encrypted = encrypted_field_names(&resolved.field_schema);
    let config = match state
        .cipher
        .unseal_config(&resolved.credential.config, &encrypted)
    {
        Ok(fields) => ServiceConfig::new(fields),
        Err(e) => {
            // Never echo the ciphertext or any key material.
            tracing::warn!(
                error = %e,
                credential = %resolved.credential.id,
                "credential unseal failed"
            );
            return wire::error(
                &envelope.id,
                wire::SERVER_ERROR,
                "Unable to decrypt stored credentials; re-add credentials for this endpoint",
            );
        }
    };
    for field in adapter.required_fields() {
        if !config.has(field) {
            return wire::error(
                &envelope.id,
                wire::SERVER_ERROR,
                format!(
                    "Credential is missing required field '{field}'; re-add credentials for this endpoint"
                ),
            );
        }
    }

    let now = Utc::now();
    if !state.rate.admit(
        &resolved.endpoint.public_id,
        resolved.endpoint.rate_limit_per_minute,
        now,
    ) {
        return wire::error(&envelope.id, wire::QUOTA_EXCEEDED, "Rate limit exceeded");
    }
    match quota::check_daily_cap(state.store.as_ref(), &resolved.organization, now).await {
        Ok(QuotaDecision::Allowed) => {}
        Ok(QuotaDecision::Denied { reason }) => {
            return wire::error(&envelope.id, wire::QUOTA_EXCEEDED, reason);
        }
        Err(e) => {
            tracing::warn!(error = %e, "daily cap check failed");
            return wire::error(&envelope.id, wire::SERVER_ERROR, "Internal error");
        }
    }

    let started = std::time::Instant::now();
    let outcome = adapter.handle(tool_name, &args, &config).await;
    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    let (status, error) = match &outcome {
        ToolOutcome::Ok(_) => (UsageStatus::Success, None),
        ToolOutcome::Err(message) => (UsageStatus::Error, Some(message.clone())),
    };
    state.usage.record_usage(UsageRecord {
        organization_id: resolved.organization.id,
        credential_id: resolved.credential.id,
        service: resolved.endpoint.service,
        tool: tool_name.to_string(),
        request_args: redact_args(&args),
        status,
        error,
        duration_ms,
        created_at: Utc::now(),
    });

    match outcome {
        ToolOutcome::Ok(payload) => wire::success(&envelope.id, wire::tool_ok(&payload)),
        ToolOutcome::Err(message) => wire::success(&envelope.id, wire::tool_err(&message)),
    }
}

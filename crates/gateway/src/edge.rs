//! Gateway HTTP edge.
//!
//! Two public routes per endpoint id (a GET health probe and the
//! JSON-RPC POST) plus a process liveness probe. Body-size limits and the
//! overall request deadline are imposed here, around the dispatcher.

use crate::AppState;
use crate::mcp::{self, RpcReply, wire};
use axum::extract::{DefaultBodyLimit, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router, body::Bytes};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/gateway/{endpoint_id}", get(health_probe).post(gateway_rpc))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(state))
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Endpoint health probe: 200 when active, 404 when unknown, 403 when
/// deactivated.
async fn health_probe(
    Extension(state): Extension<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
) -> Response {
    match state.store.resolve_endpoint(&endpoint_id).await {
        Ok(Some(resolved)) if resolved.endpoint.active => Json(json!({
            "name": "portway-gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "status": "ok",
            "service": resolved.endpoint.service.as_slug(),
            "endpoint": resolved.endpoint.public_id,
        }))
        .into_response(),
        Ok(Some(_)) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Endpoint is inactive" })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Endpoint not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, endpoint = %endpoint_id, "health probe resolution failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal error" })),
            )
                .into_response()
        }
    }
}

async fn gateway_rpc(
    Extension(state): Extension<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    body: Bytes,
) -> Response {
    let deadline = state.config.request_timeout;
    match tokio::time::timeout(deadline, mcp::handle_rpc(&state, &endpoint_id, &body)).await {
        Ok(RpcReply::Json(reply)) => Json(reply).into_response(),
        Ok(RpcReply::NoContent) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => {
            tracing::warn!(endpoint = %endpoint_id, "request deadline exceeded");
            Json(wire::error(
                &Value::Null,
                wire::SERVER_ERROR,
                "Request timed out",
            ))
            .into_response()
        }
    }
}

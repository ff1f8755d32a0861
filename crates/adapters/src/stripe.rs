//! Stripe adapter: read-only wrappers over the documented REST API.
//!
//! Result bodies pass through untransformed; pagination cursors are
//! forwarded verbatim. Upstream failures surface as
//! `Stripe API error: <message>` with no credential echo.

use crate::contracts::{ServiceAdapter, ServiceConfig, ServiceKind, ToolDef, ToolOutcome};
use crate::error::AdapterError;
use crate::safety::sanitize_reqwest_error;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;

const API_BASE: &str = "https://api.stripe.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_PAGE: i64 = 100;
const DEFAULT_PAGE: i64 = 10;

const INVOICE_STATUSES: [&str; 5] = ["draft", "open", "paid", "uncollectible", "void"];

static TOOLS: LazyLock<Vec<ToolDef>> = LazyLock::new(|| {
    vec![
        ToolDef {
            name: "list_customers",
            description: "List customers, newest first".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Max results, capped at 100 (default 10)" },
                    "starting_after": { "type": "string", "description": "Cursor: customer id to start after" },
                },
            }),
        },
        ToolDef {
            name: "list_charges",
            description: "List charges, optionally within a created-date range".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer" },
                    "starting_after": { "type": "string" },
                    "created_after": { "type": "integer", "description": "Unix timestamp lower bound" },
                    "created_before": { "type": "integer", "description": "Unix timestamp upper bound" },
                },
            }),
        },
        ToolDef {
            name: "list_invoices",
            description: "List invoices, optionally filtered by status".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer" },
                    "starting_after": { "type": "string" },
                    "status": { "type": "string", "enum": INVOICE_STATUSES },
                },
            }),
        },
        ToolDef {
            name: "get_balance",
            description: "Retrieve the current account balance".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
});

pub struct StripeAdapter;

impl StripeAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for StripeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for StripeAdapter {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Stripe
    }

    fn tools(&self) -> &[ToolDef] {
        &TOOLS
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["secret_key"]
    }

    fn probe(&self) -> (&'static str, Value) {
        ("get_balance", json!({}))
    }

    async fn handle(&self, tool: &str, args: &Value, config: &ServiceConfig) -> ToolOutcome {
        run(tool, args, config).await.into()
    }
}

async fn run(tool: &str, args: &Value, config: &ServiceConfig) -> Result<Value, AdapterError> {
    let secret_key = config.require("secret_key")?;

    let (path, query) = match tool {
        "list_customers" => ("customers", paging_params(args)?),
        "list_charges" => {
            let mut params = paging_params(args)?;
            if let Some(after) = args.get("created_after").and_then(Value::as_i64) {
                params.push(("created[gte]".to_string(), after.to_string()));
            }
            if let Some(before) = args.get("created_before").and_then(Value::as_i64) {
                params.push(("created[lte]".to_string(), before.to_string()));
            }
            ("charges", params)
        }
        "list_invoices" => {
            let mut params = paging_params(args)?;
            if let Some(status) = args.get("status").and_then(Value::as_str) {
                if !INVOICE_STATUSES.contains(&status) {
                    return Err(AdapterError::InvalidArgument(format!(
                        "status must be one of {INVOICE_STATUSES:?}, got '{status}'"
                    )));
                }
                params.push(("status".to_string(), status.to_string()));
            }
            ("invoices", params)
        }
        "get_balance" => ("balance", Vec::new()),
        other => {
            return Err(AdapterError::InvalidArgument(format!(
                "tool '{other}' is not supported"
            )));
        }
    };

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AdapterError::Config(sanitize_reqwest_error(&e)))?;

    let resp = client
        .get(format!("{API_BASE}/{path}"))
        .query(&query)
        .bearer_auth(secret_key)
        .send()
        .await
        .map_err(|e| AdapterError::Connect(sanitize_reqwest_error(&e)))?;

    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| AdapterError::Upstream(sanitize_reqwest_error(&e)))?;

    if !status.is_success() {
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("HTTP {status}"), str::to_string);
        return Err(AdapterError::Upstream(format!("Stripe API error: {message}")));
    }

    Ok(body)
}

/// Shared `limit` clamp + cursor forwarding for the list tools.
fn paging_params(args: &Value) -> Result<Vec<(String, String)>, AdapterError> {
    let limit = match args.get("limit").and_then(Value::as_i64) {
        Some(v) if v >= 1 => v.min(MAX_PAGE),
        Some(_) | None => DEFAULT_PAGE,
    };
    let mut params = vec![("limit".to_string(), limit.to_string())];
    if let Some(cursor) = args.get("starting_after").and_then(Value::as_str) {
        params.push(("starting_after".to_string(), cursor.to_string()));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_to_stripe_maximum() {
        let params = paging_params(&json!({ "limit": 500 })).unwrap();
        assert!(params.contains(&("limit".to_string(), "100".to_string())));

        let params = paging_params(&json!({})).unwrap();
        assert!(params.contains(&("limit".to_string(), "10".to_string())));

        let params = paging_params(&json!({ "limit": -2 })).unwrap();
        assert!(params.contains(&("limit".to_string(), "10".to_string())));
    }

    #[test]
    fn cursor_is_forwarded() {
        let params = paging_params(&json!({ "starting_after": "cus_123" })).unwrap();
        assert!(params.contains(&("starting_after".to_string(), "cus_123".to_string())));
    }
}

//! Mixpanel adapter: read-only query API wrappers.
//!
//! Authenticates with a service account over HTTP Basic; every call
//! carries the project id. Date-ranged tools require explicit
//! `from_date`/`to_date` in `YYYY-MM-DD` form.

use crate::contracts::{ServiceAdapter, ServiceConfig, ServiceKind, ToolDef, ToolOutcome};
use crate::error::AdapterError;
use crate::safety::sanitize_reqwest_error;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;

const API_BASE: &str = "https://mixpanel.com/api/2.0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_PAGE_SIZE: i64 = 1000;
const DEFAULT_PAGE_SIZE: i64 = 100;

static TOOLS: LazyLock<Vec<ToolDef>> = LazyLock::new(|| {
    vec![
        ToolDef {
            name: "list_event_names",
            description: "List the project's most common event names".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Max names, capped at 1000 (default 100)" },
                },
            }),
        },
        ToolDef {
            name: "query_segmentation",
            description: "Segment an event's counts over a required date range".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "event": { "type": "string" },
                    "from_date": { "type": "string", "description": "YYYY-MM-DD" },
                    "to_date": { "type": "string", "description": "YYYY-MM-DD" },
                    "unit": { "type": "string", "enum": ["minute", "hour", "day", "week", "month"] },
                },
                "required": ["event", "from_date", "to_date"],
            }),
        },
        ToolDef {
            name: "query_profiles",
            description: "Query user profiles (Engage)".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "where": { "type": "string", "description": "Segmentation expression" },
                    "page_size": { "type": "integer", "description": "Capped at 1000 (default 100)" },
                    "page": { "type": "integer", "description": "Page number for cursor continuation" },
                    "session_id": { "type": "string", "description": "Cursor session from a previous page" },
                },
            }),
        },
        ToolDef {
            name: "list_cohorts",
            description: "List saved cohorts".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
});

pub struct MixpanelAdapter;

impl MixpanelAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for MixpanelAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for MixpanelAdapter {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Mixpanel
    }

    fn tools(&self) -> &[ToolDef] {
        &TOOLS
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["project_id", "service_account_username", "service_account_secret"]
    }

    fn probe(&self) -> (&'static str, Value) {
        ("list_cohorts", json!({}))
    }

    async fn handle(&self, tool: &str, args: &Value, config: &ServiceConfig) -> ToolOutcome {
        run(tool, args, config).await.into()
    }
}

async fn run(tool: &str, args: &Value, config: &ServiceConfig) -> Result<Value, AdapterError> {
    let project_id = config.require("project_id")?;
    let username = config.require("service_account_username")?;
    let secret = config.require("service_account_secret")?;

    let (path, mut params) = match tool {
        "list_event_names" => {
            let limit = clamped_page_size(args, "limit");
            ("events/names", vec![("limit".to_string(), limit.to_string())])
        }
        "query_segmentation" => {
            let event = args
                .get("event")
                .and_then(Value::as_str)
                .ok_or_else(|| AdapterError::InvalidArgument("event is required".to_string()))?;
            let (from, to) = required_date_range(args)?;
            let mut params = vec![
                ("event".to_string(), event.to_string()),
                ("from_date".to_string(), from),
                ("to_date".to_string(), to),
            ];
            if let Some(unit) = args.get("unit").and_then(Value::as_str) {
                if !["minute", "hour", "day", "week", "month"].contains(&unit) {
                    return Err(AdapterError::InvalidArgument(format!(
                        "unit must be minute/hour/day/week/month, got '{unit}'"
                    )));
                }
                params.push(("unit".to_string(), unit.to_string()));
            }
            ("segmentation", params)
        }
        "query_profiles" => {
            let mut params = vec![(
                "page_size".to_string(),
                clamped_page_size(args, "page_size").to_string(),
            )];
            if let Some(expr) = args.get("where").and_then(Value::as_str) {
                params.push(("where".to_string(), expr.to_string()));
            }
            // Cursor continuation: both halves forwarded untouched.
            if let Some(page) = args.get("page").and_then(Value::as_i64) {
                params.push(("page".to_string(), page.to_string()));
            }
            if let Some(session) = args.get("session_id").and_then(Value::as_str) {
                params.push(("session_id".to_string(), session.to_string()));
            }
            ("engage", params)
        }
        "list_cohorts" => ("cohorts/list", Vec::new()),
        other => {
            return Err(AdapterError::InvalidArgument(format!(
                "tool '{other}' is not supported"
            )));
        }
    };
    params.push(("project_id".to_string(), project_id.to_string()));

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AdapterError::Config(sanitize_reqwest_error(&e)))?;

    let resp = client
        .get(format!("{API_BASE}/{path}"))
        .query(&params)
        .basic_auth(username, Some(secret))
        .send()
        .await
        .map_err(|e| AdapterError::Connect(sanitize_reqwest_error(&e)))?;

    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| AdapterError::Upstream(sanitize_reqwest_error(&e)))?;

    // Mixpanel reports failures both via status codes and an `error` field
    // on 200 responses.
    if !status.is_success() || body.get("error").is_some() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map_or_else(|| format!("HTTP {status}"), str::to_string);
        return Err(AdapterError::Upstream(format!(
            "Mixpanel API error: {message}"
        )));
    }

    Ok(body)
}

fn clamped_page_size(args: &Value, key: &str) -> i64 {
    match args.get(key).and_then(Value::as_i64) {
        Some(v) if v >= 1 => v.min(MAX_PAGE_SIZE),
        Some(_) | None => DEFAULT_PAGE_SIZE,
    }
}

fn required_date_range(args: &Value) -> Result<(String, String), AdapterError> {
    let from = args
        .get("from_date")
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::InvalidArgument("from_date is required".to_string()))?;
    let to = args
        .get("to_date")
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::InvalidArgument("to_date is required".to_string()))?;

    let parsed_from = NaiveDate::parse_from_str(from, "%Y-%m-%d").map_err(|_| {
        AdapterError::InvalidArgument(format!("from_date must be YYYY-MM-DD, got '{from}'"))
    })?;
    let parsed_to = NaiveDate::parse_from_str(to, "%Y-%m-%d").map_err(|_| {
        AdapterError::InvalidArgument(format!("to_date must be YYYY-MM-DD, got '{to}'"))
    })?;
    if parsed_from > parsed_to {
        return Err(AdapterError::InvalidArgument(
            "from_date must not be after to_date".to_string(),
        ));
    }

    Ok((from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_clamps_to_mixpanel_maximum() {
        assert_eq!(clamped_page_size(&json!({"page_size": 5000}), "page_size"), 1000);
        assert_eq!(clamped_page_size(&json!({}), "page_size"), 100);
        assert_eq!(clamped_page_size(&json!({"page_size": 0}), "page_size"), 100);
        assert_eq!(clamped_page_size(&json!({"page_size": 250}), "page_size"), 250);
    }

    #[test]
    fn date_range_is_required_and_validated() {
        assert!(required_date_range(&json!({})).is_err());
        assert!(required_date_range(&json!({"from_date": "2025-01-01"})).is_err());
        assert!(
            required_date_range(&json!({"from_date": "01/01/2025", "to_date": "2025-01-31"}))
                .is_err()
        );
        assert!(
            required_date_range(&json!({"from_date": "2025-02-01", "to_date": "2025-01-01"}))
                .is_err()
        );
        let (from, to) =
            required_date_range(&json!({"from_date": "2025-01-01", "to_date": "2025-01-31"}))
                .unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("2025-01-01", "2025-01-31"));
    }
}

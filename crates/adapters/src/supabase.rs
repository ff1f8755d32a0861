//! Supabase REST adapter.
//!
//! Speaks PostgREST: table discovery comes from the project's OpenAPI
//! document at `/rest/v1/`, reads go through the filter/ordering query
//! syntax with `Range` pagination, and `execute_sql` delegates to the
//! optional `execute_readonly_query` helper function. When the tenant has
//! not installed that helper, the tool answers with a hint pointing at
//! `query_table` instead of failing; the gateway never tries to install
//! it.

use crate::contracts::{ServiceAdapter, ServiceConfig, ServiceKind, ToolDef, ToolOutcome};
use crate::error::AdapterError;
use crate::safety::{sanitize_reqwest_error, validate_base_url};
use crate::sql::{QueryTableArgs, sql_argument, table_name_argument};
use crate::sql_guard::check_read_only;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static TOOLS: LazyLock<Vec<ToolDef>> = LazyLock::new(|| {
    let mut tools = crate::sql::sql_tool_defs("Supabase project");
    for tool in &mut tools {
        if tool.name == "execute_sql" {
            tool.description = "Execute a read-only SELECT through the project's \
                                execute_readonly_query helper function (if installed)"
                .to_string();
        }
    }
    tools
});

pub struct SupabaseAdapter;

impl SupabaseAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for SupabaseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for SupabaseAdapter {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Supabase
    }

    fn tools(&self) -> &[ToolDef] {
        &TOOLS
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["url", "api_key"]
    }

    async fn handle(&self, tool: &str, args: &Value, config: &ServiceConfig) -> ToolOutcome {
        run(tool, args, config).await.into()
    }
}

async fn run(tool: &str, args: &Value, config: &ServiceConfig) -> Result<Value, AdapterError> {
    let base = validate_base_url(config.require("url")?)?;
    let api_key = config.require("api_key")?;
    let client = http_client()?;

    match tool {
        "list_tables" => {
            let spec = fetch_openapi(&client, &base, api_key).await?;
            Ok(json!({ "tables": tables_from_openapi(&spec) }))
        }
        "describe_table" => {
            let table = table_name_argument(args)?;
            let spec = fetch_openapi(&client, &base, api_key).await?;
            describe_from_openapi(&spec, table)
        }
        "query_table" => {
            let parsed = QueryTableArgs::parse(args)?;
            query_table(&client, &base, api_key, &parsed).await
        }
        "execute_sql" => {
            let sql = sql_argument(args)?;
            check_read_only(sql)?;
            execute_sql_rpc(&client, &base, api_key, sql).await
        }
        other => Err(AdapterError::InvalidArgument(format!(
            "tool '{other}' is not supported"
        ))),
    }
}

fn http_client() -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AdapterError::Config(sanitize_reqwest_error(&e)))
}

fn rest_url(base: &Url, path: &str) -> Result<Url, AdapterError> {
    base.join(&format!("/rest/v1/{path}"))
        .map_err(|e| AdapterError::Config(format!("invalid REST path: {e}")))
}

fn authed(req: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    req.header("apikey", api_key)
        .bearer_auth(api_key)
}

async fn fetch_openapi(
    client: &reqwest::Client,
    base: &Url,
    api_key: &str,
) -> Result<Value, AdapterError> {
    let url = rest_url(base, "")?;
    let resp = authed(client.get(url), api_key)
        .send()
        .await
        .map_err(|e| AdapterError::Connect(sanitize_reqwest_error(&e)))?;
    if !resp.status().is_success() {
        return Err(upstream_error(resp).await);
    }
    resp.json()
        .await
        .map_err(|e| AdapterError::Upstream(sanitize_reqwest_error(&e)))
}

/// Table names are the OpenAPI paths minus templated paths and RPC stubs.
fn tables_from_openapi(spec: &Value) -> Vec<String> {
    let mut tables: Vec<String> = spec
        .get("paths")
        .and_then(Value::as_object)
        .map(|paths| {
            paths
                .keys()
                .filter(|p| p.as_str() != "/")
                .filter(|p| !p.contains('{'))
                .filter(|p| !p.starts_with("/rpc/"))
                .map(|p| p.trim_start_matches('/').to_string())
                .collect()
        })
        .unwrap_or_default();
    tables.sort();
    tables
}

fn describe_from_openapi(spec: &Value, table: &str) -> Result<Value, AdapterError> {
    let definition = spec
        .get("definitions")
        .and_then(|d| d.get(table))
        .ok_or_else(|| AdapterError::Upstream(format!("Table '{table}' not found")))?;

    let required: Vec<&str> = definition
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect();

    let columns: Vec<Value> = definition
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| {
                    let data_type = schema
                        .get("format")
                        .or_else(|| schema.get("type"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    json!({
                        "column_name": name,
                        "data_type": data_type,
                        "is_nullable": if required.contains(&name.as_str()) { "NO" } else { "YES" },
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(json!({ "columns": columns }))
}

async fn query_table(
    client: &reqwest::Client,
    base: &Url,
    api_key: &str,
    args: &QueryTableArgs,
) -> Result<Value, AdapterError> {
    let mut url = rest_url(base, &args.table)?;
    {
        let mut query = url.query_pairs_mut();
        let select = if args.select.is_empty() {
            "*".to_string()
        } else {
            args.select.join(",")
        };
        query.append_pair("select", &select);

        for (key, value) in &args.filters {
            let rendered = match value {
                Value::Null => "is.null".to_string(),
                Value::Bool(b) => format!("eq.{b}"),
                Value::Number(n) => format!("eq.{n}"),
                Value::String(s) => format!("eq.{s}"),
                _ => continue,
            };
            query.append_pair(key, &rendered);
        }

        if let Some(order) = &args.order_by {
            let direction = if args.descending { "desc" } else { "asc" };
            query.append_pair("order", &format!("{order}.{direction}"));
        }
    }

    let last = args.offset + args.limit - 1;
    let resp = authed(client.get(url), api_key)
        .header("Range-Unit", "items")
        .header("Range", format!("{}-{last}", args.offset))
        .send()
        .await
        .map_err(|e| AdapterError::Connect(sanitize_reqwest_error(&e)))?;
    if !resp.status().is_success() {
        return Err(upstream_error(resp).await);
    }

    let rows: Value = resp
        .json()
        .await
        .map_err(|e| AdapterError::Upstream(sanitize_reqwest_error(&e)))?;
    let count = rows.as_array().map_or(0, Vec::len);
    Ok(json!({ "rows": rows, "row_count": count }))
}

async fn execute_sql_rpc(
    client: &reqwest::Client,
    base: &Url,
    api_key: &str,
    sql: &str,
) -> Result<Value, AdapterError> {
    let url = rest_url(base, "rpc/execute_readonly_query")?;
    let resp = authed(client.post(url), api_key)
        .json(&json!({ "query_text": sql }))
        .send()
        .await
        .map_err(|e| AdapterError::Connect(sanitize_reqwest_error(&e)))?;

    // PostgREST answers 404 (PGRST202) when the helper function does not
    // exist. That is the documented contract: hint, don't raise.
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        tracing::debug!("execute_readonly_query helper missing; answering with a query_table hint");
        return Ok(json!({
            "rows": [],
            "hint": "The execute_readonly_query helper function is not installed in this \
                     Supabase project. Use the query_table tool instead, or ask the project \
                     owner to install the helper.",
        }));
    }
    if !resp.status().is_success() {
        return Err(upstream_error(resp).await);
    }

    let rows: Value = resp
        .json()
        .await
        .map_err(|e| AdapterError::Upstream(sanitize_reqwest_error(&e)))?;
    let count = rows.as_array().map_or(0, Vec::len);
    Ok(json!({ "rows": rows, "row_count": count }))
}

async fn upstream_error(resp: reqwest::Response) -> AdapterError {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    let message = body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map_or_else(|| format!("HTTP {status}"), str::to_string);
    AdapterError::Upstream(format!("Supabase API error: {message}"))
}

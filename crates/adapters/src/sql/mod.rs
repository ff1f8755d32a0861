//! Shared machinery for the read-only SQL adapters.
//!
//! The three dialects expose an identical tool surface; everything that can
//! be computed without a connection lives here as pure functions so the
//! generated SQL is testable without a live upstream. Identifiers are
//! sanitized and then dialect-quoted; values only ever appear as bound
//! positional parameters.

pub mod mssql;
pub mod mysql;
pub mod postgres;

use crate::contracts::ToolDef;
use crate::error::AdapterError;
use crate::sql_guard::sanitize_identifier;
use serde_json::{Value, json};
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

pub const MAX_ROWS: i64 = 500;
pub const DEFAULT_ROWS: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Mysql,
    Mssql,
}

impl SqlDialect {
    /// Quote a sanitized identifier in the dialect's native style. Every
    /// segment of a dotted name is quoted separately so `schema.table`
    /// becomes `"schema"."table"`, not `"schema.table"`.
    #[must_use]
    pub fn quote_ident(self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| match self {
                SqlDialect::Postgres => format!("\"{part}\""),
                SqlDialect::Mysql => format!("`{part}`"),
                SqlDialect::Mssql => format!("[{part}]"),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Positional placeholder for the 1-based parameter `n`.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${n}"),
            SqlDialect::Mysql => "?".to_string(),
            SqlDialect::Mssql => format!("@P{n}"),
        }
    }
}

/// Parsed and clamped `query_table` arguments; all identifiers sanitized.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTableArgs {
    pub table: String,
    pub select: Vec<String>,
    pub filters: Vec<(String, Value)>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: Option<String>,
    pub descending: bool,
}

impl QueryTableArgs {
    pub fn parse(args: &Value) -> Result<Self, AdapterError> {
        let table = args
            .get("table_name")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::InvalidArgument("table_name is required".to_string()))?;
        let table = sanitize_identifier(table)?.to_string();

        let mut select = Vec::new();
        if let Some(cols) = args.get("select") {
            let cols = cols.as_array().ok_or_else(|| {
                AdapterError::InvalidArgument("select must be an array of column names".to_string())
            })?;
            for col in cols {
                let col = col.as_str().ok_or_else(|| {
                    AdapterError::InvalidArgument("select entries must be strings".to_string())
                })?;
                select.push(sanitize_identifier(col)?.to_string());
            }
        }

        let mut filters = Vec::new();
        if let Some(map) = args.get("filters") {
            let map = map.as_object().ok_or_else(|| {
                AdapterError::InvalidArgument("filters must be an object".to_string())
            })?;
            for (key, value) in map {
                let key = sanitize_identifier(key)?.to_string();
                match value {
                    Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                        filters.push((key, value.clone()));
                    }
                    _ => {
                        return Err(AdapterError::InvalidArgument(format!(
                            "filter '{key}' must be a scalar value"
                        )));
                    }
                }
            }
        }

        let limit = match args.get("limit").and_then(Value::as_i64) {
            Some(v) if v >= 1 => v.min(MAX_ROWS),
            _ => DEFAULT_ROWS,
        };
        let offset = args
            .get("offset")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0);

        let order_by = match args.get("order_by").and_then(Value::as_str) {
            Some(col) => Some(sanitize_identifier(col)?.to_string()),
            None => None,
        };
        let descending = match args.get("order_direction").and_then(Value::as_str) {
            None => false,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => false,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => true,
            Some(other) => {
                return Err(AdapterError::InvalidArgument(format!(
                    "order_direction must be 'asc' or 'desc', got '{other}'"
                )));
            }
        };

        Ok(Self {
            table,
            select,
            filters,
            limit,
            offset,
            order_by,
            descending,
        })
    }
}

/// A statement plus its positional parameter values, in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Render the parameterized `SELECT` for a `query_table` call.
///
/// `NULL` filter values become `IS NULL` predicates rather than binds; the
/// clamped limit/offset are inlined since they are gateway-computed
/// integers, never client text.
#[must_use]
pub fn build_query_table(dialect: SqlDialect, args: &QueryTableArgs) -> BuiltQuery {
    let columns = if args.select.is_empty() {
        "*".to_string()
    } else {
        args.select
            .iter()
            .map(|c| dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {columns} FROM {}", dialect.quote_ident(&args.table));
    let mut params = Vec::new();

    let mut predicates = Vec::new();
    for (key, value) in &args.filters {
        let quoted = dialect.quote_ident(key);
        if value.is_null() {
            predicates.push(format!("{quoted} IS NULL"));
        } else {
            params.push(value.clone());
            predicates.push(format!("{quoted} = {}", dialect.placeholder(params.len())));
        }
    }
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    let direction = if args.descending { "DESC" } else { "ASC" };
    match dialect {
        SqlDialect::Postgres | SqlDialect::Mysql => {
            if let Some(order) = &args.order_by {
                sql.push_str(&format!(" ORDER BY {} {direction}", dialect.quote_ident(order)));
            }
            sql.push_str(&format!(" LIMIT {} OFFSET {}", args.limit, args.offset));
        }
        SqlDialect::Mssql => {
            // OFFSET/FETCH requires an ORDER BY clause.
            match &args.order_by {
                Some(order) => {
                    sql.push_str(&format!(" ORDER BY {} {direction}", dialect.quote_ident(order)));
                }
                None => sql.push_str(" ORDER BY (SELECT NULL)"),
            }
            sql.push_str(&format!(
                " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                args.offset, args.limit
            ));
        }
    }

    BuiltQuery { sql, params }
}

/// The four read-only tools every SQL dialect exposes.
#[must_use]
pub fn sql_tool_defs(dialect_label: &str) -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "list_tables",
            description: format!("List base tables in the {dialect_label} database"),
            input_schema: json!({
                "type": "object",
                "properties": {},
            }),
        },
        ToolDef {
            name: "describe_table",
            description: format!("Describe the columns of a {dialect_label} table"),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string", "description": "Table to describe" },
                },
                "required": ["table_name"],
            }),
        },
        ToolDef {
            name: "query_table",
            description: format!(
                "Run a filtered, paginated SELECT against one {dialect_label} table"
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string" },
                    "select": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Columns to return; defaults to all",
                    },
                    "filters": {
                        "type": "object",
                        "description": "Equality filters; null values match NULL",
                    },
                    "limit": { "type": "integer", "description": "Max rows, capped at 500 (default 50)" },
                    "offset": { "type": "integer" },
                    "order_by": { "type": "string" },
                    "order_direction": { "type": "string", "enum": ["asc", "desc"] },
                },
                "required": ["table_name"],
            }),
        },
        ToolDef {
            name: "execute_sql",
            description: format!(
                "Execute a single read-only SELECT statement against {dialect_label}"
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string", "description": "A single SELECT or WITH statement" },
                },
                "required": ["sql"],
            }),
        },
    ]
}

/// A fully validated tool invocation, ready to run against a connection.
///
/// Planning happens before the adapter dials the upstream: guard
/// rejections and argument errors never pay for a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlToolPlan {
    ListTables,
    DescribeTable { qualified: String },
    QueryTable(BuiltQuery),
    ExecuteSql(String),
}

pub fn plan_tool(dialect: SqlDialect, tool: &str, args: &Value) -> Result<SqlToolPlan, AdapterError> {
    match tool {
        "list_tables" => Ok(SqlToolPlan::ListTables),
        "describe_table" => Ok(SqlToolPlan::DescribeTable {
            qualified: table_name_argument(args)?.to_string(),
        }),
        "query_table" => {
            let parsed = QueryTableArgs::parse(args)?;
            Ok(SqlToolPlan::QueryTable(build_query_table(dialect, &parsed)))
        }
        "execute_sql" => {
            let sql = sql_argument(args)?;
            crate::sql_guard::check_read_only(sql)?;
            Ok(SqlToolPlan::ExecuteSql(sql.to_string()))
        }
        other => Err(AdapterError::InvalidArgument(format!(
            "tool '{other}' is not supported"
        ))),
    }
}

/// Split an optionally schema-qualified table name, with a dialect default.
#[must_use]
pub fn split_qualified<'a>(qualified: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    match qualified.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => (default_schema, qualified),
    }
}

/// Pull the `sql` argument for `execute_sql`.
pub fn sql_argument(args: &Value) -> Result<&str, AdapterError> {
    args.get("sql")
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::InvalidArgument("sql is required".to_string()))
}

/// Pull the `table_name` argument for `describe_table`.
pub fn table_name_argument(args: &Value) -> Result<&str, AdapterError> {
    let name = args
        .get("table_name")
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::InvalidArgument("table_name is required".to_string()))?;
    Ok(sanitize_identifier(name)?)
}

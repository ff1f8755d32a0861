//! MySQL adapter.
//!
//! Same tool surface as the PostgreSQL adapter; dialect differences are
//! backtick quoting, `?` placeholders, and table discovery scoped to the
//! connection's default schema (`database()`).

use super::{CONNECT_TIMEOUT, STATEMENT_TIMEOUT, SqlDialect, SqlToolPlan, plan_tool};
use crate::contracts::{ServiceAdapter, ServiceConfig, ServiceKind, ToolDef, ToolOutcome};
use crate::error::AdapterError;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::{Column as _, ConnectOptions as _, Connection as _, Row as _, TypeInfo as _};

pub struct MysqlAdapter {
    tools: Vec<ToolDef>,
}

impl MysqlAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: super::sql_tool_defs("MySQL"),
        }
    }
}

impl Default for MysqlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for MysqlAdapter {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Mysql
    }

    fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["host", "database", "username"]
    }

    async fn handle(&self, tool: &str, args: &Value, config: &ServiceConfig) -> ToolOutcome {
        run(tool, args, config).await.into()
    }
}

async fn run(tool: &str, args: &Value, config: &ServiceConfig) -> Result<Value, AdapterError> {
    let plan = plan_tool(SqlDialect::Mysql, tool, args)?;

    let mut conn = connect(config).await?;
    let result = execute(&mut conn, plan).await;
    let _ = conn.close().await;
    result
}

async fn connect(config: &ServiceConfig) -> Result<MySqlConnection, AdapterError> {
    let port: u16 = match config.get("port") {
        Some(raw) => raw
            .parse()
            .map_err(|_| AdapterError::Config(format!("invalid port '{raw}'")))?,
        None => 3306,
    };

    let ssl_mode = if config.flag("ssl") {
        // Encrypt without chain validation (managed providers commonly
        // present self-signed chains). VerifyCa/VerifyIdentity are the
        // strict modes we deliberately do not use here.
        MySqlSslMode::Required
    } else {
        MySqlSslMode::Disabled
    };

    let mut opts = MySqlConnectOptions::new()
        .host(config.require("host")?)
        .port(port)
        .database(config.require("database")?)
        .username(config.require("username")?)
        .ssl_mode(ssl_mode);
    if let Some(password) = config.get("password") {
        opts = opts.password(password);
    }

    match tokio::time::timeout(CONNECT_TIMEOUT, opts.connect()).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(AdapterError::Connect(e.to_string())),
        Err(_) => Err(AdapterError::Connect(format!(
            "connect timed out after {}s",
            CONNECT_TIMEOUT.as_secs()
        ))),
    }
}

async fn execute(conn: &mut MySqlConnection, plan: SqlToolPlan) -> Result<Value, AdapterError> {
    match plan {
        SqlToolPlan::ListTables => {
            let rows = fetch_all(
                conn,
                sqlx::query(
                    r"
select table_name from information_schema.tables
where table_schema = database() and table_type = 'BASE TABLE'
order by table_name
",
                ),
            )
            .await?;
            let tables: Vec<String> = rows
                .iter()
                .filter_map(|r| r.try_get::<String, _>(0).ok())
                .collect();
            Ok(json!({ "tables": tables }))
        }
        SqlToolPlan::DescribeTable { qualified } => {
            // Unqualified names resolve against the connection's default
            // schema; a dotted name pins the schema explicitly.
            let rows = match qualified.split_once('.') {
                Some((schema, table)) => {
                    fetch_all(
                        conn,
                        sqlx::query(
                            r"
select column_name, data_type, is_nullable, column_default, character_maximum_length
from information_schema.columns
where table_schema = ? and table_name = ?
order by ordinal_position
",
                        )
                        .bind(schema)
                        .bind(table),
                    )
                    .await?
                }
                None => {
                    fetch_all(
                        conn,
                        sqlx::query(
                            r"
select column_name, data_type, is_nullable, column_default, character_maximum_length
from information_schema.columns
where table_schema = database() and table_name = ?
order by ordinal_position
",
                        )
                        .bind(&qualified),
                    )
                    .await?
                }
            };
            if rows.is_empty() {
                return Err(AdapterError::Upstream(format!(
                    "Table '{qualified}' not found"
                )));
            }
            Ok(json!({ "columns": rows_to_json(&rows) }))
        }
        SqlToolPlan::QueryTable(built) => {
            let mut query = sqlx::query(&built.sql);
            for param in &built.params {
                query = bind_value(query, param);
            }
            let rows = fetch_all(conn, query).await?;
            Ok(json!({ "rows": rows_to_json(&rows), "row_count": rows.len() }))
        }
        SqlToolPlan::ExecuteSql(sql) => {
            let rows = fetch_all(conn, sqlx::query(&sql)).await?;
            Ok(json!({ "rows": rows_to_json(&rows), "row_count": rows.len() }))
        }
    }
}

async fn fetch_all(
    conn: &mut MySqlConnection,
    query: sqlx::query::Query<'_, sqlx::MySql, sqlx::mysql::MySqlArguments>,
) -> Result<Vec<MySqlRow>, AdapterError> {
    match tokio::time::timeout(STATEMENT_TIMEOUT, query.fetch_all(conn)).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(e)) => Err(AdapterError::Upstream(format!("MySQL error: {e}"))),
        Err(_) => Err(AdapterError::Timeout(STATEMENT_TIMEOUT.as_secs())),
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    match value {
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        Value::Number(n) => query.bind(n.as_f64()),
        Value::String(s) => query.bind(s.as_str()),
        _ => query.bind(Option::<String>::None),
    }
}

fn rows_to_json(rows: &[MySqlRow]) -> Vec<Value> {
    rows.iter().map(row_to_json).collect()
}

fn row_to_json(row: &MySqlRow) -> Value {
    let mut obj = Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        obj.insert(col.name().to_string(), column_value(row, idx));
    }
    Value::Object(obj)
}

fn column_value(row: &MySqlRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name().to_string();
    match type_name.as_str() {
        "BOOLEAN" => opt(row.try_get::<Option<bool>, _>(idx)).map_or(Value::Null, Value::Bool),
        "TINYINT" => opt(row.try_get::<Option<i8>, _>(idx)).map_or(Value::Null, |v| json!(v)),
        "SMALLINT" => opt(row.try_get::<Option<i16>, _>(idx)).map_or(Value::Null, |v| json!(v)),
        "MEDIUMINT" | "INT" => {
            opt(row.try_get::<Option<i32>, _>(idx)).map_or(Value::Null, |v| json!(v))
        }
        "BIGINT" => opt(row.try_get::<Option<i64>, _>(idx)).map_or(Value::Null, |v| json!(v)),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            opt(row.try_get::<Option<u64>, _>(idx)).map_or(Value::Null, |v| json!(v))
        }
        "FLOAT" => opt(row.try_get::<Option<f32>, _>(idx)).map_or(Value::Null, |v| json!(v)),
        "DOUBLE" => opt(row.try_get::<Option<f64>, _>(idx)).map_or(Value::Null, |v| json!(v)),
        "DECIMAL" => opt(row.try_get::<Option<sqlx::types::Decimal>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "JSON" => opt(row.try_get::<Option<Value>, _>(idx)).unwrap_or(Value::Null),
        "TIMESTAMP" => opt(row
            .try_get::<Option<sqlx::types::chrono::DateTime<sqlx::types::chrono::Utc>>, _>(idx))
        .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        "DATETIME" => opt(row.try_get::<Option<sqlx::types::chrono::NaiveDateTime>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "DATE" => opt(row.try_get::<Option<sqlx::types::chrono::NaiveDate>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "TIME" => opt(row.try_get::<Option<sqlx::types::chrono::NaiveTime>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "VARBINARY" | "BINARY" => {
            opt(row.try_get::<Option<Vec<u8>>, _>(idx))
                .map_or(Value::Null, |v| Value::String(format!("0x{}", hex::encode(v))))
        }
        // VARCHAR, TEXT, CHAR, ENUM, and anything else with a textual decode.
        _ => opt(row.try_get::<Option<String>, _>(idx)).map_or(Value::Null, Value::String),
    }
}

fn opt<T>(res: Result<Option<T>, sqlx::Error>) -> Option<T> {
    res.ok().flatten()
}

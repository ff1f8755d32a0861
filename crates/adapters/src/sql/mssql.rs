//! Microsoft SQL Server adapter (TDS via tiberius).
//!
//! Table discovery spans all non-system schemas and reports
//! `schema.table` qualified names, since SQL Server has no single default
//! user schema the way Postgres has `public`.

use super::{CONNECT_TIMEOUT, STATEMENT_TIMEOUT, SqlDialect, SqlToolPlan, plan_tool};
use crate::contracts::{ServiceAdapter, ServiceConfig, ServiceKind, ToolDef, ToolOutcome};
use crate::error::AdapterError;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql as _, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt as _};

type MssqlClient = Client<Compat<TcpStream>>;

pub struct MssqlAdapter {
    tools: Vec<ToolDef>,
}

impl MssqlAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: super::sql_tool_defs("SQL Server"),
        }
    }
}

impl Default for MssqlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for MssqlAdapter {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Mssql
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
    let plan = plan_tool(SqlDialect::Mssql, tool, args)?;

    let mut client = connect(config).await?;
    let result = execute(&mut client, plan).await;
    // tiberius has no explicit close; dropping the client tears down the
    // socket. Dropping here keeps the release path on every outcome.
    drop(client);
    result
}

async fn connect(config: &ServiceConfig) -> Result<MssqlClient, AdapterError> {
    let port: u16 = match config.get("port") {
        Some(raw) => raw
            .parse()
            .map_err(|_| AdapterError::Config(format!("invalid port '{raw}'")))?,
        None => 1433,
    };

    let mut tds = Config::new();
    tds.host(config.require("host")?);
    tds.port(port);
    tds.database(config.require("database")?);
    tds.authentication(AuthMethod::sql_server(
        config.require("username")?,
        config.get("password").unwrap_or_default(),
    ));
    if config.flag("ssl") {
        tds.encryption(EncryptionLevel::Required);
        // Managed SQL instances routinely present self-signed chains.
        tds.trust_cert();
    } else {
        tds.encryption(EncryptionLevel::NotSupported);
    }

    let tcp = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(tds.get_addr())).await
    {
        Ok(Ok(tcp)) => tcp,
        Ok(Err(e)) => return Err(AdapterError::Connect(e.to_string())),
        Err(_) => {
            return Err(AdapterError::Connect(format!(
                "connect timed out after {}s",
                CONNECT_TIMEOUT.as_secs()
            )));
        }
    };
    tcp.set_nodelay(true)
        .map_err(|e| AdapterError::Connect(e.to_string()))?;

    match tokio::time::timeout(CONNECT_TIMEOUT, Client::connect(tds, tcp.compat_write())).await {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(e)) => Err(AdapterError::Connect(e.to_string())),
        Err(_) => Err(AdapterError::Connect(format!(
            "handshake timed out after {}s",
            CONNECT_TIMEOUT.as_secs()
        ))),
    }
}

async fn execute(client: &mut MssqlClient, plan: SqlToolPlan) -> Result<Value, AdapterError> {
    match plan {
        SqlToolPlan::ListTables => {
            let rows = fetch_all(
                client,
                "SELECT TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA NOT IN ('sys') \
                 ORDER BY TABLE_SCHEMA, TABLE_NAME",
                &[],
            )
            .await?;
            let tables: Vec<String> = rows
                .iter()
                .filter_map(|row| {
                    let schema: &str = row.try_get(0).ok().flatten()?;
                    let table: &str = row.try_get(1).ok().flatten()?;
                    Some(format!("{schema}.{table}"))
                })
                .collect();
            Ok(json!({ "tables": tables }))
        }
        SqlToolPlan::DescribeTable { qualified } => {
            let rows = match qualified.split_once('.') {
                Some((schema, table)) => {
                    fetch_all(
                        client,
                        "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, \
                         CHARACTER_MAXIMUM_LENGTH FROM INFORMATION_SCHEMA.COLUMNS \
                         WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
                         ORDER BY ORDINAL_POSITION",
                        &[&schema, &table],
                    )
                    .await?
                }
                None => {
                    fetch_all(
                        client,
                        "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, \
                         CHARACTER_MAXIMUM_LENGTH FROM INFORMATION_SCHEMA.COLUMNS \
                         WHERE TABLE_NAME = @P1 ORDER BY ORDINAL_POSITION",
                        &[&qualified.as_str()],
                    )
                    .await?
                }
            };
            if rows.is_empty() {
                return Err(AdapterError::Upstream(format!(
                    "Table '{qualified}' not found"
                )));
            }
            Ok(json!({ "columns": rows_to_json(rows) }))
        }
        SqlToolPlan::QueryTable(built) => {
            let owned = owned_params(&built.params);
            let refs: Vec<&dyn ToSql> = owned.iter().map(|p| p as &dyn ToSql).collect();
            let rows = fetch_all(client, &built.sql, &refs).await?;
            let count = rows.len();
            Ok(json!({ "rows": rows_to_json(rows), "row_count": count }))
        }
        SqlToolPlan::ExecuteSql(sql) => {
            let rows = fetch_all(client, &sql, &[]).await?;
            let count = rows.len();
            Ok(json!({ "rows": rows_to_json(rows), "row_count": count }))
        }
    }
}

/// JSON scalars as owned TDS parameters.
enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ToSql for Param {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Param::Bool(b) => b.to_sql(),
            Param::Int(i) => i.to_sql(),
            Param::Float(f) => f.to_sql(),
            Param::Text(s) => s.to_sql(),
        }
    }
}

fn owned_params(values: &[Value]) -> Vec<Param> {
    values
        .iter()
        .map(|v| match v {
            Value::Bool(b) => Param::Bool(*b),
            Value::Number(n) if n.is_i64() => Param::Int(n.as_i64().unwrap_or_default()),
            Value::Number(n) => Param::Float(n.as_f64().unwrap_or_default()),
            other => Param::Text(other.as_str().unwrap_or_default().to_string()),
        })
        .collect()
}

async fn fetch_all(
    client: &mut MssqlClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<tiberius::Row>, AdapterError> {
    let fut = async {
        let stream = client.query(sql, params).await?;
        stream.into_first_result().await
    };
    match tokio::time::timeout(STATEMENT_TIMEOUT, fut).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(e)) => Err(AdapterError::Upstream(format!("SQL Server error: {e}"))),
        Err(_) => Err(AdapterError::Timeout(STATEMENT_TIMEOUT.as_secs())),
    }
}

fn rows_to_json(rows: Vec<tiberius::Row>) -> Vec<Value> {
    rows.into_iter().map(row_to_json).collect()
}

fn row_to_json(row: tiberius::Row) -> Value {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let mut obj = Map::new();
    for (name, data) in names.into_iter().zip(row.into_iter()) {
        obj.insert(name, cell_to_json(&data));
    }
    Value::Object(obj)
}

fn cell_to_json(data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::U8(v) => v.map_or(Value::Null, |x| json!(x)),
        ColumnData::I16(v) => v.map_or(Value::Null, |x| json!(x)),
        ColumnData::I32(v) => v.map_or(Value::Null, |x| json!(x)),
        ColumnData::I64(v) => v.map_or(Value::Null, |x| json!(x)),
        ColumnData::F32(v) => v.map_or(Value::Null, |x| json!(x)),
        ColumnData::F64(v) => v.map_or(Value::Null, |x| json!(x)),
        ColumnData::String(v) => v
            .as_ref()
            .map_or(Value::Null, |s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.map_or(Value::Null, |g| Value::String(g.to_string())),
        ColumnData::Numeric(v) => v.map_or(Value::Null, |n| {
            let scaled = n.value() as f64 / 10f64.powi(i32::from(n.scale()));
            serde_json::Number::from_f64(scaled).map_or(Value::Null, Value::Number)
        }),
        ColumnData::Binary(v) => v
            .as_ref()
            .map_or(Value::Null, |b| Value::String(format!("0x{}", hex::encode(b.as_ref())))),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(data)
                .ok()
                .flatten()
                .map_or(Value::Null, |d| Value::String(d.to_string()))
        }
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .map_or(Value::Null, |d| Value::String(d.to_string())),
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map_or(Value::Null, |t| Value::String(t.to_string())),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::Utc>::from_sql(data)
            .ok()
            .flatten()
            .map_or(Value::Null, |d| Value::String(d.to_rfc3339())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map_or(Value::Null, |x| Value::String(x.to_string())),
    }
}

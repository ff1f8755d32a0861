//! Adapter capability contracts.
//!
//! Every supported service implements the same capability set: a static
//! tool list and a `handle` entry point taking the decrypted credential
//! config. The gateway selects an adapter through the registry by the
//! endpoint's service kind; the registry is built once at startup.

use crate::error::AdapterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Closed set of upstream services the gateway can front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Postgres,
    Mysql,
    Mssql,
    Supabase,
    Stripe,
    Mixpanel,
}

impl ServiceKind {
    #[must_use]
    pub fn as_slug(self) -> &'static str {
        match self {
            ServiceKind::Postgres => "postgres",
            ServiceKind::Mysql => "mysql",
            ServiceKind::Mssql => "mssql",
            ServiceKind::Supabase => "supabase",
            ServiceKind::Stripe => "stripe",
            ServiceKind::Mixpanel => "mixpanel",
        }
    }

    #[must_use]
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "postgres" | "postgresql" => Some(ServiceKind::Postgres),
            "mysql" => Some(ServiceKind::Mysql),
            "mssql" | "sqlserver" => Some(ServiceKind::Mssql),
            "supabase" => Some(ServiceKind::Supabase),
            "stripe" => Some(ServiceKind::Stripe),
            "mixpanel" => Some(ServiceKind::Mixpanel),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_slug())
    }
}

/// Decrypted credential config: field name to plaintext value.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    fields: HashMap<String, String>,
}

impl ServiceConfig {
    #[must_use]
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, AdapterError> {
        self.get(key).ok_or_else(|| AdapterError::missing_field(key))
    }

    /// Truthy checkbox semantics: `true` / `1` / `on` (case-insensitive).
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).unwrap_or_default().to_ascii_lowercase().as_str(),
            "true" | "1" | "on"
        )
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// A tool exposed to MCP clients: name, description, JSON-Schema input.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDef {
    /// MCP `tools/list` wire shape.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// Result of one tool invocation.
///
/// `Err` is a *tool-level* failure (driver error, upstream 4xx/5xx, guard
/// rejection): the dispatcher turns it into a successful JSON-RPC reply
/// carrying `isError: true`, per MCP convention. Infrastructure faults
/// (decrypt failure, unknown service) never reach this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok(Value),
    Err(String),
}

impl ToolOutcome {
    pub fn err(msg: impl Into<String>) -> Self {
        Self::Err(msg.into())
    }

    #[must_use]
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }
}

impl From<Result<Value, AdapterError>> for ToolOutcome {
    fn from(value: Result<Value, AdapterError>) -> Self {
        match value {
            Ok(v) => ToolOutcome::Ok(v),
            Err(e) => ToolOutcome::Err(e.to_string()),
        }
    }
}

/// One upstream service's implementation of the fixed capability set.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// Static tool definitions for `tools/list`.
    fn tools(&self) -> &[ToolDef];

    /// Credential fields that must be present before any tool can run.
    /// Checked by the dispatcher after decryption; a gap is a
    /// configuration fault, not a tool error.
    fn required_fields(&self) -> &'static [&'static str];

    /// Cheapest tool + args for the credential test-connection path.
    fn probe(&self) -> (&'static str, Value) {
        ("list_tables", json!({}))
    }

    /// Run one tool. Never panics and never errors across this boundary.
    async fn handle(&self, tool: &str, args: &Value, config: &ServiceConfig) -> ToolOutcome;
}

/// Service-slug to adapter mapping, constructed once at startup.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ServiceKind, Arc<dyn ServiceAdapter>>,
}

impl AdapterRegistry {
    /// Registry with every supported service wired in.
    #[must_use]
    pub fn standard() -> Self {
        let adapters: Vec<Arc<dyn ServiceAdapter>> = vec![
            Arc::new(crate::sql::postgres::PostgresAdapter::new()),
            Arc::new(crate::sql::mysql::MysqlAdapter::new()),
            Arc::new(crate::sql::mssql::MssqlAdapter::new()),
            Arc::new(crate::supabase::SupabaseAdapter::new()),
            Arc::new(crate::stripe::StripeAdapter::new()),
            Arc::new(crate::mixpanel::MixpanelAdapter::new()),
        ];
        Self {
            adapters: adapters.into_iter().map(|a| (a.kind(), a)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, kind: ServiceKind) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_roundtrip() {
        for kind in [
            ServiceKind::Postgres,
            ServiceKind::Mysql,
            ServiceKind::Mssql,
            ServiceKind::Supabase,
            ServiceKind::Stripe,
            ServiceKind::Mixpanel,
        ] {
            assert_eq!(ServiceKind::from_slug(kind.as_slug()), Some(kind));
        }
        assert_eq!(ServiceKind::from_slug("postgresql"), Some(ServiceKind::Postgres));
        assert_eq!(ServiceKind::from_slug("oracle"), None);
    }

    #[test]
    fn registry_covers_every_service() {
        let registry = AdapterRegistry::standard();
        for kind in [
            ServiceKind::Postgres,
            ServiceKind::Mysql,
            ServiceKind::Mssql,
            ServiceKind::Supabase,
            ServiceKind::Stripe,
            ServiceKind::Mixpanel,
        ] {
            let adapter = registry.get(kind).expect("adapter registered");
            assert_eq!(adapter.kind(), kind);
            assert!(!adapter.tools().is_empty());
            let (probe_tool, _) = adapter.probe();
            assert!(
                adapter.tools().iter().any(|t| t.name == probe_tool),
                "{kind}: probe tool must be part of the declared tool set"
            );
        }
    }

    #[test]
    fn config_flag_truthiness() {
        let cfg = ServiceConfig::new(
            [
                ("a".to_string(), "true".to_string()),
                ("b".to_string(), "1".to_string()),
                ("c".to_string(), "on".to_string()),
                ("d".to_string(), "false".to_string()),
                ("e".to_string(), String::new()),
            ]
            .into(),
        );
        assert!(cfg.flag("a"));
        assert!(cfg.flag("b"));
        assert!(cfg.flag("c"));
        assert!(!cfg.flag("d"));
        assert!(!cfg.flag("e"));
        assert!(!cfg.flag("missing"));
    }

    #[test]
    fn config_require_reports_field_name() {
        let cfg = ServiceConfig::default();
        let err = cfg.require("host").unwrap_err();
        assert!(err.to_string().contains("host"));
    }
}

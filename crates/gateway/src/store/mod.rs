//! Metadata store interface.
//!
//! The gateway consumes the tenant metadata schema through this narrow
//! trait; it never owns the schema. All reads run under an elevated
//! principal that bypasses tenant row filters, which makes
//! [`MetadataStore::resolve_endpoint`] the only authorization boundary on
//! the request path.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portway_adapters::ServiceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A row references a service slug the gateway does not support.
    /// Surfaces as a configuration fault, not a not-found.
    #[error("unsupported service '{0}'")]
    UnknownService(String),
    #[error("malformed row: {0}")]
    Malformed(String),
}

/// Subscription plan tiers, as stored on the organization row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Team,
    Lifetime,
}

impl Plan {
    #[must_use]
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "free" => Some(Plan::Free),
            "starter" => Some(Plan::Starter),
            "pro" => Some(Plan::Pro),
            "team" => Some(Plan::Team),
            "lifetime" => Some(Plan::Lifetime),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_slug(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Team => "team",
            Plan::Lifetime => "lifetime",
        }
    }

    /// Per-day request ceiling; `None` means unlimited.
    #[must_use]
    pub fn daily_request_limit(self) -> Option<i64> {
        match self {
            Plan::Free => Some(100),
            Plan::Starter | Plan::Lifetime => Some(10_000),
            Plan::Pro => Some(100_000),
            Plan::Team => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Trialing,
    Incomplete,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "active" => Some(Self::Active),
            "canceled" => Some(Self::Canceled),
            "past_due" => Some(Self::PastDue),
            "trialing" => Some(Self::Trialing),
            "incomplete" => Some(Self::Incomplete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub external_sub_id: Option<String>,
}

impl SubscriptionRecord {
    /// Paid billing is in force; trial metering does not apply.
    #[must_use]
    pub fn is_active_paid(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// One entry of a service's field schema. The gateway only acts on
/// `encrypted`; the rest is dashboard form metadata carried opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub encrypted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Password,
    Url,
    Checkbox,
}

#[must_use]
pub fn encrypted_field_names(schema: &[FieldSpec]) -> HashSet<String> {
    schema
        .iter()
        .filter(|f| f.encrypted)
        .map(|f| f.key.clone())
        .collect()
}

#[derive(Debug, Clone)]
pub struct EndpointRecord {
    pub id: Uuid,
    /// Opaque public identifier in the gateway URL; knowledge of it
    /// authorizes use of the bound credential.
    pub public_id: String,
    pub service: ServiceKind,
    pub active: bool,
    /// When set, only these tool names are listed and callable.
    pub allowed_tools: Option<Vec<String>>,
    /// Per-minute admission ceiling; 0 means uncapped.
    pub rate_limit_per_minute: u32,
}

impl EndpointRecord {
    #[must_use]
    pub fn tool_allowed(&self, tool: &str) -> bool {
        match &self.allowed_tools {
            Some(allowed) => allowed.iter().any(|t| t == tool),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub service: ServiceKind,
    pub name: String,
    /// Field name to stored value; encrypted fields hold sealed envelopes.
    pub config: HashMap<String, String>,
    pub trial_queries_used: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct OrganizationRef {
    pub id: Uuid,
    pub plan: Plan,
}

/// Everything the dispatcher needs, fetched atomically with the endpoint.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub endpoint: EndpointRecord,
    pub credential: CredentialRecord,
    pub organization: OrganizationRef,
    pub field_schema: Vec<FieldSpec>,
}

/// Credential-keyed lookup for the test-connection path.
#[derive(Debug, Clone)]
pub struct CredentialWithSchema {
    pub credential: CredentialRecord,
    pub organization: OrganizationRef,
    pub field_schema: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    Success,
    Error,
}

impl UsageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UsageStatus::Success => "success",
            UsageStatus::Error => "error",
        }
    }
}

/// Append-only usage log entry. `request_args` must already be redacted.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub organization_id: Uuid,
    pub credential_id: Uuid,
    pub service: ServiceKind,
    pub tool: String,
    pub request_args: Value,
    pub status: UsageStatus,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Result of the trial-counter compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Updated(i32),
    /// The stored value moved since it was read; the caller re-reads and
    /// retries (at most once).
    Conflict,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Endpoint, bound credential, owning organization, and the service
    /// field schema in one atomic read. `None` when the public id does not
    /// resolve or the credential row is gone.
    async fn resolve_endpoint(
        &self,
        public_id: &str,
    ) -> Result<Option<ResolvedEndpoint>, StoreError>;

    async fn lookup_credential(
        &self,
        credential_id: Uuid,
    ) -> Result<Option<CredentialWithSchema>, StoreError>;

    async fn lookup_subscription(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    async fn count_requests_since(
        &self,
        organization_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Compare-and-swap increment of the per-credential trial counter.
    /// Never a blind read-modify-write: two concurrent test connections
    /// must not both squeeze past the cap.
    async fn increment_trial_counter(
        &self,
        credential_id: Uuid,
        expected: i32,
    ) -> Result<CasOutcome, StoreError>;

    /// Advisory telemetry; failures are logged, never surfaced.
    async fn append_usage(&self, record: UsageRecord) -> Result<(), StoreError>;

    /// Advisory `last_accessed_at` touch.
    async fn touch_endpoint(
        &self,
        endpoint_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

//! sqlx-backed metadata store.
//!
//! Connects with the elevated gateway principal; row-level security on the
//! tenant tables does not apply here, so every query must key on the exact
//! identifiers handed in by the caller.

use super::{
    CasOutcome, CredentialRecord, CredentialWithSchema, EndpointRecord, FieldSpec, MetadataStore,
    OrganizationRef, Plan, ResolvedEndpoint, StoreError, SubscriptionRecord, SubscriptionStatus,
    UsageRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portway_adapters::ServiceKind;
use sqlx::PgPool;
use sqlx::Row as _;
use sqlx::postgres::PgRow;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn service_kind(slug: &str) -> Result<ServiceKind, StoreError> {
    ServiceKind::from_slug(slug).ok_or_else(|| StoreError::UnknownService(slug.to_string()))
}

fn plan(slug: &str) -> Result<Plan, StoreError> {
    Plan::from_slug(slug).ok_or_else(|| StoreError::Malformed(format!("unknown plan '{slug}'")))
}

fn config_map(value: serde_json::Value) -> Result<HashMap<String, String>, StoreError> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Malformed(format!("credential config is not a string map: {e}")))
}

fn field_schema(value: Option<serde_json::Value>) -> Result<Vec<FieldSpec>, StoreError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v)
            .map_err(|e| StoreError::Malformed(format!("invalid service field schema: {e}"))),
    }
}

fn resolved_from_row(row: &PgRow) -> Result<ResolvedEndpoint, StoreError> {
    let service: String = row.try_get("service")?;
    let service = service_kind(&service)?;
    let plan_slug: String = row.try_get("plan")?;
    let organization_id: Uuid = row.try_get("organization_id")?;

    let allowed_tools: Option<serde_json::Value> = row.try_get("allowed_tools")?;
    let allowed_tools = match allowed_tools {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(serde_json::from_value::<Vec<String>>(v).map_err(|e| {
            StoreError::Malformed(format!("allowed_tools is not a string array: {e}"))
        })?),
    };

    let rate_limit: i32 = row.try_get("rate_limit_per_minute")?;

    Ok(ResolvedEndpoint {
        endpoint: EndpointRecord {
            id: row.try_get("endpoint_row_id")?,
            public_id: row.try_get("endpoint_id")?,
            service,
            active: row.try_get("is_active")?,
            allowed_tools,
            rate_limit_per_minute: u32::try_from(rate_limit.max(0)).unwrap_or(0),
        },
        credential: CredentialRecord {
            id: row.try_get("credential_id")?,
            organization_id,
            service,
            name: row.try_get("credential_name")?,
            config: config_map(row.try_get("config")?)?,
            trial_queries_used: row.try_get("trial_queries_used")?,
        },
        organization: OrganizationRef {
            id: organization_id,
            plan: plan(&plan_slug)?,
        },
        field_schema: field_schema(row.try_get("fields")?)?,
    })
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn resolve_endpoint(
        &self,
        public_id: &str,
    ) -> Result<Option<ResolvedEndpoint>, StoreError> {
        let row = sqlx::query(
            r"
select e.id as endpoint_row_id,
       e.endpoint_id,
       e.service,
       e.is_active,
       e.allowed_tools,
       e.rate_limit_per_minute,
       c.id as credential_id,
       c.organization_id,
       c.name as credential_name,
       c.config,
       c.trial_queries_used,
       o.plan,
       s.fields
from mcp_endpoints e
join credentials c on c.id = e.credential_id
join organizations o on o.id = c.organization_id
left join supported_services s on s.service = e.service
where e.endpoint_id = $1
",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(resolved_from_row).transpose()
    }

    async fn lookup_credential(
        &self,
        credential_id: Uuid,
    ) -> Result<Option<CredentialWithSchema>, StoreError> {
        let row = sqlx::query(
            r"
select c.id as credential_id,
       c.organization_id,
       c.service,
       c.name as credential_name,
       c.config,
       c.trial_queries_used,
       o.plan,
       s.fields
from credentials c
join organizations o on o.id = c.organization_id
left join supported_services s on s.service = c.service
where c.id = $1
",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let service: String = row.try_get("service")?;
        let service = service_kind(&service)?;
        let plan_slug: String = row.try_get("plan")?;
        let organization_id: Uuid = row.try_get("organization_id")?;

        Ok(Some(CredentialWithSchema {
            credential: CredentialRecord {
                id: row.try_get("credential_id")?,
                organization_id,
                service,
                name: row.try_get("credential_name")?,
                config: config_map(row.try_get("config")?)?,
                trial_queries_used: row.try_get("trial_queries_used")?,
            },
            organization: OrganizationRef {
                id: organization_id,
                plan: plan(&plan_slug)?,
            },
            field_schema: field_schema(row.try_get("fields")?)?,
        }))
    }

    async fn lookup_subscription(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row = sqlx::query(
            r"
select plan, status, external_subscription_id
from subscriptions
where organization_id = $1
order by created_at desc
limit 1
",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let plan_slug: String = row.try_get("plan")?;
        let status_slug: String = row.try_get("status")?;
        let status = SubscriptionStatus::from_slug(&status_slug).ok_or_else(|| {
            StoreError::Malformed(format!("unknown subscription status '{status_slug}'"))
        })?;

        Ok(Some(SubscriptionRecord {
            plan: plan(&plan_slug)?,
            status,
            external_sub_id: row.try_get("external_subscription_id")?,
        }))
    }

    async fn count_requests_since(
        &self,
        organization_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "select count(*) as n from usage_logs where organization_id = $1 and created_at >= $2",
        )
        .bind(organization_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    async fn increment_trial_counter(
        &self,
        credential_id: Uuid,
        expected: i32,
    ) -> Result<CasOutcome, StoreError> {
        // Predicated UPDATE, not select-then-update: the WHERE clause is
        // the compare half of the CAS.
        let row = sqlx::query(
            r"
update credentials
set trial_queries_used = trial_queries_used + 1
where id = $1 and trial_queries_used = $2
returning trial_queries_used
",
        )
        .bind(credential_id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(CasOutcome::Updated(row.try_get("trial_queries_used")?)),
            None => Ok(CasOutcome::Conflict),
        }
    }

    async fn append_usage(&self, record: UsageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
insert into usage_logs
    (organization_id, credential_id, service, tool, request_args, status, error, duration_ms, created_at)
values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
",
        )
        .bind(record.organization_id)
        .bind(record.credential_id)
        .bind(record.service.as_slug())
        .bind(&record.tool)
        .bind(&record.request_args)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.duration_ms)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_endpoint(
        &self,
        endpoint_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("update mcp_endpoints set last_accessed_at = $2 where id = $1")
            .bind(endpoint_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

//! In-memory metadata store.
//!
//! Backs the test suite and local development without a Postgres
//! instance. Semantics mirror `PgMetadataStore`, including the
//! compare-and-swap on the trial counter.

use super::{
    CasOutcome, CredentialRecord, CredentialWithSchema, EndpointRecord, FieldSpec, MetadataStore,
    OrganizationRef, ResolvedEndpoint, StoreError, SubscriptionRecord, UsageRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    /// public endpoint id -> (endpoint meta, credential row id)
    endpoints: HashMap<String, (EndpointRecord, Uuid)>,
    credentials: HashMap<Uuid, (CredentialRecord, OrganizationRef, Vec<FieldSpec>)>,
    subscriptions: HashMap<Uuid, SubscriptionRecord>,
    usage: Vec<UsageRecord>,
    touches: HashMap<Uuid, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_credential(
        &self,
        credential: CredentialRecord,
        organization: OrganizationRef,
        field_schema: Vec<FieldSpec>,
    ) {
        self.inner
            .lock()
            .credentials
            .insert(credential.id, (credential, organization, field_schema));
    }

    pub fn add_endpoint(&self, endpoint: EndpointRecord, credential_id: Uuid) {
        self.inner
            .lock()
            .endpoints
            .insert(endpoint.public_id.clone(), (endpoint, credential_id));
    }

    pub fn set_subscription(&self, organization_id: Uuid, subscription: SubscriptionRecord) {
        self.inner
            .lock()
            .subscriptions
            .insert(organization_id, subscription);
    }

    /// Pre-seed usage entries, e.g. to place an organization at its cap.
    pub fn seed_usage(&self, records: impl IntoIterator<Item = UsageRecord>) {
        self.inner.lock().usage.extend(records);
    }

    #[must_use]
    pub fn usage_log(&self) -> Vec<UsageRecord> {
        self.inner.lock().usage.clone()
    }

    #[must_use]
    pub fn trial_queries_used(&self, credential_id: Uuid) -> Option<i32> {
        self.inner
            .lock()
            .credentials
            .get(&credential_id)
            .map(|(c, _, _)| c.trial_queries_used)
    }

    #[must_use]
    pub fn last_touched(&self, endpoint_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.lock().touches.get(&endpoint_id).copied()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn resolve_endpoint(
        &self,
        public_id: &str,
    ) -> Result<Option<ResolvedEndpoint>, StoreError> {
        let inner = self.inner.lock();
        let Some((endpoint, credential_id)) = inner.endpoints.get(public_id) else {
            return Ok(None);
        };
        // Fail closed when the bound credential row is gone.
        let Some((credential, organization, schema)) = inner.credentials.get(credential_id) else {
            return Ok(None);
        };
        Ok(Some(ResolvedEndpoint {
            endpoint: endpoint.clone(),
            credential: credential.clone(),
            organization: *organization,
            field_schema: schema.clone(),
        }))
    }

    async fn lookup_credential(
        &self,
        credential_id: Uuid,
    ) -> Result<Option<CredentialWithSchema>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .credentials
            .get(&credential_id)
            .map(|(credential, organization, schema)| CredentialWithSchema {
                credential: credential.clone(),
                organization: *organization,
                field_schema: schema.clone(),
            }))
    }

    async fn lookup_subscription(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(self.inner.lock().subscriptions.get(&organization_id).cloned())
    }

    async fn count_requests_since(
        &self,
        organization_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .usage
            .iter()
            .filter(|r| r.organization_id == organization_id && r.created_at >= since)
            .count() as i64)
    }

    async fn increment_trial_counter(
        &self,
        credential_id: Uuid,
        expected: i32,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let Some((credential, _, _)) = inner.credentials.get_mut(&credential_id) else {
            return Ok(CasOutcome::Conflict);
        };
        if credential.trial_queries_used != expected {
            return Ok(CasOutcome::Conflict);
        }
        credential.trial_queries_used += 1;
        Ok(CasOutcome::Updated(credential.trial_queries_used))
    }

    async fn append_usage(&self, record: UsageRecord) -> Result<(), StoreError> {
        self.inner.lock().usage.push(record);
        Ok(())
    }

    async fn touch_endpoint(
        &self,
        endpoint_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.lock().touches.insert(endpoint_id, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Plan;
    use portway_adapters::ServiceKind;

    fn fixture(store: &MemoryStore) -> (Uuid, Uuid) {
        let org = OrganizationRef {
            id: Uuid::new_v4(),
            plan: Plan::Free,
        };
        let credential = CredentialRecord {
            id: Uuid::new_v4(),
            organization_id: org.id,
            service: ServiceKind::Postgres,
            name: "primary db".to_string(),
            config: HashMap::new(),
            trial_queries_used: 0,
        };
        let endpoint = EndpointRecord {
            id: Uuid::new_v4(),
            public_id: "abcdefghijklmnopqrstuv".to_string(),
            service: ServiceKind::Postgres,
            active: true,
            allowed_tools: None,
            rate_limit_per_minute: 60,
        };
        let credential_id = credential.id;
        let endpoint_id = endpoint.id;
        store.add_credential(credential, org, Vec::new());
        store.add_endpoint(endpoint, credential_id);
        (endpoint_id, credential_id)
    }

    #[tokio::test]
    async fn resolve_joins_endpoint_and_credential() {
        let store = MemoryStore::new();
        let (_, credential_id) = fixture(&store);

        let resolved = store
            .resolve_endpoint("abcdefghijklmnopqrstuv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.credential.id, credential_id);
        assert!(resolved.endpoint.active);

        assert!(store.resolve_endpoint("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trial_cas_detects_stale_reads() {
        let store = MemoryStore::new();
        let (_, credential_id) = fixture(&store);

        assert_eq!(
            store.increment_trial_counter(credential_id, 0).await.unwrap(),
            CasOutcome::Updated(1)
        );
        // A second writer holding the stale expectation loses.
        assert_eq!(
            store.increment_trial_counter(credential_id, 0).await.unwrap(),
            CasOutcome::Conflict
        );
        assert_eq!(store.trial_queries_used(credential_id), Some(1));
    }
}

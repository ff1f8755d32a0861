//! Shared fixture: a real gateway server on an ephemeral port, backed by
//! the in-memory metadata store.
#![allow(dead_code)]

use portway_adapters::ServiceKind;
use portway_gateway::config::GatewayConfig;
use portway_gateway::secrets_crypto::SecretsCipher;
use portway_gateway::store::memory::MemoryStore;
use portway_gateway::store::{
    CredentialRecord, EndpointRecord, FieldSpec, OrganizationRef, Plan,
};
use portway_gateway::usage::UsageSink;
use portway_gateway::{AppState, edge};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const MASTER_KEY: [u8; 32] = [0x42; 32];

pub struct TestGateway {
    pub base_url: String,
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
    pub http: reqwest::Client,
    pub shutdown: CancellationToken,
}

pub struct EndpointFixture {
    pub public_id: String,
    pub organization_id: Uuid,
    pub credential_id: Uuid,
    pub endpoint_row_id: Uuid,
}

/// Seeding options for one endpoint + credential pair.
pub struct Seed {
    pub public_id: &'static str,
    pub plan: Plan,
    pub active: bool,
    pub allowed_tools: Option<Vec<String>>,
    pub rate_limit_per_minute: u32,
    pub trial_queries_used: i32,
}

impl Default for Seed {
    fn default() -> Self {
        Self {
            public_id: "abcdefghijklmnopqrstuv",
            plan: Plan::Free,
            active: true,
            allowed_tools: None,
            rate_limit_per_minute: 0,
            trial_queries_used: 0,
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl TestGateway {
    pub async fn start() -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let cipher = SecretsCipher::from_key(MASTER_KEY);
        let shutdown = CancellationToken::new();
        let (usage, _worker) = UsageSink::spawn(store.clone(), shutdown.clone());

        let state = Arc::new(AppState::new(
            GatewayConfig::for_tests(),
            store.clone(),
            cipher,
            usage,
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = edge::router(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let base_url = format!("http://{addr}");
        portway_test_support::wait_http_ok(&format!("{base_url}/healthz"), Duration::from_secs(5))
            .await?;

        Ok(Self {
            base_url,
            store,
            state,
            http: reqwest::Client::new(),
            shutdown,
        })
    }

    pub fn seal(&self, plaintext: &str) -> String {
        self.state.cipher.seal(plaintext).expect("seal test secret")
    }

    /// Seed a PostgreSQL endpoint whose upstream is unreachable fast
    /// (127.0.0.1:1), so connection-level failures stay cheap and offline.
    pub fn seed_postgres(&self, seed: Seed) -> EndpointFixture {
        let organization = OrganizationRef {
            id: Uuid::new_v4(),
            plan: seed.plan,
        };
        let config: HashMap<String, String> = [
            ("host".to_string(), "127.0.0.1".to_string()),
            ("port".to_string(), "1".to_string()),
            ("database".to_string(), "app".to_string()),
            ("username".to_string(), "svc".to_string()),
            ("password".to_string(), self.seal("hunter2")),
            ("ssl".to_string(), "false".to_string()),
        ]
        .into();

        let credential = CredentialRecord {
            id: Uuid::new_v4(),
            organization_id: organization.id,
            service: ServiceKind::Postgres,
            name: "test database".to_string(),
            config,
            trial_queries_used: seed.trial_queries_used,
        };
        let endpoint = EndpointRecord {
            id: Uuid::new_v4(),
            public_id: seed.public_id.to_string(),
            service: ServiceKind::Postgres,
            active: seed.active,
            allowed_tools: seed.allowed_tools,
            rate_limit_per_minute: seed.rate_limit_per_minute,
        };

        let fixture = EndpointFixture {
            public_id: endpoint.public_id.clone(),
            organization_id: organization.id,
            credential_id: credential.id,
            endpoint_row_id: endpoint.id,
        };
        self.store
            .add_credential(credential, organization, postgres_field_schema());
        self.store.add_endpoint(endpoint, fixture.credential_id);
        fixture
    }

    pub async fn rpc(&self, endpoint_id: &str, body: Value) -> (reqwest::StatusCode, Value) {
        let resp = self
            .http
            .post(format!("{}/gateway/{endpoint_id}", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("gateway reachable");
        let status = resp.status();
        let body = if status == reqwest::StatusCode::NO_CONTENT {
            Value::Null
        } else {
            resp.json().await.expect("json reply")
        };
        (status, body)
    }
}

pub fn postgres_field_schema() -> Vec<FieldSpec> {
    serde_json::from_value(serde_json::json!([
        { "key": "host", "type": "text", "required": true },
        { "key": "port", "type": "text" },
        { "key": "database", "type": "text", "required": true },
        { "key": "username", "type": "text", "required": true },
        { "key": "password", "type": "password", "required": true, "encrypted": true },
        { "key": "ssl", "type": "checkbox" },
    ]))
    .expect("valid field schema fixture")
}

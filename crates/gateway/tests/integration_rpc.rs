//! End-to-end JSON-RPC behavior against a live in-process gateway.

mod common;

use common::{Seed, TestGateway, postgres_field_schema};
use portway_adapters::ServiceKind;
use portway_gateway::secrets_crypto::SecretsCipher;
use portway_gateway::store::{
    CredentialRecord, EndpointRecord, OrganizationRef, Plan, UsageRecord, UsageStatus,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

fn call(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

#[tokio::test]
async fn unknown_endpoint_returns_not_found() {
    let gw = TestGateway::start().await.unwrap();
    let (status, body) = gw
        .rpc("xyz", json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32001, "message": "Endpoint not found" },
        })
    );
}

#[tokio::test]
async fn initialize_handshake() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    let (status, body) = gw.rpc(&ep.public_id, call(1, "initialize", json!({}))).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert!(body["result"]["capabilities"]["tools"].is_object());
    assert_eq!(body["result"]["serverInfo"]["name"], "portway-gateway");
}

#[tokio::test]
async fn notifications_initialized_returns_no_content() {
    let gw = TestGateway::start().await.unwrap();
    let (status, body) = gw
        .rpc(
            "anything",
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
    assert_eq!(status, 204);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn ping_returns_empty_result() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());
    let (_, body) = gw.rpc(&ep.public_id, call(3, "ping", json!({}))).await;
    assert_eq!(body["result"], json!({}));
    assert_eq!(body["id"], 3);
}

#[tokio::test]
async fn envelope_faults_use_reserved_codes() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    // Parse error.
    let resp = gw
        .http
        .post(format!("{}/gateway/{}", gw.base_url, ep.public_id))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    // Wrong protocol version.
    let (_, body) = gw
        .rpc(&ep.public_id, json!({ "jsonrpc": "1.0", "id": 2, "method": "ping" }))
        .await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], 2, "id echoes even on invalid envelopes");

    // Unknown method.
    let (_, body) = gw
        .rpc(&ep.public_id, call(4, "resources/list", json!({})))
        .await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn tools_list_returns_the_sql_tool_set() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    let (_, body) = gw.rpc(&ep.public_id, call(5, "tools/list", json!({}))).await;
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["list_tables", "describe_table", "query_table", "execute_sql"]
    );
    for tool in body["result"]["tools"].as_array().unwrap() {
        assert!(tool["inputSchema"].is_object());
        assert!(tool["description"].is_string());
    }
}

#[tokio::test]
async fn allow_list_hides_and_blocks_excluded_tools() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed {
        allowed_tools: Some(vec!["list_tables".to_string(), "describe_table".to_string()]),
        ..Seed::default()
    });

    let (_, body) = gw.rpc(&ep.public_id, call(6, "tools/list", json!({}))).await;
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["list_tables", "describe_table"]);

    let (_, body) = gw
        .rpc(
            &ep.public_id,
            call(7, "tools/call", json!({ "name": "execute_sql", "arguments": { "sql": "SELECT 1" } })),
        )
        .await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn tools_call_param_faults() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    let (_, body) = gw.rpc(&ep.public_id, call(8, "tools/call", json!({}))).await;
    assert_eq!(body["error"]["code"], -32602);

    let (_, body) = gw
        .rpc(&ep.public_id, call(9, "tools/call", json!({ "name": "drop_tables" })))
        .await;
    assert_eq!(body["error"]["code"], -32601);
    assert!(body["error"]["message"].as_str().unwrap().contains("drop_tables"));
}

#[tokio::test]
async fn sql_guard_blocks_without_touching_the_upstream() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    let (_, body) = gw
        .rpc(
            &ep.public_id,
            call(
                10,
                "tools/call",
                json!({ "name": "execute_sql", "arguments": { "sql": "SELECT 1; DROP TABLE users" } }),
            ),
        )
        .await;

    // MCP convention: a tool failure is a successful JSON-RPC reply.
    assert!(body.get("error").is_none());
    assert_eq!(body["result"]["isError"], true);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("Multiple statements not allowed"), "{text}");

    // The failed call still lands in the usage log.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let log = gw.store.usage_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, UsageStatus::Error);
    assert_eq!(log[0].tool, "execute_sql");
}

#[tokio::test]
async fn inactive_endpoint_rejects_posts_and_probes() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed {
        active: false,
        ..Seed::default()
    });

    let (_, body) = gw.rpc(&ep.public_id, call(11, "tools/list", json!({}))).await;
    assert_eq!(body["error"]["code"], -32002);

    let resp = gw
        .http
        .get(format!("{}/gateway/{}", gw.base_url, ep.public_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn health_probe_reports_active_endpoints() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    let resp = gw
        .http
        .get(format!("{}/gateway/{}", gw.base_url, ep.public_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "postgres");
    assert_eq!(body["endpoint"], ep.public_id);

    let resp = gw
        .http
        .get(format!("{}/gateway/nope", gw.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn other_methods_are_rejected() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());
    let resp = gw
        .http
        .put(format!("{}/gateway/{}", gw.base_url, ep.public_id))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);
}

#[tokio::test]
async fn daily_quota_denies_before_the_upstream() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    // Free plan: place the organization exactly at its 100/day cap.
    let now = chrono::Utc::now();
    gw.store.seed_usage((0..100).map(|_| UsageRecord {
        organization_id: ep.organization_id,
        credential_id: ep.credential_id,
        service: ServiceKind::Postgres,
        tool: "list_tables".to_string(),
        request_args: json!({}),
        status: UsageStatus::Success,
        error: None,
        duration_ms: 3,
        created_at: now,
    }));

    let (_, body) = gw
        .rpc(
            &ep.public_id,
            call(12, "tools/call", json!({ "name": "execute_sql", "arguments": { "sql": "SELECT 1" } })),
        )
        .await;
    assert_eq!(body["error"]["code"], -32003);
    assert!(body["error"]["message"].as_str().unwrap().contains("Daily request limit"));

    // Denied calls are not logged as usage.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gw.store.usage_log().len(), 100);
}

#[tokio::test]
async fn per_minute_ceiling_denies_the_excess_call() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed {
        rate_limit_per_minute: 2,
        ..Seed::default()
    });

    let body = json!({ "name": "execute_sql", "arguments": { "sql": "DELETE FROM t" } });
    for id in [13, 14] {
        let (_, reply) = gw.rpc(&ep.public_id, call(id, "tools/call", body.clone())).await;
        assert_eq!(reply["result"]["isError"], true, "guard rejection, not quota");
    }
    let (_, reply) = gw.rpc(&ep.public_id, call(15, "tools/call", body)).await;
    assert_eq!(reply["error"]["code"], -32003);
    assert_eq!(reply["error"]["message"], "Rate limit exceeded");
}

#[tokio::test]
async fn undecryptable_credentials_ask_for_a_re_add() {
    let gw = TestGateway::start().await.unwrap();

    // Sealed under a different master key: parses as an envelope, fails
    // authentication.
    let foreign = SecretsCipher::from_key([0x43; 32]);
    let organization = OrganizationRef {
        id: Uuid::new_v4(),
        plan: Plan::Free,
    };
    let config: HashMap<String, String> = [
        ("host".to_string(), "127.0.0.1".to_string()),
        ("database".to_string(), "app".to_string()),
        ("username".to_string(), "svc".to_string()),
        ("password".to_string(), foreign.seal("pw").unwrap()),
    ]
    .into();
    let credential = CredentialRecord {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        service: ServiceKind::Postgres,
        name: "bad".to_string(),
        config,
        trial_queries_used: 0,
    };
    let endpoint = EndpointRecord {
        id: Uuid::new_v4(),
        public_id: "brokenbrokenbrokenbrok".to_string(),
        service: ServiceKind::Postgres,
        active: true,
        allowed_tools: None,
        rate_limit_per_minute: 0,
    };
    let credential_id = credential.id;
    gw.store
        .add_credential(credential, organization, postgres_field_schema());
    gw.store.add_endpoint(endpoint, credential_id);

    let (_, body) = gw
        .rpc(
            "brokenbrokenbrokenbrok",
            call(16, "tools/call", json!({ "name": "list_tables", "arguments": {} })),
        )
        .await;
    assert_eq!(body["error"]["code"], -32000);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("re-add credentials"), "{message}");
    assert!(!message.contains(':'), "no ciphertext fragments in the reply");
}

#[tokio::test]
async fn incomplete_credentials_are_a_config_fault() {
    let gw = TestGateway::start().await.unwrap();
    let organization = OrganizationRef {
        id: Uuid::new_v4(),
        plan: Plan::Free,
    };
    let credential = CredentialRecord {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        service: ServiceKind::Postgres,
        name: "incomplete".to_string(),
        config: [("host".to_string(), "127.0.0.1".to_string())].into(),
        trial_queries_used: 0,
    };
    let endpoint = EndpointRecord {
        id: Uuid::new_v4(),
        public_id: "incompleteincompletein".to_string(),
        service: ServiceKind::Postgres,
        active: true,
        allowed_tools: None,
        rate_limit_per_minute: 0,
    };
    let credential_id = credential.id;
    gw.store
        .add_credential(credential, organization, postgres_field_schema());
    gw.store.add_endpoint(endpoint, credential_id);

    let (_, body) = gw
        .rpc(
            "incompleteincompletein",
            call(17, "tools/call", json!({ "name": "list_tables", "arguments": {} })),
        )
        .await;
    assert_eq!(body["error"]["code"], -32000);
    assert!(body["error"]["message"].as_str().unwrap().contains("database"));
}

#[tokio::test]
async fn resolved_requests_touch_the_endpoint() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    let (_, _) = gw.rpc(&ep.public_id, call(18, "ping", json!({}))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gw.store.last_touched(ep.endpoint_row_id).is_some());
}

#[tokio::test]
async fn oversized_bodies_are_rejected_at_the_edge() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    let huge = "x".repeat(2 * 1024 * 1024);
    let resp = gw
        .http
        .post(format!("{}/gateway/{}", gw.base_url, ep.public_id))
        .header("content-type", "application/json")
        .body(huge)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
}

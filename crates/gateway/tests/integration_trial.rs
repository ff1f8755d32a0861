//! Test-connection path: trial metering and the CAS race.

mod common;

use common::{Seed, TestGateway};
use portway_gateway::quota::TRIAL_QUERY_LIMIT;
use portway_gateway::store::{Plan, SubscriptionRecord, SubscriptionStatus};
use portway_gateway::test_connection::{self, TestOutcome};
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn unknown_credential_reports_not_found() {
    let gw = TestGateway::start().await.unwrap();
    let outcome = test_connection::run(&gw.state, Uuid::new_v4()).await.unwrap();
    assert_eq!(outcome, TestOutcome::NotFound);
}

#[tokio::test]
async fn trial_consumed_even_when_the_upstream_is_down() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed::default());

    // The fixture upstream (127.0.0.1:1) refuses connections, so the
    // probe fails -- but the trial query was spent at the gate.
    let outcome = test_connection::run(&gw.state, ep.credential_id).await.unwrap();
    let TestOutcome::Failed { error } = outcome else {
        panic!("expected a connection failure, got {outcome:?}");
    };
    assert!(error.contains("Connection failed"), "{error}");
    assert_eq!(gw.store.trial_queries_used(ep.credential_id), Some(1));

    // Probe attempts land in the usage log like any adapter exercise.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gw.store.usage_log().len(), 1);
}

#[tokio::test]
async fn exhausted_trial_denies_before_the_adapter_runs() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed {
        trial_queries_used: TRIAL_QUERY_LIMIT,
        ..Seed::default()
    });

    let outcome = test_connection::run(&gw.state, ep.credential_id).await.unwrap();
    assert_eq!(outcome, TestOutcome::LimitReached);
    assert_eq!(
        gw.store.trial_queries_used(ep.credential_id),
        Some(TRIAL_QUERY_LIMIT),
        "counter never exceeds the cap"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gw.store.usage_log().is_empty(), "denied tests never reach the adapter");
}

#[tokio::test]
async fn paid_subscriptions_bypass_trial_metering() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed {
        trial_queries_used: TRIAL_QUERY_LIMIT,
        ..Seed::default()
    });
    gw.store.set_subscription(
        ep.organization_id,
        SubscriptionRecord {
            plan: Plan::Pro,
            status: SubscriptionStatus::Active,
            external_sub_id: Some("sub_123".to_string()),
        },
    );

    let outcome = test_connection::run(&gw.state, ep.credential_id).await.unwrap();
    let TestOutcome::Failed { .. } = outcome else {
        panic!("paid org runs the probe even with an exhausted trial, got {outcome:?}");
    };
    assert_eq!(
        gw.store.trial_queries_used(ep.credential_id),
        Some(TRIAL_QUERY_LIMIT),
        "paid path never touches the counter"
    );
}

#[tokio::test]
async fn trialing_subscription_is_not_paid() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed {
        trial_queries_used: TRIAL_QUERY_LIMIT,
        ..Seed::default()
    });
    gw.store.set_subscription(
        ep.organization_id,
        SubscriptionRecord {
            plan: Plan::Pro,
            status: SubscriptionStatus::Trialing,
            external_sub_id: None,
        },
    );

    let outcome = test_connection::run(&gw.state, ep.credential_id).await.unwrap();
    assert_eq!(outcome, TestOutcome::LimitReached);
}

#[tokio::test]
async fn concurrent_tests_for_the_last_trial_query() {
    let gw = TestGateway::start().await.unwrap();
    let ep = gw.seed_postgres(Seed {
        trial_queries_used: TRIAL_QUERY_LIMIT - 1,
        ..Seed::default()
    });

    let state_a = gw.state.clone();
    let state_b = gw.state.clone();
    let credential_id = ep.credential_id;
    let (a, b) = tokio::join!(
        tokio::spawn(async move { test_connection::run(&state_a, credential_id).await }),
        tokio::spawn(async move { test_connection::run(&state_b, credential_id).await }),
    );
    let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

    let winners = outcomes
        .iter()
        .filter(|o| !matches!(o, TestOutcome::LimitReached))
        .count();
    let losers = outcomes
        .iter()
        .filter(|o| matches!(o, TestOutcome::LimitReached))
        .count();
    assert_eq!((winners, losers), (1, 1), "exactly one caller wins the race");
    assert_eq!(
        gw.store.trial_queries_used(ep.credential_id),
        Some(TRIAL_QUERY_LIMIT),
        "the counter lands on the cap, never past it"
    );
}

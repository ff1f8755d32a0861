//! Credential test-connection path.
//!
//! An internal caller (the dashboard fronts it; it is not an MCP route)
//! that exercises an adapter's probe tool with a stored credential. This
//! is the only path that reads or increments the per-credential trial
//! counter: the trial exists to unblock sign-up, not to meter live
//! traffic, so production MCP calls never touch it.

use crate::AppState;
use crate::quota::{self, TrialDecision};
use crate::store::{StoreError, UsageRecord, UsageStatus, encrypted_field_names};
use crate::usage::redact_args;
use chrono::Utc;
use portway_adapters::{ServiceConfig, ToolOutcome};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Success {
        payload: Value,
        /// `None` for organizations on paid billing (no trial metering).
        trial_queries_remaining: Option<i32>,
    },
    Failed {
        error: String,
    },
    /// Trial cap exhausted (or lost the CAS race twice).
    LimitReached,
    NotFound,
}

pub async fn run(state: &AppState, credential_id: Uuid) -> Result<TestOutcome, StoreError> {
    let Some(found) = state.store.lookup_credential(credential_id).await? else {
        return Ok(TestOutcome::NotFound);
    };

    let paid = state
        .store
        .lookup_subscription(found.organization.id)
        .await?
        .is_some_and(|s| s.is_active_paid());

    let mut trial_queries_remaining = None;
    if !paid {
        match quota::consume_trial_query(
            state.store.as_ref(),
            credential_id,
            found.credential.trial_queries_used,
        )
        .await?
        {
            TrialDecision::LimitReached => return Ok(TestOutcome::LimitReached),
            TrialDecision::Allowed { remaining } => trial_queries_remaining = Some(remaining),
        }
    }

    let Some(adapter) = state.registry.get(found.credential.service) else {
        return Ok(TestOutcome::Failed {
            error: format!("Service '{}' is not supported", found.credential.service),
        });
    };

    let encrypted = encrypted_field_names(&found.field_schema);
    let config = match state
        .cipher
        .unseal_config(&found.credential.config, &encrypted)
    {
        Ok(fields) => ServiceConfig::new(fields),
        Err(e) => {
            tracing::warn!(error = %e, credential = %credential_id, "credential unseal failed");
            return Ok(TestOutcome::Failed {
                error: "Unable to decrypt stored credentials; re-add credentials".to_string(),
            });
        }
    };
    for field in adapter.required_fields() {
        if !config.has(field) {
            return Ok(TestOutcome::Failed {
                error: format!("Credential is missing required field '{field}'"),
            });
        }
    }

    let (tool, args) = adapter.probe();
    let started = std::time::Instant::now();
    let outcome = adapter.handle(tool, &args, &config).await;
    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    let (status, error) = match &outcome {
        ToolOutcome::Ok(_) => (UsageStatus::Success, None),
        ToolOutcome::Err(message) => (UsageStatus::Error, Some(message.clone())),
    };
    state.usage.record_usage(UsageRecord {
        organization_id: found.organization.id,
        credential_id,
        service: found.credential.service,
        tool: tool.to_string(),
        request_args: redact_args(&args),
        status,
        error,
        duration_ms,
        created_at: Utc::now(),
    });

    Ok(match outcome {
        ToolOutcome::Ok(payload) => TestOutcome::Success {
            payload,
            trial_queries_remaining,
        },
        ToolOutcome::Err(error) => TestOutcome::Failed { error },
    })
}

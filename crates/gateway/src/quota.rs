//! Plan/quota admission control.
//!
//! Three independent gates, cheapest first:
//! 0. per-endpoint per-minute ceiling (in-process fixed window),
//! 1. organization daily cap derived from the plan,
//! 2. per-credential trial counter (test-connection path only), enforced
//!    through the store's compare-and-swap.
//!
//! A deny always becomes a structured error response, never a silent
//! success.

use crate::store::{CasOutcome, MetadataStore, OrganizationRef, StoreError};
use chrono::{DateTime, Local, LocalResult, TimeZone as _, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// Hard ceiling on test queries for organizations without paid billing.
pub const TRIAL_QUERY_LIMIT: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialDecision {
    Allowed { remaining: i32 },
    LimitReached,
}

/// In-process fixed-window counter keyed by endpoint public id.
///
/// Per-node by design: a stateless request path cannot afford a store
/// round-trip for the cheapest gate, and the ceiling is advisory next to
/// the authoritative daily cap.
#[derive(Default)]
pub struct MinuteWindow {
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl MinuteWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request; `false` when the ceiling is exhausted for the
    /// current minute. A ceiling of 0 means uncapped.
    pub fn admit(&self, endpoint_public_id: &str, ceiling: u32, now: DateTime<Utc>) -> bool {
        if ceiling == 0 {
            return true;
        }
        let minute = now.timestamp().div_euclid(60);
        let mut windows = self.windows.lock();
        let entry = windows
            .entry(endpoint_public_id.to_string())
            .or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        if entry.1 >= ceiling {
            return false;
        }
        entry.1 += 1;
        true
    }
}

/// Gate 1: plan-derived daily cap, counted since local midnight.
pub async fn check_daily_cap(
    store: &dyn MetadataStore,
    organization: &OrganizationRef,
    now: DateTime<Utc>,
) -> Result<QuotaDecision, StoreError> {
    // Unlimited plans short-circuit before touching the store.
    let Some(limit) = organization.plan.daily_request_limit() else {
        return Ok(QuotaDecision::Allowed);
    };

    let used = store
        .count_requests_since(organization.id, local_midnight(now))
        .await?;
    if used >= limit {
        return Ok(QuotaDecision::Denied {
            reason: format!(
                "Daily request limit reached ({limit} requests/day on the {} plan)",
                organization.plan.as_slug()
            ),
        });
    }
    Ok(QuotaDecision::Allowed)
}

/// Gate 2: consume one trial query through the store CAS.
///
/// One retry on conflict with a fresh read; a second conflict, a vanished
/// credential, or an exhausted counter all deny.
pub async fn consume_trial_query(
    store: &dyn MetadataStore,
    credential_id: Uuid,
    observed: i32,
) -> Result<TrialDecision, StoreError> {
    let mut expected = observed;
    for attempt in 0..2 {
        if expected >= TRIAL_QUERY_LIMIT {
            return Ok(TrialDecision::LimitReached);
        }
        match store.increment_trial_counter(credential_id, expected).await? {
            CasOutcome::Updated(new_value) => {
                return Ok(TrialDecision::Allowed {
                    remaining: (TRIAL_QUERY_LIMIT - new_value).max(0),
                });
            }
            CasOutcome::Conflict if attempt == 0 => {
                match store.lookup_credential(credential_id).await? {
                    Some(found) => expected = found.credential.trial_queries_used,
                    None => return Ok(TrialDecision::LimitReached),
                }
            }
            CasOutcome::Conflict => return Ok(TrialDecision::LimitReached),
        }
    }
    Ok(TrialDecision::LimitReached)
}

/// Midnight of the request's day in the gateway's local timezone.
fn local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now
        .with_timezone(&Local)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("00:00:00 is a valid time");
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // A DST gap swallowed midnight; the day effectively starts now.
        LocalResult::None => now,
    }
}

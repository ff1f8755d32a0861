//! Fire-and-forget store writes.
//!
//! `AppendUsage` and `TouchEndpoint` are advisory telemetry: they must
//! never block or fail the reply to the client. Jobs go through a bounded
//! queue into one worker task; when the queue is full the job is dropped
//! with a warning, and on shutdown the worker drains what is already
//! buffered before exiting.

use crate::store::{MetadataStore, StoreError, UsageRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug)]
enum StoreJob {
    Usage(UsageRecord),
    Touch {
        endpoint_id: Uuid,
        at: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct UsageSink {
    tx: mpsc::Sender<StoreJob>,
}

impl UsageSink {
    /// Spawn the worker; the returned handle completes once the queue has
    /// drained after `shutdown` fires.
    pub fn spawn(
        store: Arc<dyn MetadataStore>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(worker(store, rx, shutdown));
        (Self { tx }, handle)
    }

    pub fn record_usage(&self, record: UsageRecord) {
        self.submit(StoreJob::Usage(record));
    }

    pub fn touch_endpoint(&self, endpoint_id: Uuid, at: DateTime<Utc>) {
        self.submit(StoreJob::Touch { endpoint_id, at });
    }

    fn submit(&self, job: StoreJob) {
        if self.tx.try_send(job).is_err() {
            // Advisory data; dropping beats blocking the reply path.
            tracing::warn!("usage queue full or closed; dropping telemetry write");
        }
    }
}

async fn worker(
    store: Arc<dyn MetadataStore>,
    mut rx: mpsc::Receiver<StoreJob>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                // Stop accepting new jobs, then drain the backlog.
                rx.close();
                while let Some(job) = rx.recv().await {
                    run_job(store.as_ref(), job).await;
                }
                break;
            }
            job = rx.recv() => {
                match job {
                    Some(job) => run_job(store.as_ref(), job).await,
                    None => break,
                }
            }
        }
    }
}

async fn run_job(store: &dyn MetadataStore, job: StoreJob) {
    let result: Result<(), StoreError> = match job {
        StoreJob::Usage(record) => store.append_usage(record).await,
        StoreJob::Touch { endpoint_id, at } => store.touch_endpoint(endpoint_id, at).await,
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "telemetry write failed");
    }
}

const REDACTED: &str = "[redacted]";
const SENSITIVE_KEY_MARKERS: [&str; 6] =
    ["password", "secret", "token", "api_key", "apikey", "authorization"];

/// Scrub values under secret-looking keys before args reach the usage log.
#[must_use]
pub fn redact_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let lowered = key.to_ascii_lowercase();
                    if SENSITIVE_KEY_MARKERS.iter().any(|m| lowered.contains(m)) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact_args(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_args).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::UsageStatus;
    use portway_adapters::ServiceKind;
    use serde_json::json;
    use std::time::Duration;

    fn record() -> UsageRecord {
        UsageRecord {
            organization_id: Uuid::new_v4(),
            credential_id: Uuid::new_v4(),
            service: ServiceKind::Stripe,
            tool: "get_balance".to_string(),
            request_args: json!({}),
            status: UsageStatus::Success,
            error: None,
            duration_ms: 12,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_flow_through_the_queue() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let (sink, worker) = UsageSink::spawn(store.clone(), shutdown.clone());

        sink.record_usage(record());
        sink.touch_endpoint(Uuid::new_v4(), Utc::now());

        // Give the worker a beat, then drain via shutdown.
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker drains promptly")
            .unwrap();

        assert_eq!(store.usage_log().len(), 1);
    }

    #[tokio::test]
    async fn buffered_jobs_survive_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let (sink, worker) = UsageSink::spawn(store.clone(), shutdown.clone());

        for _ in 0..10 {
            sink.record_usage(record());
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker drains promptly")
            .unwrap();

        assert_eq!(store.usage_log().len(), 10);
    }

    #[test]
    fn redaction_scrubs_secret_looking_keys() {
        let args = json!({
            "sql": "SELECT 1",
            "password": "hunter2",
            "nested": { "api_key": "sk_live_abc", "limit": 5 },
            "Authorization": "Bearer xyz",
            "items": [ { "client_secret": "shh" } ],
        });
        let redacted = redact_args(&args);
        assert_eq!(redacted["sql"], "SELECT 1");
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["nested"]["api_key"], REDACTED);
        assert_eq!(redacted["nested"]["limit"], 5);
        assert_eq!(redacted["Authorization"], REDACTED);
        assert_eq!(redacted["items"][0]["client_secret"], REDACTED);
    }
}

use anyhow::Context as _;
use portway_gateway::config::GatewayConfig;
use portway_gateway::secrets_crypto::SecretsCipher;
use portway_gateway::store::postgres::PgMetadataStore;
use portway_gateway::usage::UsageSink;
use portway_gateway::{AppState, edge};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    // Master key absence is fatal; nothing can be unsealed without it.
    let cipher = SecretsCipher::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connect to metadata store")?;
    let store = Arc::new(PgMetadataStore::new(pool));

    let shutdown = CancellationToken::new();
    let (usage, usage_worker) = UsageSink::spawn(store.clone(), shutdown.clone());

    let state = Arc::new(AppState::new(config.clone(), store, cipher, usage));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "portway gateway listening");

    axum::serve(listener, edge::router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("serve gateway")?;

    // Drain the telemetry queue, bounded so shutdown cannot hang.
    shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(5), usage_worker)
        .await
        .is_err()
    {
        tracing::warn!("usage sink did not drain before the shutdown deadline");
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

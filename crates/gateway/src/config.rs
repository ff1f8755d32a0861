//! Process configuration from the environment.

use anyhow::Context as _;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Metadata store URL with the elevated gateway credential.
    pub database_url: String,
    /// Overall edge deadline wrapped around the dispatcher; adapter-level
    /// timeouts are floors, the shorter deadline wins.
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_or("PORTWAY_BIND_ADDR", DEFAULT_BIND_ADDR)
            .parse()
            .context("PORTWAY_BIND_ADDR must be host:port")?;

        let database_url =
            std::env::var("PORTWAY_DATABASE_URL").context("PORTWAY_DATABASE_URL is required")?;

        let request_timeout = match std::env::var("PORTWAY_REQUEST_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .context("PORTWAY_REQUEST_TIMEOUT_SECS must be an integer")?,
            ),
            Err(_) => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let max_body_bytes = match std::env::var("PORTWAY_MAX_BODY_BYTES") {
            Ok(raw) => raw
                .parse()
                .context("PORTWAY_MAX_BODY_BYTES must be an integer")?,
            Err(_) => DEFAULT_MAX_BODY_BYTES,
        };

        Ok(Self {
            bind_addr,
            database_url,
            request_timeout,
            max_body_bytes,
        })
    }

    /// Defaults without touching the environment; used by tests that run
    /// an in-process server.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().expect("valid test addr"),
            database_url: String::new(),
            request_timeout: Duration::from_secs(10),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

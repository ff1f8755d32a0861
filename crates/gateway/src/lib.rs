//! Portway gateway library.
//!
//! The binary in `main.rs` wires this together; tests run the same
//! [`AppState`] + [`edge::router`] against an in-memory metadata store.

pub mod config;
pub mod edge;
pub mod mcp;
pub mod quota;
pub mod secrets_crypto;
pub mod store;
pub mod test_connection;
pub mod usage;

use config::GatewayConfig;
use portway_adapters::AdapterRegistry;
use quota::MinuteWindow;
use secrets_crypto::SecretsCipher;
use std::sync::Arc;
use store::MetadataStore;
use usage::UsageSink;

/// Shared, read-only-after-init request-path state.
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<dyn MetadataStore>,
    pub registry: AdapterRegistry,
    pub cipher: SecretsCipher,
    pub usage: UsageSink,
    pub rate: MinuteWindow,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn MetadataStore>,
        cipher: SecretsCipher,
        usage: UsageSink,
    ) -> Self {
        Self {
            config,
            store,
            registry: AdapterRegistry::standard(),
            cipher,
            usage,
            rate: MinuteWindow::new(),
        }
    }
}

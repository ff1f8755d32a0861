//! Error types for service adapters.

use crate::sql_guard::GuardError;
use thiserror::Error;

/// Failures raised while executing a tool against an upstream service.
///
/// These never cross the dispatcher boundary as errors: the adapter entry
/// point flattens them into a `ToolOutcome::Err` message for the client.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Credential config is unusable (missing field, malformed URL).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied tool arguments are invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// SQL guard rejection; the message names the offending rule verbatim.
    #[error("{0}")]
    Guard(#[from] GuardError),

    /// Could not reach or authenticate to the upstream.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Upstream statement or request exceeded the adapter deadline.
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Upstream executed the request and reported a failure.
    #[error("{0}")]
    Upstream(String),
}

impl AdapterError {
    pub fn missing_field(key: &str) -> Self {
        Self::Config(format!("missing required credential field '{key}'"))
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;

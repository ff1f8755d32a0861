//! Outbound HTTP safety for tenant-supplied base URLs.
//!
//! SaaS adapters talk to fixed vendor hosts, but the Supabase base URL
//! comes straight from tenant credential config. Validate its shape before
//! the first request so a hostile config cannot smuggle schemes or inline
//! credentials into gateway-originated traffic.

use crate::error::AdapterError;
use url::Url;

pub fn validate_base_url(raw: &str) -> Result<Url, AdapterError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AdapterError::Config(format!("invalid base URL: {e}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(AdapterError::Config(format!(
            "unsupported URL scheme '{scheme}'"
        )));
    }
    if url.host_str().is_none() {
        return Err(AdapterError::Config("base URL is missing a host".to_string()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(AdapterError::Config(
            "base URL must not embed credentials".to_string(),
        ));
    }

    Ok(url)
}

/// Render a reqwest error without the request URL, which may carry
/// tenant-identifying query parameters.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(url) = e.url() {
        msg = msg.replace(url.as_str(), "<url>");
    }
    msg
}

//! HTTP Client Factory
//!
//! Provides a factory function for building reqwest clients for model endpoints.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Connection establishment timeout for model endpoints.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a `reqwest::Client` for model endpoints.
///
/// - `Some(timeout)` -> overall request timeout
/// - `None` -> no request timeout (streams may run as long as the caller allows)
pub fn build_http_client(timeout: Option<Duration>) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| LlmError::ProviderUnavailable {
        message: format!("failed to build HTTP client: {}", e),
    })
}

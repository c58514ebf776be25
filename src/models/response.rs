//! Response Types
//!
//! JSON envelope shared by every non-streaming endpoint. Errors use the same
//! shape with `status: 1` (see `AppError::into_response`).

use serde::{Deserialize, Serialize};

/// Generic JSON response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 0 on success, 1 on failure
    pub status: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: 0,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Successful response without data
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: message.into(),
            data: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
    pub connected_clients: usize,
    pub running_works: usize,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            service: "autoprovider".to_string(),
            connected_clients: 0,
            running_works: 0,
        }
    }
}

//! Health Check Endpoints
//!
//! - /health - Database round trip through the resilient connection
//! - /ready - Process is serving
//!
//! No authentication required for health endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::deadline::Deadline;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Ping the store within the health-check deadline.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let deadline = Deadline::after(state.config.health_timeout);
    match state.service.ping(deadline).await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::ok())),
        Err(err) => {
            tracing::warn!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::error(err.to_string())),
            )
        }
    }
}

pub async fn ready() -> impl IntoResponse {
    Json(HealthResponse::ok())
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(HealthResponse::ok())?;
        assert_eq!(json, serde_json::json!({"status": "ok"}));

        let json = serde_json::to_value(HealthResponse::error("connection refused"))?;
        assert_eq!(
            json,
            serde_json::json!({"status": "error", "error": "connection refused"})
        );
        Ok(())
    }
}

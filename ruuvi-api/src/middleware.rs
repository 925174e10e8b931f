//! Axum Middleware for Authentication
//!
//! Rejects requests whose bearer token does not match a configured token with
//! 403. Health routes are mounted outside this layer.

use crate::auth::AuthConfig;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Shared state for the authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: AuthConfig) -> Self {
        Self {
            auth_config: Arc::new(auth_config),
        }
    }
}

/// Authentication middleware for Axum.
///
/// ```ignore
/// use axum::{middleware, Router};
///
/// let app = Router::new()
///     .route("/", axum::routing::get(|| async { "OK" }))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if let Err(err) = state.auth_config.authenticate(auth_header) {
        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            "Rejected request with invalid bearer token"
        );
        return Err(err);
    }

    Ok(next.run(request).await)
}

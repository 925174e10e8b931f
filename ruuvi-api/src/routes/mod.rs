//! REST API Routes Module
//!
//! - `GET /`: latest measurements per device (bearer token protected, shed
//!   with 503 once `max_concurrent_requests` are in flight)
//! - `GET /health`, `GET /ready`: health checks (no authentication)

pub mod health;
pub mod latest;

use axum::{
    error_handling::HandleErrorLayer, middleware::from_fn_with_state, routing::get, BoxError,
    Router,
};
use tower::{load_shed::error::Overloaded, ServiceBuilder};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::error::ApiError;
use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::state::AppState;

/// Build the full router: measurement routes behind token authentication and
/// a concurrency limit, health routes open, every request traced.
pub fn create_api_router(state: AppState, auth_config: AuthConfig) -> Router {
    let limit = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(overloaded))
        .load_shed()
        .concurrency_limit(state.config.max_concurrent_requests.max(1));

    let protected = Router::new()
        .route("/", get(latest::latest))
        .layer(limit)
        .layer(from_fn_with_state(
            AuthMiddlewareState::new(auth_config),
            auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .merge(health::create_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn overloaded(err: BoxError) -> ApiError {
    if err.is::<Overloaded>() {
        tracing::warn!("Request shed, too many in flight");
        ApiError::service_unavailable("Too many concurrent requests")
    } else {
        ApiError::internal_error(format!("Unhandled middleware error: {}", err))
    }
}

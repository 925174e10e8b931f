//! Shared application state for Axum routers.

use std::sync::Arc;

use crate::config::ApiConfig;
use crate::service::MeasurementService;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn MeasurementService>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(service: Arc<dyn MeasurementService>, config: ApiConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }
}

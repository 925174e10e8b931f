//! RuuviTag API - Latest Measurements over HTTP
//!
//! Serves the newest RuuviTag readings per device from PostgreSQL. Column
//! names are configured at runtime; the single database connection survives
//! idle drops by reconnecting with backoff and retrying the interrupted
//! statement once.

pub mod auth;
pub mod config;
pub mod connection;
pub mod db;
pub mod deadline;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod service;
pub mod settings;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use auth::AuthConfig;
pub use config::{process_env, ApiConfig, EnvLookup};
pub use connection::{
    BackoffConfig, ConnectionStatus, Connector, ResilientConnection, RowOf, StoreConnection,
};
pub use db::{DbConfig, PgConnection, PgConnector, PgRow};
pub use deadline::Deadline;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{auth_middleware, AuthMiddlewareState};
pub use routes::create_api_router;
pub use service::{LatestService, MeasurementService, Measurements};
pub use settings::{Cli, FileConfig, Settings};
pub use state::AppState;

//! RuuviTag API Server Entry Point
//!
//! Resolves configuration from flags, environment and the config file, opens
//! the database connection and serves the Axum router until Ctrl-C or SIGTERM.

use std::sync::Arc;

use clap::Parser;
use ruuvi_api::telemetry::init_tracer;
use ruuvi_api::{
    create_api_router, ApiError, ApiResult, AppState, Cli, Deadline, LatestService,
    MeasurementService, PgConnector, ResilientConnection, Settings,
};
use ruuvi_core::QueryBuilder;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;
    init_tracer(&settings.telemetry)?;

    match &settings.source {
        Some(path) => tracing::info!(path = %path.display(), "Using config file"),
        None => tracing::info!("Config file not found, using environment and flags"),
    }

    let Settings {
        db,
        backoff,
        api,
        auth,
        columns,
        ..
    } = settings;

    tracing::info!(
        host = %db.host,
        port = db.port,
        database = %db.dbname,
        table = %db.table,
        name_table = %db.name_table,
        columns = ?columns,
        "Connecting to PostgreSQL"
    );

    let queries = QueryBuilder::new(&db.table, &db.name_table, columns)?;
    let conn = ResilientConnection::new(PgConnector::new(&db), backoff);
    conn.connect(Deadline::after(db.connect_timeout)).await?;
    let service = Arc::new(LatestService::new(queries, conn));

    if auth.is_enabled() {
        tracing::info!(tokens = auth.token_count(), "Using authentication");
    } else {
        tracing::info!("Not using authentication");
    }

    let addr = api.bind_addr()?;
    let app = create_api_router(AppState::new(service.clone(), api), auth);

    tracing::info!(%addr, "Starting RuuviTag API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    if let Err(e) = service.close().await {
        tracing::warn!(error = %e, "Failed to close database connection");
    }
    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

//! RuuviTag Telemetry
//!
//! Structured logging through `tracing`. HTTP requests are traced by
//! `tower-http`'s `TraceLayer`, mounted in the router.

pub mod tracer;

pub use tracer::{init_tracer, LogFormat, TelemetryConfig};

//! Structured logging setup built on `tracing`.

/// Telemetry configuration.
pub mod config;

/// Global subscriber initialisation.
pub mod subscriber;

pub use config::TelemetryConfig;
pub use subscriber::{init_telemetry, TelemetryGuard};

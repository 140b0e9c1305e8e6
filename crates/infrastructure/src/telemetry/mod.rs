//! Logging setup
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and either a
//! human-readable or a JSON output layer. Metrics go through the `metrics`
//! facade; installing an exporter is left to the host binary.
//!
//! [`EnvFilter`]: tracing_subscriber::EnvFilter

mod subscriber;

pub use subscriber::{LogFormat, TelemetryConfig, TelemetryError, init_telemetry};

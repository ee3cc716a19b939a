//! Tracing Initialization
//!
//! Structured logging via tracing-subscriber, with an optional JSON output
//! mode for log aggregation pipelines. Call `init_telemetry` once at startup
//! before anything emits spans.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to log lines
    pub service_name: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("SYMPOSIUM_SERVICE_NAME")
                .unwrap_or_else(|_| "symposium-api".to_string()),
            json_output: std::env::var("SYMPOSIUM_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// The filter respects `RUST_LOG`; without it, API and middleware spans log
/// at debug and everything else at info.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("symposium_api=debug,tower_http=debug,info"));

    if config.json_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(service = %config.service_name, "telemetry initialized");
}

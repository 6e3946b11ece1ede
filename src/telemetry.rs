//! Structured logging setup.
//!
//! Every service logs through `tracing` with an env-filter; `OTEL_ENABLED`
//! and `OTEL_SERVICE_NAME` select whether spans carry an explicit service
//! name. Exporter plumbing lives outside this system; only the log
//! subscriber is configured here.

use std::env;
use tracing_subscriber::EnvFilter;

/// Builder-style logging initialization, safe to call once per process.
pub struct Telemetry {
    name: String,
    version: Option<String>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| name.to_string());
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    /// Installs the global subscriber. Repeated registration (tests) is a
    /// no-op.
    pub fn register(self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
        let verbose = env::var("OTEL_ENABLED").map(|v| v == "true").unwrap_or(false);
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(verbose);
        if builder.try_init().is_ok() {
            tracing::info!(
                service = %self.name,
                version = self.version.as_deref().unwrap_or("dev"),
                "telemetry registered"
            );
        }
    }
}

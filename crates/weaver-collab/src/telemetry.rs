//! Tracing and metrics setup for the collaboration host.
//!
//! - Compact console output filtered by `RUST_LOG`
//! - Optional daily-rolling JSON log file when `LOG_DIR` is set
//! - Prometheus recorder rendered at `/metrics`

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name used for the log file prefix
    pub service_name: String,
    /// Directory for rolling JSON logs. None disables file logging.
    pub log_dir: Option<String>,
    /// Console log level (default: INFO, DEBUG in debug builds)
    pub console_level: Level,
}

impl TelemetryConfig {
    /// Load config from environment variables.
    ///
    /// - `LOG_DIR`: directory for rolling log files (optional)
    /// - `RUST_LOG`: Standard env filter (optional, overrides console_level)
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let console_level = if cfg!(debug_assertions) {
            Level::DEBUG
        } else {
            Level::INFO
        };

        Self {
            service_name: service_name.into(),
            log_dir: std::env::var("LOG_DIR").ok(),
            console_level,
        }
    }
}

/// Initialize telemetry (metrics + tracing).
///
/// Call once at startup and keep the returned guard alive for as long as file
/// logs should be flushed.
pub fn init(config: TelemetryConfig) -> Option<WorkerGuard> {
    init_metrics();
    init_tracing(config)
}

/// Install the prometheus recorder, once.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("a metrics recorder is already installed, /metrics will be empty");
        }
        handle
    })
}

fn init_tracing(config: TelemetryConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},tower_http=info",
            config.console_level.as_str().to_lowercase()
        ))
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(env_filter);

    match config.log_dir {
        Some(log_dir) => {
            let appender = tracing_appender::rolling::daily(
                &log_dir,
                format!("{}.log", config.service_name),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("info"));

            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .init();

            tracing::info!(
                service = %config.service_name,
                log_dir = %log_dir,
                "telemetry initialized with file logging"
            );
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(console_layer).init();
            tracing::debug!(
                service = %config.service_name,
                "telemetry initialized (console only, set LOG_DIR to enable file logs)"
            );
            None
        }
    }
}

/// Render metrics in prometheus text format.
pub fn render() -> String {
    init_metrics().render()
}

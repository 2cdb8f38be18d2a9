use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::TelemetryConfig;

/// Initialize tracing from config-based settings.
///
/// Returns the non-blocking writer guard when a log directory is configured;
/// the caller keeps it alive for the lifetime of the process so buffered
/// lines are flushed on shutdown.
pub fn init_tracing(config: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    type FilteredRegistry =
        tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>;

    let mut guard = None;
    let file_layer: Option<Box<dyn Layer<FilteredRegistry> + Send + Sync>> =
        match &config.log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, "notifyd.log");
                let (writer, worker_guard) = tracing_appender::non_blocking(appender);
                guard = Some(worker_guard);
                Some(fmt::layer().with_writer(writer).with_ansi(false).boxed())
            }
            None => None,
        };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if config.json_logs {
        let fmt_layer = fmt::layer().json().with_current_span(true).with_target(true);
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer().with_target(true);
        registry.with(fmt_layer).init();
    }

    info!(
        log_level = %config.log_level,
        json_logs = config.json_logs,
        log_dir = ?config.log_dir,
        "tracing initialized"
    );

    Ok(guard)
}

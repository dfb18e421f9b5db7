//! Tracing subscriber setup.
//!
//! Console output is pretty or JSON depending on [`LogFormat`]. When a log
//! directory is configured, the same events are also written to a daily
//! rolling file through a non-blocking writer.

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogConfig, LogFormat};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "sweet_notify=info,sqlx=warn";

const LOG_FILE_PREFIX: &str = "sweet-notify.log";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when file logging is enabled; keep it
/// alive for the lifetime of the process so buffered lines get flushed.
pub fn init_logging(config: &LogConfig) -> crate::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (json_layer, pretty_layer) = match config.format {
        LogFormat::Json => (Some(fmt::layer().json().with_timer(LocalTimer)), None),
        LogFormat::Pretty => (None, Some(fmt::layer().with_ansi(true).with_timer(LocalTimer))),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(pretty_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("sweet_notify=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
        assert!(DEFAULT_LOG_FILTER.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_local_timer_format() {
        let mut buf = String::new();
        LocalTimer.format_time(&mut Writer::new(&mut buf)).unwrap();
        assert!(chrono::DateTime::parse_from_str(&buf, "%Y-%m-%dT%H:%M:%S%.3f%:z").is_ok());
    }
}

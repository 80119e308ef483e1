use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::schema::LoggingConfig;
use crate::utils::expand_tilde;

const LOG_FILE_PREFIX: &str = "parley.log";
const LOG_RETENTION_DAYS: u64 = 7;

/// Initialize the logging system
///
/// Records always go to a daily rolling file (`parley.log.YYYY-MM-DD`) in the
/// configured directory. The stderr layer is only attached when
/// `logging.console` is set.
pub fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    // 1. Log Level
    let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());

    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level_str));

    for (module, level) in &config.overrides {
        if let Ok(directive) = format!("{}={}", module, level).parse() {
            filter = filter.add_directive(directive);
        } else {
            eprintln!("Invalid log directive: {}={}", module, level);
        }
    }

    // 2. Log Format
    let format_str = std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.format.clone());
    let is_json = format_str.to_lowercase() == "json";

    // 3. File Appender
    let log_dir = expand_tilde(&config.dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // 4. Layers
    let file_layer = if is_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let console_layer = if !config.console {
        None
    } else if is_json {
        Some(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
        )
    } else {
        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
        )
    };

    // 5. Init Subscriber
    Registry::default()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    // 6. Cleanup old logs
    if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS) {
        eprintln!("Failed to clean up old logs: {}", e);
    }

    guard
}

/// Clean up log files older than `days` days
fn cleanup_old_logs(dir: &Path, days: u64) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let now = std::time::SystemTime::now();
    let threshold = std::time::Duration::from_secs(days * 24 * 3600);

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if age.is_some_and(|age| age > threshold) {
            if let Err(e) = std::fs::remove_file(&path) {
                eprintln!("Failed to remove old log file {:?}: {}", path, e);
            }
        }
    }
    Ok(())
}

use std::env;
use std::fs;
use std::path::Path;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a filter directive, e.g. `filekeeper=debug`.
pub const LOG_ENV: &str = "FILEKEEPER_LOG";
pub const LOG_FILE_PREFIX: &str = "filekeeper.log";

/// Pick the filter directive: command line, then environment, then config.
pub fn resolve_level(cli: Option<&str>, env: Option<String>, config: &str) -> String {
    cli.map(str::to_string)
        .or(env.filter(|e| !e.trim().is_empty()))
        .unwrap_or_else(|| config.to_string())
}

/// Log to stderr and to a daily file in `log_dir`.
///
/// The returned guard flushes the file writer when dropped, so keep it alive
/// for the whole run. Without a usable `log_dir` only stderr is set up.
pub fn init_logger(
    cli_level: Option<&str>,
    config_level: &str,
    log_dir: &Path,
) -> Option<WorkerGuard> {
    let level = resolve_level(cli_level, env::var(LOG_ENV).ok(), config_level);
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact();

    let (file_layer, guard) = match fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if installed.is_ok() && guard.is_none() {
        warn!("could not create log folder {}, logging to stderr only", log_dir.display());
    }

    guard
}

//! Logging setup: compact terminal output plus daily-rotated log files under
//! `<output_dir>/logs/`.
//!
//! Two files are written:
//! - `docgrab.log` - human-readable text, ANSI colors disabled
//! - `docgrab.json.log` - one JSON object per event, for tooling
//!
//! `RUST_LOG` overrides the level, e.g. `RUST_LOG=docgrab=debug,reqwest=warn`.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Guards that flush the background file writers when dropped. Keep alive until exit.
#[must_use]
pub struct LogGuards {
    _text: WorkerGuard,
    _json: WorkerGuard,
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "docgrab=debug,info"
    } else {
        "info"
    }
}

pub fn init_logging<P: AsRef<Path>>(log_dir: P, verbose: bool) -> Result<LogGuards, LoggingError> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter(verbose))?,
    };

    let (text_writer, text_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_path, "docgrab.log"));
    let (json_writer, json_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(log_path, "docgrab.json.log"),
    );

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter.clone());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(env_filter.clone());

    let terminal_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(terminal_layer)
        .try_init()?;

    tracing::debug!("Logs are written to {}", log_path.display());

    Ok(LogGuards {
        _text: text_guard,
        _json: json_guard,
    })
}

/// Terminal-only logging for commands that only read the store.
pub fn init_terminal_logging(verbose: bool) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter(verbose))?,
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .with_filter(env_filter),
        )
        .try_init()?;
    Ok(())
}

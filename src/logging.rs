//! Log output of the harness
//!
//! Console output is filtered by `RUST_LOG` on top of a default level. When a
//! result directory is known every event is also written to
//! `<result_dir>/harness.log`.

use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Name of the run log in the result directory
pub const RUN_LOG_FILE_NAME: &str = "harness.log";

/// Default console level from the CLI flags
pub fn level_for(verbose: bool, quiet: bool) -> Level {
    match (verbose, quiet) {
        (true, _) => Level::DEBUG,
        (false, true) => Level::WARN,
        (false, false) => Level::INFO,
    }
}

/// `RUST_LOG` plus `default` as fallback directive
pub fn env_filter(default: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(default.into())
}

/// Plain-text layer writing `harness.log` into `dir`
///
/// Events are written by a background worker that flushes when the returned
/// guard is dropped.
pub fn run_log_layer<S>(dir: &Path) -> std::io::Result<(FmtLayer<S, DefaultFields, Format, NonBlocking>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, RUN_LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((fmt::layer().with_ansi(false).with_writer(writer), guard))
}

/// Install the global subscriber
///
/// Keep the returned guard alive for the whole run, otherwise the tail of
/// the run log is lost. A second call leaves the first subscriber in place.
pub fn init(level: Level, json: bool, run_log_dir: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match run_log_dir {
        Some(dir) => {
            let (layer, guard) = run_log_layer(dir)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(env_filter(level))
        .with(console)
        .with(file)
        .try_init()
        .is_err()
    {
        tracing::debug!("log subscriber already installed");
    }
    Ok(guard)
}

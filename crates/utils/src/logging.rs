//! provides logging helpers

use std::env;
use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// When set, logs go to a daily rolling file under this path instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "LOG_PATH";

const LOG_FILE_PREFIX: &str = "gke-operator.log";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Builds the formatting layer, writing to stderr or to a rolling file in `log_path`.
///
/// The returned guard must be held for as long as file logging should keep flushing.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> (BoxedLayer<S>, Option<WorkerGuard>)
where S: Subscriber + for<'a> LookupSpan<'a> {
    let file_appender = log_path.as_deref().and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(3)
            .build(Path::new(dir))
            .map_err(|e| eprintln!("failed to open log directory {dir}: {e}, logging to stderr"))
            .ok()
    });

    match file_appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter())
                .boxed();
            (layer, Some(guard))
        }
        None => {
            let layer = layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(env_filter())
                .boxed();
            (layer, None)
        }
    }
}

/// initiate the global tracing subscriber
pub fn init() -> Option<WorkerGuard> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let (fmt_layer, guard) = get_fmt_layer(log_path);
    registry().with(fmt_layer).init();
    guard
}

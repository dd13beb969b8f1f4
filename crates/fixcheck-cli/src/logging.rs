use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// The run log records every statement, so it is always written at debug.
const FILE_FILTER: &str = "debug,sqlx=warn,hyper=warn,reqwest=warn";

/// Stderr logging (human or JSON) plus an optional JSON log file.
pub fn init(level: &str, json: bool, file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr = if json {
        fmt::layer()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file_layer = match file {
        Some(path) => {
            let f = std::fs::File::create(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_timer(UtcTime::rfc_3339())
                    .with_target(true)
                    .with_current_span(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(f))
                    .with_filter(EnvFilter::new(FILE_FILTER)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr.with_filter(filter))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

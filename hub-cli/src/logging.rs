//! Tracing subscriber initialization: `RUST_LOG`-driven level filtering to
//! stderr, plus an optional rolling file appender when `HUB_LOG_DIR` is set.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::log_format::TextWithSpanIds;

pub fn init() -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .event_format(TextWithSpanIds::new())
        .with_writer(std::io::stderr);

    let log_dir = std::env::var("HUB_LOG_DIR").ok().map(PathBuf::from);
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(&dir, "hub.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    fmt::layer()
                        .event_format(TextWithSpanIds::new())
                        .with_writer(non_blocking)
                        .with_ansi(false),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

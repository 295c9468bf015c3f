use slog::{o, Drain, Logger};
use slog_async::Async;
use slog_term::{CompactFormat, TermDecorator};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{DatahubError, Result};

/// Root logger handed to the collector, the aggregators and the backend clients.
pub fn setup_logger(cluster_uid: &str) -> Logger {
    let decorator = TermDecorator::new().build();
    let drain = CompactFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();

    Logger::root(
        drain,
        o!(
            "cluster_uid" => cluster_uid.to_string(),
            "version" => env!("CARGO_PKG_VERSION"),
        ),
    )
}

/// Installs the `tracing` subscriber used by the HTTP layer.
///
/// `RUST_LOG` wins when set; otherwise this crate and `tower_http` log at INFO.
pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("datahub_metrics={},tower_http={}", Level::INFO, Level::INFO)));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| DatahubError::Config(format!("installing tracing subscriber: {}", e)))
}

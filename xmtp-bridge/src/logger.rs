//! Process-wide `tracing` subscriber setup.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Install a `tracing` subscriber writing to stderr. Idempotent.
///
/// `level` is an `EnvFilter` directive such as `"debug"` or
/// `"xmtp_bridge=trace,info"`; unparsable parts are ignored. Defaults to
/// `"info"`. Stdout is left alone because hosts use it as a data channel.
pub fn init_logger(level: Option<&str>) {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::builder().parse_lossy(level.unwrap_or("info"));
        // Another subscriber may already be installed by the embedding app.
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init();
    });
}

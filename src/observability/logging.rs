//! Structured logging.
//!
//! Uses `tracing` with an `EnvFilter`. `RUST_LOG` wins over the configured
//! level so operators can raise verbosity without editing the config file.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Safe to call once per process.
pub fn init(log_level: &str) {
    let fallback = format!("torkeeper={log_level},tower_http=info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into());

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

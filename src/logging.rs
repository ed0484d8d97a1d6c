//! Tracing subscriber setup for binaries embedding the orchestrator

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install a global subscriber.
///
/// `filter` uses `EnvFilter` syntax (`"info"`, `"seer=debug,warn"`);
/// `RUST_LOG` wins when set. With `json` every event is written as one JSON
/// object per line. Returns false if a subscriber was already installed.
pub fn init_logging(filter: &str, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(layer).try_init().is_ok()
}

//! # Structured Logging Module
//!
//! Console logging through `tracing-subscriber`, human-readable or JSON.

use std::sync::OnceLock;

use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging.
///
/// `RUST_LOG` overrides `config.level`. Only the first call has any effect,
/// and an already-installed global subscriber is left in place.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        // Use try_init to avoid panic if global subscriber already set
        if build_subscriber(config).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already set; keeping the existing one");
        }

        tracing::info!(
            level = %config.level,
            format = ?config.format,
            pid = std::process::id(),
            "Structured logging initialized"
        );
    });
}

/// Registry with the configured filter and console layer, not yet installed
fn build_subscriber(config: &LoggingConfig) -> impl Subscriber + Send + Sync {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(false)
            .json()
            .boxed(),
    };

    tracing_subscriber::registry().with(layer.with_filter(filter))
}

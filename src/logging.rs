// src/logging.rs

//! Logger initialization.

use crate::config::LoggingConfig;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes `env_logger` once; later calls are ignored.
///
/// `RUST_LOG` wins over the configured filter.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(config.filter.as_str()),
        );
        if config.timestamps {
            builder.format_timestamp_micros();
        } else {
            builder.format_timestamp(None);
        }
        if builder.try_init().is_err() {
            return;
        }
        log::debug!("logging initialized (filter: {})", config.filter);
    });
}

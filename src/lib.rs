pub mod auth;
pub mod billing;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod pricing;
pub mod providers;
pub mod server;
pub mod signals;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging with the default `info` level and text output
///
/// Note: This function can only be called once.
pub fn init_tracing() {
    init_tracing_with("info", "text");
}

/// Initialize tracing/logging from `[server]` settings
///
/// `RUST_LOG` still takes precedence over `default_level`. `format` is
/// `"json"` or anything else for human-readable text.
pub fn init_tracing_with(default_level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    if format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

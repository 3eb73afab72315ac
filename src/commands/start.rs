use anyhow::Result;
use colored::Colorize;
use image_gateway::{config, init_tracing_with, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// Loads configuration, initializes tracing from `[server]`, then runs the
/// server until a shutdown signal arrives.
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting image gateway...".green());

    let cfg = config::load_config_from(config_path)?;
    init_tracing_with(&cfg.server.log_level, &cfg.server.log_format);

    info!(config = %config_path.display(), "Starting image gateway");

    // Blocks until shutdown and the persist queue is drained
    server::start_server(cfg, config_path.to_path_buf()).await?;

    Ok(())
}

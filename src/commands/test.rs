use anyhow::Result;
use colored::Colorize;
use image_gateway::config;
use image_gateway::logging::SensitiveApiKey;
use std::path::Path;
use tracing::info;

/// Execute the test command
///
/// This validates the configuration file without starting the server
pub fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Testing configuration...".yellow());
    info!("Loading and validating configuration");

    // Load configuration (this will validate it)
    let cfg = config::load_config_from(config_path)?;

    println!("{}", "✓ Configuration test successful".green());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!("  {}: {}", "Log Level".cyan(), cfg.server.log_level);
    println!("  {}: {}", "Log Format".cyan(), cfg.server.log_format);
    println!();

    println!("  {}: {}", "API Keys".cyan(), cfg.api_keys.len());
    for (idx, key_cfg) in cfg.api_keys.iter().enumerate() {
        let status = if key_cfg.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!(
            "    {}. {} ({}, {} cents initial)",
            idx + 1,
            key_cfg.name,
            status,
            key_cfg.initial_balance_cents
        );
    }
    println!();

    println!("  {}: {:?}", "Billing".cyan(), cfg.billing.backend);
    println!("  {}: {:?}", "Cache".cyan(), cfg.cache.backend);
    println!("    Cache-Control: {}", cfg.cache.cache_control);
    println!(
        "  {}: {} ({}, key {})",
        "Provider".cyan(),
        cfg.provider.base_url,
        cfg.provider.model,
        SensitiveApiKey::new(&cfg.provider.api_key)
    );
    println!(
        "  {}: fee x{}, {} output prices",
        "Pricing".cyan(),
        cfg.pricing.fee_multiplier,
        cfg.pricing.output.values().map(|sizes| sizes.len()).sum::<usize>()
    );
    println!(
        "  {}: {}",
        "Coalesce in-flight".cyan(),
        if cfg.pipeline.coalesce_in_flight {
            "enabled".green()
        } else {
            "disabled".dimmed()
        }
    );

    info!("Configuration validation completed successfully");
    Ok(())
}

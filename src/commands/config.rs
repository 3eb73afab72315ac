use anyhow::Result;
use colored::Colorize;
use image_gateway::config::{self, Config};
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the current configuration with secrets masked
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config_from(config_path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config_from(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  API Keys: {}", cfg.api_keys.len());
    println!("  Enabled API Keys: {}", count_enabled_keys(&cfg));
    println!("  Billing Backend: {:?}", cfg.billing.backend);
    println!("  Cache Backend: {:?}", cfg.cache.backend);

    info!("Configuration validation successful");
    Ok(())
}

/// Sanitize secrets in configuration for safe display
fn sanitize_secrets(cfg: &Config) -> Config {
    let mut sanitized = cfg.clone();

    sanitized.provider.api_key = mask_api_key(&sanitized.provider.api_key);
    for key in &mut sanitized.api_keys {
        key.key = mask_api_key(&key.key);
    }

    sanitized
}

/// Mask an API key for safe display
///
/// Shows first 7 and last 4 characters with an ellipsis in between
/// Example: "sk-1234567890abcdef" -> "sk-1234...cdef"
fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 11 {
        return "***".to_string();
    }

    let prefix: String = chars[..7].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();

    format!("{}...{}", prefix, suffix)
}

fn count_enabled_keys(cfg: &Config) -> usize {
    cfg.api_keys.iter().filter(|k| k.enabled).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_gateway::config::{
        ApiKeyConfig, BillingConfig, CacheConfig, PipelineConfig, PricingConfig, ProviderConfig,
        ServerConfig,
    };

    fn create_test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                log_level: "info".to_string(),
                log_format: "json".to_string(),
            },
            api_keys: vec![
                ApiKeyConfig {
                    key: "sk-gateway-0123456789".to_string(),
                    name: "app".to_string(),
                    enabled: true,
                    initial_balance_cents: 100,
                },
                ApiKeyConfig {
                    key: "sk-gateway-disabled-01".to_string(),
                    name: "old-app".to_string(),
                    enabled: false,
                    initial_balance_cents: 0,
                },
            ],
            billing: BillingConfig::default(),
            cache: CacheConfig::default(),
            provider: ProviderConfig {
                api_key: "sk-proj-abcdefghijklmnop".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-image-1".to_string(),
                timeout_seconds: 60,
            },
            pricing: PricingConfig::default(),
            limits: Default::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("sk-1234567890abcdef"), "sk-1234...cdef");
        assert_eq!(mask_api_key("short"), "***");
    }

    #[test]
    fn test_sanitize_secrets_masks_every_key() {
        let sanitized = sanitize_secrets(&create_test_config());
        assert_eq!(sanitized.provider.api_key, "sk-proj...mnop");
        assert_eq!(sanitized.api_keys[0].key, "sk-gate...6789");
        assert_eq!(sanitized.api_keys[1].key, "sk-gate...d-01");
    }

    #[test]
    fn test_count_enabled_keys() {
        assert_eq!(count_enabled_keys(&create_test_config()), 1);
    }

    #[test]
    fn test_sanitized_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&sanitize_secrets(&create_test_config())).unwrap();
        assert!(rendered.contains("[provider]"));
        assert!(!rendered.contains("abcdefghijklmnop"));
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::{ImageQuality, ImageSize, RequestLimits};
use crate::pricing::PricingTable;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub limits: RequestLimits,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Starting balance when the account is first created
    #[serde(default)]
    pub initial_balance_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub backend: BillingBackend,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            backend: BillingBackend::default(),
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_directory")]
    pub directory: String,
    #[serde(default = "default_cache_control")]
    pub cache_control: String,
    /// Write-backs beyond this many queued are dropped with a warning
    #[serde(default = "default_persist_queue_size")]
    pub persist_queue_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            directory: default_cache_directory(),
            cache_control: default_cache_control(),
            persist_queue_size: default_persist_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_provider_model")]
    pub model: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// `[pricing]` section. Output prices are keyed by quality then size:
///
/// ```toml
/// [pricing.output.low]
/// "1024x1024" = 0.011
/// ```
///
/// Configured cells override the built-in price list; cells left out keep their default.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
    #[serde(default = "default_text_rate")]
    pub text_rate_per_million: f64,
    #[serde(default = "default_cached_text_rate")]
    pub cached_text_rate_per_million: f64,
    #[serde(default = "default_image_input_rate")]
    pub image_input_rate_per_million: f64,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,
    #[serde(default = "default_fee_multiplier")]
    pub fee_multiplier: f64,
    #[serde(
        default = "default_output_prices",
        deserialize_with = "merge_output_prices"
    )]
    pub output: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            text_rate_per_million: default_text_rate(),
            cached_text_rate_per_million: default_cached_text_rate(),
            image_input_rate_per_million: default_image_input_rate(),
            chars_per_token: default_chars_per_token(),
            fee_multiplier: default_fee_multiplier(),
            output: default_output_prices(),
        }
    }
}

impl PricingConfig {
    /// Build the immutable table used by the cost model
    pub fn to_table(&self) -> anyhow::Result<PricingTable> {
        let mut table = PricingTable::new(
            self.text_rate_per_million,
            self.cached_text_rate_per_million,
            self.image_input_rate_per_million,
            self.chars_per_token,
            self.fee_multiplier,
        );

        for (quality, sizes) in &self.output {
            let quality: ImageQuality = quality
                .parse()
                .map_err(|e| anyhow::anyhow!("pricing.output: {}", e))?;
            if quality == ImageQuality::Auto {
                anyhow::bail!("pricing.output: 'auto' is billed from the 'high' row and cannot be priced separately");
            }
            for (size, usd) in sizes {
                let size: ImageSize = size
                    .parse()
                    .map_err(|e| anyhow::anyhow!("pricing.output.{}: {}", quality, e))?;
                if !usd.is_finite() || *usd < 0.0 {
                    anyhow::bail!("pricing.output.{}.{} must be a non-negative number", quality, size);
                }
                table = table.with_output_price(quality, size, *usd);
            }
        }

        Ok(table)
    }
}

impl From<&PricingTable> for PricingConfig {
    fn from(table: &PricingTable) -> Self {
        let mut output: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for ((quality, size), usd) in table.output_prices() {
            output
                .entry(quality.to_string())
                .or_default()
                .insert(size.to_string(), *usd);
        }
        Self {
            text_rate_per_million: table.text_rate_per_million,
            cached_text_rate_per_million: table.cached_text_rate_per_million,
            image_input_rate_per_million: table.image_input_rate_per_million,
            chars_per_token: table.chars_per_token,
            fee_multiplier: table.fee_multiplier,
            output,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Serialize concurrent misses on the same key so only one caller pays
    #[serde(default)]
    pub coalesce_in_flight: bool,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_database_path() -> String {
    "./data/billing.db".to_string()
}

fn default_cache_directory() -> String {
    "./data/artifacts".to_string()
}

fn default_cache_control() -> String {
    crate::cache::DEFAULT_CACHE_CONTROL.to_string()
}

fn default_persist_queue_size() -> usize {
    1024
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_provider_model() -> String {
    "gpt-image-1".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_text_rate() -> f64 {
    5.0
}

fn default_cached_text_rate() -> f64 {
    1.25
}

fn default_image_input_rate() -> f64 {
    10.0
}

fn default_chars_per_token() -> f64 {
    4.0
}

fn default_fee_multiplier() -> f64 {
    1.2
}

fn default_output_prices() -> BTreeMap<String, BTreeMap<String, f64>> {
    PricingConfig::from(&PricingTable::default()).output
}

fn merge_output_prices<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, BTreeMap<String, f64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let configured = BTreeMap::<String, BTreeMap<String, f64>>::deserialize(deserializer)?;
    let mut output = default_output_prices();
    for (quality, sizes) in configured {
        output.entry(quality.to_lowercase()).or_default().extend(sizes);
    }
    Ok(output)
}

/// Load `config.toml` from the working directory
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(Path::new("config.toml"))
}

/// Load configuration from `path`, overlaid with `IMAGE_GATEWAY__*` environment variables
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("IMAGE_GATEWAY").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.provider.api_key.is_empty() {
        anyhow::bail!("provider.api_key must be set");
    }

    if !cfg.provider.base_url.starts_with("http://") && !cfg.provider.base_url.starts_with("https://") {
        anyhow::bail!("provider.base_url must be an http(s) URL");
    }

    if cfg.provider.timeout_seconds == 0 {
        anyhow::bail!("provider.timeout_seconds must be greater than zero");
    }

    for key in &cfg.api_keys {
        if key.name.is_empty() {
            anyhow::bail!("API key name cannot be empty");
        }
        if key.key.is_empty() {
            anyhow::bail!("API key '{}' has an empty key", key.name);
        }
    }

    let mut names = std::collections::HashSet::new();
    for key in &cfg.api_keys {
        if !names.insert(key.name.as_str()) {
            anyhow::bail!("Duplicate API key name: {}", key.name);
        }
    }

    validate_pricing(&cfg.pricing)?;

    if cfg.limits.max_count == 0 {
        anyhow::bail!("limits.max_count must be at least 1");
    }
    if cfg.limits.max_prompt_chars == 0 {
        anyhow::bail!("limits.max_prompt_chars must be at least 1");
    }

    if cfg.cache.persist_queue_size == 0 {
        anyhow::bail!("cache.persist_queue_size must be at least 1");
    }
    if cfg.cache.backend == CacheBackend::Local && cfg.cache.directory.is_empty() {
        anyhow::bail!("cache.directory is required for the local cache backend");
    }
    if cfg.billing.backend == BillingBackend::Sqlite && cfg.billing.database_path.is_empty() {
        anyhow::bail!("billing.database_path is required for the sqlite billing backend");
    }

    Ok(())
}

/// Checked on load and again on SIGHUP reload
pub fn validate_pricing(pricing: &PricingConfig) -> anyhow::Result<()> {
    let rates = [
        ("text_rate_per_million", pricing.text_rate_per_million),
        ("cached_text_rate_per_million", pricing.cached_text_rate_per_million),
        ("image_input_rate_per_million", pricing.image_input_rate_per_million),
    ];
    for (name, rate) in rates {
        if !rate.is_finite() || rate < 0.0 {
            anyhow::bail!("pricing.{} must be a non-negative number", name);
        }
    }

    if !pricing.chars_per_token.is_finite() || pricing.chars_per_token <= 0.0 {
        anyhow::bail!("pricing.chars_per_token must be greater than zero");
    }

    if !pricing.fee_multiplier.is_finite() || pricing.fee_multiplier < 1.0 {
        anyhow::bail!("pricing.fee_multiplier must be at least 1.0");
    }

    pricing.to_table()?;
    Ok(())
}

use anyhow::Result;
use colored::Colorize;
use image_gateway::config;
use image_gateway::models::RawGenerationRequest;
use image_gateway::pricing::CostBreakdown;
use std::path::Path;

/// Arguments of the quote command
#[derive(Debug, Clone)]
pub struct QuoteArgs {
    pub quality: String,
    pub size: String,
    pub n: u32,
    pub cached_text_tokens: Option<u64>,
    pub input_image_tokens: Option<u64>,
    pub prompt: String,
}

/// Execute the quote command
///
/// Prices a request with the configured table. Nothing is charged or generated.
pub fn execute(config_path: &Path, args: QuoteArgs) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;
    let table = cfg.pricing.to_table()?;

    let request = RawGenerationRequest {
        prompt: args.prompt,
        size: args.size,
        quality: args.quality,
        n: Some(args.n),
        cached_text_tokens: args.cached_text_tokens,
        input_image_tokens: args.input_image_tokens,
    }
    .validate(&cfg.limits)?;

    let cost = table.estimate_cost(&request);

    println!("{}", "Quote".green().bold());
    println!("  {}: {}", "Key".cyan(), request.cache_key());
    println!(
        "  {}: {} {} x{}",
        "Request".cyan(),
        request.quality(),
        request.size(),
        request.count()
    );
    print_breakdown(&cost);

    Ok(())
}

fn print_breakdown(cost: &CostBreakdown) {
    println!(
        "  {}: {} ({} cached)",
        "Text tokens".cyan(),
        cost.text_tokens,
        cost.cached_text_tokens
    );
    println!("  {}: ${:.6}", "Text input".cyan(), cost.text_input_cost);
    println!("  {}: ${:.6}", "Image input".cyan(), cost.image_input_cost);
    if cost.output_price_missing {
        println!("  {}: {}", "Image output".cyan(), "no price configured, billed at $0".yellow());
    } else {
        println!("  {}: ${:.6}", "Image output".cyan(), cost.image_output_cost);
    }
    println!(
        "  {}: ${:.6} x {} = ${:.6}",
        "Total".cyan(),
        cost.subtotal,
        cost.fee_multiplier,
        cost.total_usd
    );
    println!(
        "  {}: {}",
        "Charge".bold(),
        format!("{} cents", cost.total_charge_cents).green().bold()
    );
}

use anyhow::{bail, Result};
use colored::Colorize;
use image_gateway::billing::SqliteBillingGate;
use image_gateway::config::{self, BillingBackend};
use image_gateway::logging::SensitiveApiKey;
use std::path::Path;
use tracing::info;

use crate::cli::AccountCommands;

/// Execute an account subcommand against the configured SQLite ledger
pub async fn execute(config_path: &Path, action: AccountCommands) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;
    if cfg.billing.backend != BillingBackend::Sqlite {
        bail!("Account commands require billing.backend = \"sqlite\"; the memory backend is rebuilt from [[api_keys]] on every start");
    }

    let ledger = SqliteBillingGate::connect(&cfg.billing.database_path).await?;

    match action {
        AccountCommands::Create { name, key, balance } => {
            if name.is_empty() || key.is_empty() {
                bail!("Account name and key must not be empty");
            }
            if !ledger.create_account(&name, &key, balance).await? {
                bail!("Account '{}' already exists", name);
            }
            info!(account = %name, key = %SensitiveApiKey::new(&key), "Account created");
            println!(
                "{} {} ({} cents)",
                "✓ Created account".green(),
                name.bold(),
                balance
            );
        }
        AccountCommands::Credit { name, amount } => match ledger.credit(&name, amount).await? {
            Some(balance) => {
                info!(account = %name, amount, balance, "Account credited");
                println!(
                    "{} {} cents to {}; balance {} cents",
                    "✓ Credited".green(),
                    amount,
                    name.bold(),
                    balance
                );
            }
            None => bail!("Unknown account: {}", name),
        },
        AccountCommands::Balance { name } => match ledger.balance(&name).await? {
            Some(balance) => {
                let charged = ledger.total_charged(&name).await?;
                let rendered = if balance > 0 {
                    format!("{} cents", balance).green()
                } else {
                    format!("{} cents", balance).red()
                };
                println!("{}: {}", name.bold(), rendered);
                println!("  Total charged: {} cents", charged);
            }
            None => bail!("Unknown account: {}", name),
        },
    }

    Ok(())
}

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use crate::config::{load_config_from, validate_pricing};
use crate::pricing::CostCalculator;

/// Shutdown signal types
#[derive(Debug, Clone, Copy)]
pub enum ShutdownSignal {
    /// Graceful shutdown (stop accepting, drain write-backs)
    Graceful,
}

/// Setup signal handlers for the server
///
/// Handles:
/// - SIGTERM/SIGINT: Graceful shutdown
/// - SIGHUP: Pricing reload from `config_path`
#[cfg(unix)]
pub fn setup_signal_handlers(
    config_path: PathBuf,
    costs: Arc<CostCalculator>,
) -> Result<(broadcast::Sender<ShutdownSignal>, tokio::task::JoinHandle<()>)> {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, initiating graceful shutdown");
                    let _ = tx_clone.send(ShutdownSignal::Graceful);
                    break;
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, initiating graceful shutdown");
                    let _ = tx_clone.send(ShutdownSignal::Graceful);
                    break;
                }
                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading pricing");
                    if let Err(e) = reload_pricing(&config_path, &costs) {
                        error!("Failed to reload pricing, keeping current table: {}", e);
                    }
                }
            }
        }
    });

    Ok((shutdown_tx, handle))
}

/// Windows placeholder - only Ctrl+C is supported
#[cfg(not(unix))]
pub fn setup_signal_handlers(
    _config_path: PathBuf,
    _costs: Arc<CostCalculator>,
) -> Result<(broadcast::Sender<ShutdownSignal>, tokio::task::JoinHandle<()>)> {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, initiating shutdown");
                let _ = tx_clone.send(ShutdownSignal::Graceful);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });

    Ok((shutdown_tx, handle))
}

/// Re-read `[pricing]` and swap it in atomically.
///
/// On any error the current table stays in place. Other sections are not
/// reloaded; changing them requires a restart.
pub fn reload_pricing(config_path: &Path, costs: &CostCalculator) -> Result<()> {
    let new_config = load_config_from(config_path)?;
    validate_pricing(&new_config.pricing)?;
    let table = new_config.pricing.to_table()?;

    info!(
        fee_multiplier = table.fee_multiplier,
        output_prices = table.output_prices().count(),
        "New pricing loaded"
    );
    costs.replace_table(table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationRequest, ImageQuality, ImageSize, RequestLimits};
    use std::io::Write;

    fn write_config(file: &mut tempfile::NamedTempFile, fee: &str) {
        let body = format!(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[provider]
api_key = "sk-upstream"

[pricing]
fee_multiplier = {}
"#,
            fee
        );
        file.write_all(body.as_bytes()).unwrap();
    }

    fn cat() -> GenerationRequest {
        GenerationRequest::new("cat", ImageSize::Square, ImageQuality::Low, 1, &RequestLimits::default())
            .unwrap()
    }

    #[test]
    fn test_reload_pricing_swaps_table() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, "3.0");

        let costs = CostCalculator::default();
        assert_eq!(costs.estimate_cost(&cat()).total_charge_cents, 2);

        reload_pricing(file.path(), &costs).unwrap();
        assert_eq!(costs.table().fee_multiplier, 3.0);
        // (0.011 + 0.000005) * 3.0 rounds up to 4 cents
        assert_eq!(costs.estimate_cost(&cat()).total_charge_cents, 4);
    }

    #[test]
    fn test_invalid_reload_keeps_current_table() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write_config(&mut file, "0.5");

        let costs = CostCalculator::default();
        assert!(reload_pricing(file.path(), &costs).is_err());
        assert_eq!(costs.table().fee_multiplier, 1.2);
    }

    #[tokio::test]
    async fn test_setup_signal_handlers() {
        let (shutdown_tx, _handle) =
            setup_signal_handlers(PathBuf::from("config.toml"), Arc::new(CostCalculator::default()))
                .unwrap();

        let mut rx = shutdown_tx.subscribe();
        shutdown_tx.send(ShutdownSignal::Graceful).unwrap();

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ShutdownSignal::Graceful));
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "image-gateway", version, about = "Metered image generation gateway")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the gateway server (default)
    Start,

    /// Test configuration file validity
    Test,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Price a request with the configured pricing table
    Quote {
        /// Quality tier: low, medium, high, auto
        #[arg(short, long, default_value = "auto")]
        quality: String,

        /// Image size: 1024x1024, 1024x1536, 1536x1024
        #[arg(short, long, default_value = "1024x1024")]
        size: String,

        /// Number of images
        #[arg(short, long, default_value = "1")]
        n: u32,

        /// Prompt tokens already cached upstream
        #[arg(long)]
        cached_text_tokens: Option<u64>,

        /// Tokens of input images
        #[arg(long)]
        input_image_tokens: Option<u64>,

        /// Prompt text
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },

    /// Manage accounts in the SQLite billing ledger
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration (with secrets masked)
    Show,

    /// Validate configuration file
    Validate,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AccountCommands {
    /// Create an account bound to an API key
    Create {
        /// Account name
        name: String,

        /// API key the account is charged through
        #[arg(short, long)]
        key: String,

        /// Starting balance in cents
        #[arg(short, long, default_value = "0")]
        balance: i64,
    },

    /// Add funds to an account
    Credit {
        /// Account name
        name: String,

        /// Amount in cents
        amount: i64,
    },

    /// Show an account's balance
    Balance {
        /// Account name
        name: String,
    },
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_start() {
        let cli = Cli {
            config: PathBuf::from("config.toml"),
            command: None,
        };

        assert!(matches!(cli.get_command(), Commands::Start));
    }

    #[test]
    fn test_cli_parsing_global_config() {
        let cli = Cli::try_parse_from(["image-gateway", "test", "--config", "/etc/gw.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/gw.toml"));
        assert!(matches!(cli.get_command(), Commands::Test));
    }

    #[test]
    fn test_cli_parsing_quote() {
        let cli = Cli::try_parse_from([
            "image-gateway",
            "quote",
            "--quality",
            "low",
            "-n",
            "2",
            "a",
            "red",
            "fox",
        ])
        .unwrap();

        match cli.get_command() {
            Commands::Quote {
                quality,
                size,
                n,
                prompt,
                ..
            } => {
                assert_eq!(quality, "low");
                assert_eq!(size, "1024x1024");
                assert_eq!(n, 2);
                assert_eq!(prompt.join(" "), "a red fox");
            }
            _ => panic!("Expected Quote command"),
        }
    }

    #[test]
    fn test_cli_parsing_account_credit() {
        let cli = Cli::try_parse_from(["image-gateway", "account", "credit", "alice", "500"]).unwrap();

        match cli.get_command() {
            Commands::Account {
                action: AccountCommands::Credit { name, amount },
            } => {
                assert_eq!(name, "alice");
                assert_eq!(amount, 500);
            }
            _ => panic!("Expected Account Credit command"),
        }
    }

    #[test]
    fn test_cli_parsing_config_show() {
        let cli = Cli::try_parse_from(["image-gateway", "config", "show"]).unwrap();

        match cli.get_command() {
            Commands::Config { action } => {
                assert!(matches!(action, ConfigCommands::Show));
            }
            _ => panic!("Expected Config command"),
        }
    }
}

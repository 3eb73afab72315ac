use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use image_gateway::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.get_command();

    // The server configures tracing itself once [server] log settings are loaded
    if !matches!(command, cli::Commands::Start) {
        init_tracing();
    }

    match command {
        cli::Commands::Start => {
            commands::start::execute(&args.config).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(&args.config)?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Quote {
            quality,
            size,
            n,
            cached_text_tokens,
            input_image_tokens,
            prompt,
        } => {
            commands::quote::execute(
                &args.config,
                commands::quote::QuoteArgs {
                    quality,
                    size,
                    n,
                    cached_text_tokens,
                    input_image_tokens,
                    prompt: prompt.join(" "),
                },
            )?;
        }
        cli::Commands::Account { action } => {
            commands::account::execute(&args.config, action).await?;
        }
        cli::Commands::Version => {
            println!("Image Gateway v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

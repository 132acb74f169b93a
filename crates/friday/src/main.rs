//! friday - Home Assistant voice assistant CLI
//!
//! Diagnostics, an interactive console and an MCP tool server built on
//! friday-core.

use anyhow::{Context, Result};
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};
use friday_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load().context("Failed to load configuration")?;
    if cli.verbose {
        config.logging.level = "DEBUG".to_string();
    }

    // Initialize tracing
    friday_core::logging::init(&config.logging, "friday")?;

    // Execute command
    match cli.command {
        Commands::Console => commands::console::execute(&config).await,
        Commands::Health { json } => commands::health::execute(json, &config).await,
        Commands::Tools { json } => commands::tools::execute(json, &config).await,
        Commands::Call { tool, args } => commands::call::execute(&tool, args.as_deref(), &config).await,
        Commands::Serve => commands::serve::execute(&config).await,
        Commands::Token { room, identity } => {
            commands::token::execute(&room, identity.as_deref(), &config).await
        }
        Commands::Version => {
            println!("friday {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

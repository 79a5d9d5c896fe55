//! Candle Sync CLI
//!
//! Provides commands for:
//! - `db check`: Apply additive schema migrations and exit
//! - `db stats`: Show per-pair candle statistics
//! - `collect`: Run the ingestion scheduler until Ctrl+C
//! - `fetch`: Fetch one range on demand

use anyhow::{anyhow, Result};
use clap::Parser;

use candle_sync::cli::{Cli, Commands};
use candle_sync::config::Settings;
use market_common::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    init_logging(LogConfig::for_crates(&["candle_sync", "market_common"]))
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    let settings = Settings::load()?;

    // Execute command
    match cli.command {
        Commands::Db(cmd) => {
            candle_sync::cli::db::execute(cmd, &settings).await?;
        }
        Commands::Collect(args) => {
            candle_sync::cli::collect::execute(args, &settings).await?;
        }
        Commands::Fetch(args) => {
            candle_sync::cli::fetch::execute(args, &settings).await?;
        }
    }

    Ok(())
}

//! Command-line interface
//!
//! Provides CLI commands for the candle collector.

pub mod collect;
pub mod db;
pub mod fetch;

use clap::{Parser, Subcommand};

/// Candle Sync CLI
#[derive(Parser)]
#[command(name = "candle-sync")]
#[command(about = "Incremental exchange candlestick synchronization")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Database operations
    #[command(subcommand)]
    Db(db::DbCommands),
    /// Run the ingestion scheduler
    Collect(collect::CollectArgs),
    /// Fetch one range on demand
    Fetch(fetch::FetchArgs),
}

//! Collect command - run the ingestion scheduler

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use super::db;
use crate::config::Settings;
use crate::provider::BinanceSource;
use crate::scheduler::{IngestionScheduler, ShutdownSignal};
use crate::schema::SyncMode;

/// Arguments for the collect command
#[derive(Args)]
pub struct CollectArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Schema script (defaults to `schema.path` from settings)
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Override the configured symbol allow-list (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

/// Execute the collect command
pub async fn execute(args: CollectArgs, settings: &Settings) -> Result<()> {
    let schema_path = args.schema.unwrap_or_else(|| settings.schema.path.clone());
    let (store, report) = db::migrate(settings, &schema_path, SyncMode::Apply).await?;
    if !report.is_noop() {
        info!(
            "Schema updated: {} tables created, {} columns added",
            report.created_tables.len(),
            report.added_columns.len()
        );
    }

    let source = BinanceSource::new(&settings.binance)?;

    let mut collector = settings.collector.clone();
    if !args.symbols.is_empty() {
        collector.symbols = args.symbols;
    }
    let scheduler = IngestionScheduler::new(Arc::new(store), Arc::new(source), collector);

    // Set up shutdown handling
    let (shutdown_tx, mut shutdown) = ShutdownSignal::channel();

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                let _ = shutdown_tx_clone.send(());
            }
            Err(e) => error!("Failed to listen for ctrl+c: {}", e),
        }
    });

    if args.once {
        let report = scheduler.run_cycle(&mut shutdown).await;
        if report.enumeration_failed {
            bail!("Could not enumerate tradable symbols");
        }
    } else {
        scheduler.run(shutdown).await;
    }

    drop(shutdown_tx);
    Ok(())
}

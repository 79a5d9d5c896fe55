//! Database management commands

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Settings;
use crate::schema::{synchronize_postgres, SchemaModel, SyncMode, SyncReport};
use crate::storage::{CandleStore, PgCandleStore};

/// Database subcommands
#[derive(Subcommand)]
pub enum DbCommands {
    /// Apply additive schema migrations and exit
    Check(CheckArgs),
    /// Show per-pair candle statistics
    Stats(StatsArgs),
}

/// Arguments for check command
#[derive(Args)]
pub struct CheckArgs {
    /// Schema script (defaults to `schema.path` from settings)
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Report what would change, then roll back
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for stats command
#[derive(Args)]
pub struct StatsArgs {
    /// Only show this symbol
    #[arg(long, short)]
    pub symbol: Option<String>,
}

/// Execute database commands
pub async fn execute(cmd: DbCommands, settings: &Settings) -> Result<()> {
    match cmd {
        DbCommands::Check(args) => execute_check(args, settings).await,
        DbCommands::Stats(args) => execute_stats(args, settings).await,
    }
}

/// Connect, synchronize the schema, and ensure the candle key index
///
/// Shared by `db check` and `collect`; any failure aborts startup.
pub async fn migrate(
    settings: &Settings,
    schema_path: &Path,
    mode: SyncMode,
) -> Result<(PgCandleStore, SyncReport)> {
    let model = SchemaModel::from_path(schema_path)
        .with_context(|| format!("Failed to load schema {}", schema_path.display()))?;
    if model.is_empty() {
        warn!("{} declares no tables", schema_path.display());
    }

    let store = PgCandleStore::from_settings(&settings.database, settings.storage.batch_insert_size)
        .await
        .with_context(|| format!("Failed to connect to {}", settings.database.redacted_url()))?;

    info!("Synchronizing schema from {}...", schema_path.display());
    let report = synchronize_postgres(store.pool(), &model, mode)
        .await
        .context("Schema migration failed")?;

    match mode {
        SyncMode::Apply => store.ensure_indexes().await?,
        SyncMode::DryRun => info!("Dry run: unique index check skipped"),
    }

    Ok((store, report))
}

async fn execute_check(args: CheckArgs, settings: &Settings) -> Result<()> {
    let schema_path = args.schema.unwrap_or_else(|| settings.schema.path.clone());
    let mode = if args.dry_run {
        SyncMode::DryRun
    } else {
        SyncMode::Apply
    };

    let (_store, report) = migrate(settings, &schema_path, mode).await?;

    let verb = if args.dry_run { "Would create" } else { "Created" };
    if report.is_noop() {
        info!("Schema is up to date");
    }
    for table in &report.created_tables {
        info!("  {} table {}", verb, table);
    }
    let verb = if args.dry_run { "Would add" } else { "Added" };
    for (table, column) in &report.added_columns {
        info!("  {} column {}.{}", verb, table, column);
    }

    Ok(())
}

async fn execute_stats(args: StatsArgs, settings: &Settings) -> Result<()> {
    let store =
        PgCandleStore::from_settings(&settings.database, settings.storage.batch_insert_size)
            .await?;

    info!("Fetching candle statistics...");
    let stats = store.pair_stats().await?;
    let wanted = args.symbol.map(|s| s.to_uppercase());

    let mut total_rows = 0u64;
    let mut pairs = 0usize;
    for pair in stats
        .iter()
        .filter(|p| wanted.as_deref().map_or(true, |s| p.symbol == s))
    {
        total_rows += pair.row_count;
        pairs += 1;
        info!(
            "  {} {}: {} candles ({} - {})",
            pair.symbol, pair.interval, pair.row_count, pair.earliest_open, pair.latest_open
        );
    }

    info!("Total: {} candles across {} pairs", total_rows, pairs);
    Ok(())
}

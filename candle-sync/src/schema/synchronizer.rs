//! Additive schema synchronization

use sqlx::PgPool;
use tracing::info;

use super::{MemoryCatalog, PgCatalog, SchemaCatalog, SchemaError, SchemaModel};

/// Whether a PostgreSQL pass keeps its changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Apply,
    /// Run the pass, report it, then roll it back
    DryRun,
}

/// Changes made by one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created_tables: Vec<String>,
    /// `(table, column)` pairs
    pub added_columns: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.created_tables.is_empty() && self.added_columns.is_empty()
    }
}

/// Reconciles a [`SchemaModel`] against a live catalog
///
/// Missing tables are created with their declared statement; missing columns on
/// existing tables are added. Extra tables and columns in the catalog are left
/// alone, so a second pass over the same model is a no-op.
pub struct SchemaSynchronizer<'a> {
    model: &'a SchemaModel,
}

impl<'a> SchemaSynchronizer<'a> {
    pub fn new(model: &'a SchemaModel) -> Self {
        Self { model }
    }

    /// Run one pass against `catalog`
    ///
    /// The first failing statement aborts the pass; the caller owns the unit of
    /// work and must not commit it after an error.
    pub async fn run<C>(&self, catalog: &mut C) -> Result<SyncReport, SchemaError>
    where
        C: SchemaCatalog + ?Sized,
    {
        let mut report = SyncReport::default();

        for table in self.model.tables() {
            if !catalog.table_exists(&table.name).await? {
                catalog.execute_ddl(&table.create_statement).await?;
                info!(table = %table.name, "Created table");
                report.created_tables.push(table.name.clone());
                continue;
            }

            let existing = catalog.column_names(&table.name).await?;
            for column in table.columns.iter().filter(|c| !existing.contains(&c.name)) {
                catalog.execute_ddl(&table.add_column_statement(column)).await?;
                info!(table = %table.name, column = %column.name, "Added column");
                report
                    .added_columns
                    .push((table.name.clone(), column.name.clone()));
            }
        }

        Ok(report)
    }

    /// Run one pass against an in-memory catalog, all or nothing
    pub async fn run_in_memory(&self, catalog: &mut MemoryCatalog) -> Result<SyncReport, SchemaError> {
        let mut tx = catalog.begin()?;
        let report = self.run(&mut tx).await?;
        tx.commit();
        Ok(report)
    }
}

/// Synchronize `model` into PostgreSQL inside one transaction
///
/// Any failure rolls back the whole pass. With [`SyncMode::DryRun`] the pass is
/// rolled back even on success and the report describes what would change.
pub async fn synchronize_postgres(
    pool: &PgPool,
    model: &SchemaModel,
    mode: SyncMode,
) -> Result<SyncReport, SchemaError> {
    let mut catalog = PgCatalog::begin(pool).await?;
    let report = SchemaSynchronizer::new(model).run(&mut catalog).await?;

    match mode {
        SyncMode::Apply => catalog.commit().await?,
        SyncMode::DryRun => catalog.rollback().await?,
    }

    info!(
        created_tables = report.created_tables.len(),
        added_columns = report.added_columns.len(),
        dry_run = mode == SyncMode::DryRun,
        "Schema synchronization finished"
    );
    Ok(report)
}

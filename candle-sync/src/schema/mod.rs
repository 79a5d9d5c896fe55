//! Declarative schema model and additive synchronization
//!
//! A schema script made of `CREATE TABLE IF NOT EXISTS` blocks is parsed into a
//! [`SchemaModel`]; the [`SchemaSynchronizer`] reconciles that model against a live
//! [`SchemaCatalog`], creating missing tables and adding missing columns. Nothing
//! is ever dropped or redefined.

mod catalog;
mod memory;
mod parser;
mod synchronizer;

pub use catalog::{PgCatalog, SchemaCatalog, SchemaError};
pub use memory::{MemoryCatalog, MemoryTransaction};
pub use parser::{ColumnDef, SchemaModel, SchemaParser, TableDef};
pub use synchronizer::{synchronize_postgres, SchemaSynchronizer, SyncMode, SyncReport};

//! Live catalog access

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

use market_common::{ErrorCategory, ErrorClassification};

/// Schema parsing and synchronization errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read schema {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("DDL rejected ({statement}): {reason}")]
    Ddl { statement: String, reason: String },
}

impl ErrorClassification for SchemaError {
    fn category(&self) -> ErrorCategory {
        match self {
            SchemaError::Io { .. } => ErrorCategory::Configuration,
            SchemaError::Pattern(_) => ErrorCategory::Internal,
            // A migration pass is never retried automatically
            SchemaError::Database(_) => ErrorCategory::Permanent,
            SchemaError::Ddl { .. } => ErrorCategory::Permanent,
        }
    }
}

/// Catalog operations the synchronizer needs
///
/// Implementations hold one unit of work: nothing they execute becomes visible
/// until the owner commits it.
#[async_trait]
pub trait SchemaCatalog: Send {
    async fn table_exists(&mut self, table: &str) -> Result<bool, SchemaError>;

    /// Names of the columns currently defined on `table`
    async fn column_names(&mut self, table: &str) -> Result<HashSet<String>, SchemaError>;

    async fn execute_ddl(&mut self, statement: &str) -> Result<(), SchemaError>;
}

/// PostgreSQL catalog inside a single transaction
///
/// PostgreSQL DDL is transactional, so dropping this without [`PgCatalog::commit`]
/// rolls back every statement executed through it.
pub struct PgCatalog {
    tx: Transaction<'static, Postgres>,
}

impl PgCatalog {
    pub async fn begin(pool: &PgPool) -> Result<Self, SchemaError> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn commit(self) -> Result<(), SchemaError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), SchemaError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for PgCatalog {
    async fn table_exists(&mut self, table: &str) -> Result<bool, SchemaError> {
        let regclass: Option<String> =
            sqlx::query_scalar("SELECT to_regclass(quote_ident($1))::text")
                .bind(table)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(regclass.is_some())
    }

    async fn column_names(&mut self, table: &str) -> Result<HashSet<String>, SchemaError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = $1
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(names.into_iter().collect())
    }

    async fn execute_ddl(&mut self, statement: &str) -> Result<(), SchemaError> {
        // Single statement without binds; the extended protocol accepts DDL
        sqlx::query(statement).execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_errors_are_not_retried() {
        let err = SchemaError::Ddl {
            statement: "ALTER TABLE x ADD COLUMN y".into(),
            reason: "syntax error".into(),
        };
        assert!(err.is_permanent());
        assert!(!err.is_transient());

        let io = SchemaError::Io {
            path: PathBuf::from("sql/init.sql"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(io.category(), ErrorCategory::Configuration);
        assert!(io.to_string().contains("sql/init.sql"));
    }
}

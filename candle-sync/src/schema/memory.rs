//! In-memory catalog
//!
//! Interprets the two statement shapes the synchronizer emits (the declared
//! `CREATE TABLE IF NOT EXISTS` and `ALTER TABLE .. ADD COLUMN`) so migrations can
//! be exercised without a database.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use super::{SchemaCatalog, SchemaError, SchemaParser};

type Tables = BTreeMap<String, Vec<String>>;

/// Table name → ordered column names
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tables: Tables,
    executed: Vec<String>,
    fail_on: Option<String>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing table
    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables.insert(
            name.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Reject any statement containing `fragment`
    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.fail_on = Some(fragment.to_string());
        self
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(|c| c.as_slice())
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }

    /// Statements from committed transactions
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Start a unit of work over a staged copy of the catalog
    pub fn begin(&mut self) -> Result<MemoryTransaction<'_>, SchemaError> {
        let staged = self.tables.clone();
        Ok(MemoryTransaction {
            parser: SchemaParser::new()?,
            alter: Regex::new(
                r#"(?is)^\s*ALTER\s+TABLE\s+("?)(\w+)"?\s+ADD\s+COLUMN\s+("?)(\w+)"?"#,
            )?,
            staged,
            statements: Vec::new(),
            catalog: self,
        })
    }
}

/// Staged changes against a [`MemoryCatalog`]; dropped without commit they vanish
pub struct MemoryTransaction<'a> {
    catalog: &'a mut MemoryCatalog,
    staged: Tables,
    statements: Vec<String>,
    parser: SchemaParser,
    alter: Regex,
}

impl MemoryTransaction<'_> {
    pub fn commit(self) {
        self.catalog.tables = self.staged;
        self.catalog.executed.extend(self.statements);
    }

    fn reject(statement: &str, reason: impl Into<String>) -> SchemaError {
        SchemaError::Ddl {
            statement: statement.to_string(),
            reason: reason.into(),
        }
    }

    fn apply_alter(&mut self, statement: &str) -> Result<bool, SchemaError> {
        let Some(caps) = self.alter.captures(statement) else {
            return Ok(false);
        };
        let ident = |quote: Option<regex::Match>, name: Option<regex::Match>| {
            let name = name.map(|m| m.as_str()).unwrap_or_default();
            if quote.is_some_and(|q| !q.as_str().is_empty()) {
                name.to_string()
            } else {
                name.to_lowercase()
            }
        };
        let table = ident(caps.get(1), caps.get(2));
        let column = ident(caps.get(3), caps.get(4));

        let columns = self
            .staged
            .get_mut(&table)
            .ok_or_else(|| Self::reject(statement, format!("relation \"{}\" does not exist", table)))?;
        if columns.contains(&column) {
            return Err(Self::reject(
                statement,
                format!("column \"{}\" of relation \"{}\" already exists", column, table),
            ));
        }
        columns.push(column);
        Ok(true)
    }

    fn apply_create(&mut self, statement: &str) -> bool {
        let model = self.parser.parse(statement);
        let Some(table) = model.tables().first() else {
            return false;
        };
        self.staged.entry(table.name.clone()).or_insert_with(|| {
            table.columns.iter().map(|c| c.name.clone()).collect()
        });
        true
    }
}

#[async_trait]
impl SchemaCatalog for MemoryTransaction<'_> {
    async fn table_exists(&mut self, table: &str) -> Result<bool, SchemaError> {
        Ok(self.staged.contains_key(table))
    }

    async fn column_names(&mut self, table: &str) -> Result<HashSet<String>, SchemaError> {
        Ok(self
            .staged
            .get(table)
            .map(|cols| cols.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn execute_ddl(&mut self, statement: &str) -> Result<(), SchemaError> {
        if let Some(fragment) = &self.catalog.fail_on {
            if statement.contains(fragment.as_str()) {
                return Err(Self::reject(statement, "injected failure"));
            }
        }
        if !self.apply_alter(statement)? && !self.apply_create(statement) {
            return Err(Self::reject(statement, "unsupported statement"));
        }
        self.statements.push(statement.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let mut catalog = MemoryCatalog::new();
        {
            let mut tx = catalog.begin().unwrap();
            tx.execute_ddl("CREATE TABLE IF NOT EXISTS t (a INT);").await.unwrap();
            assert!(tx.table_exists("t").await.unwrap());
        }
        assert!(!catalog.has_table("t"));
        assert!(catalog.executed().is_empty());
    }

    #[tokio::test]
    async fn test_commit_applies_create_and_alter() {
        let mut catalog = MemoryCatalog::new();
        let mut tx = catalog.begin().unwrap();
        tx.execute_ddl("CREATE TABLE IF NOT EXISTS t (a INT);").await.unwrap();
        tx.execute_ddl("ALTER TABLE \"t\" ADD COLUMN b TEXT").await.unwrap();
        tx.commit();

        assert_eq!(catalog.columns("t").unwrap(), ["a".to_string(), "b".to_string()]);
        assert_eq!(catalog.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_column_rejected() {
        let mut catalog = MemoryCatalog::new().with_table("t", &["a"]);
        let mut tx = catalog.begin().unwrap();
        let err = tx.execute_ddl("ALTER TABLE t ADD COLUMN a INT").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mut catalog = MemoryCatalog::new().fail_on("bogus");
        let mut tx = catalog.begin().unwrap();
        assert!(tx.execute_ddl("ALTER TABLE t ADD COLUMN bogus INT").await.is_err());
        assert!(tx.execute_ddl("DROP TABLE t").await.is_err());
    }
}

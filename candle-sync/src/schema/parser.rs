//! Schema script parser
//!
//! Recognizes `CREATE TABLE IF NOT EXISTS <name> ( ... );` blocks and turns each
//! one into a [`TableDef`]. Parsing is structural only; SQL validity is left to
//! the database.

use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

use super::SchemaError;

/// Leading keywords of table-level constraint entries
const TABLE_CONSTRAINT_KEYWORDS: &[&str] =
    &["FOREIGN", "PRIMARY", "UNIQUE", "CONSTRAINT", "CHECK", "EXCLUDE"];

/// One column of a declared table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name as the catalog reports it
    pub name: String,
    /// Full definition fragment (`volume NUMERIC(20, 8) NOT NULL`)
    pub definition: String,
}

/// One declared table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    /// Creation statement, executed only when the table is absent
    pub create_statement: String,
    /// Alterable columns in declaration order
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Statement that adds `column` to an existing table
    pub fn add_column_statement(&self, column: &ColumnDef) -> String {
        format!("ALTER TABLE {} ADD COLUMN {}", quote_identifier(&self.name), column.definition)
    }
}

/// Expected tables, in the order the script declares them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaModel {
    tables: Vec<TableDef>,
}

impl SchemaModel {
    /// Parse a schema script
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        Ok(SchemaParser::new()?.parse(text))
    }

    /// Read and parse a schema script from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Parsing schema from {}", path.display());
        Self::parse(&text)
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Add a table; a later declaration of the same name replaces the earlier one
    fn insert(&mut self, table: TableDef) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }
}

/// Compiled block recognizer
#[derive(Debug, Clone)]
pub struct SchemaParser {
    header: Regex,
}

impl SchemaParser {
    pub fn new() -> Result<Self, SchemaError> {
        let header = Regex::new(
            r#"(?i)CREATE\s+TABLE\s+IF\s+NOT\s+EXISTS\s+((?:[`"]?\w+[`"]?\s*\.\s*)?)([`"]?)(\w+)[`"]?\s*\("#,
        )?;
        Ok(Self { header })
    }

    /// Parse every table block in `text`
    ///
    /// A block runs from its header to the matching close paren, so literals
    /// containing `);` stay inside the body. A script without any block yields
    /// an empty model and a warning.
    pub fn parse(&self, text: &str) -> SchemaModel {
        let text = strip_line_comments(text);
        let mut model = SchemaModel::default();
        let mut pos = 0;

        while let Some(caps) = self.header.captures_at(&text, pos) {
            let (Some(header), Some(name)) = (caps.get(0), caps.get(3)) else {
                break;
            };
            let body_start = header.end();
            let Some(body_end) = matching_close_paren(&text[body_start..]).map(|i| body_start + i)
            else {
                warn!("Unterminated table block at offset {}; ignoring the rest", header.start());
                break;
            };

            let rest = &text[body_end + 1..];
            let statement_end = match rest.trim_start().strip_prefix(';') {
                Some(after) => text.len() - after.len(),
                None => body_end + 1,
            };
            pos = statement_end;

            let qualifier = caps.get(1).map_or("", |q| q.as_str().trim());
            if !qualifier.is_empty() {
                warn!(
                    "Skipping schema-qualified table {}{}; only unqualified names are synchronized",
                    qualifier,
                    name.as_str()
                );
                continue;
            }

            let quoted = caps.get(2).is_some_and(|q| !q.as_str().is_empty());
            let name = if quoted {
                name.as_str().to_string()
            } else {
                name.as_str().to_lowercase()
            };

            let columns: Vec<ColumnDef> = split_top_level(&text[body_start..body_end])
                .into_iter()
                .filter_map(parse_column)
                .collect();

            debug!("Parsed table {} with {} columns", name, columns.len());
            model.insert(TableDef {
                name,
                create_statement: requote_backticks(text[header.start()..statement_end].trim()),
                columns,
            });
        }

        if model.is_empty() {
            warn!("Schema contains no CREATE TABLE IF NOT EXISTS blocks; nothing to synchronize");
        }
        model
    }
}

/// Quote an already-normalized identifier for PostgreSQL
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fold an identifier the way PostgreSQL does
fn normalize_identifier(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'`' && last == b'`') {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    raw.to_lowercase()
}

/// Split off the leading identifier of a column entry, honoring quotes
fn leading_identifier(entry: &str) -> Option<&str> {
    let entry = entry.trim_start();
    let first = entry.chars().next()?;
    if first == '"' || first == '`' {
        let close = entry[1..].find(first)?;
        return Some(&entry[..close + 2]);
    }
    entry.split_whitespace().next()
}

fn parse_column(entry: String) -> Option<ColumnDef> {
    let raw_name = leading_identifier(&entry)?;
    let quoted = raw_name.starts_with('"') || raw_name.starts_with('`');
    if !quoted
        && TABLE_CONSTRAINT_KEYWORDS
            .iter()
            .any(|kw| raw_name.eq_ignore_ascii_case(kw))
    {
        return None;
    }

    let definition = requote_backticks(entry.trim());

    Some(ColumnDef {
        name: normalize_identifier(raw_name),
        definition,
    })
}

/// Byte offset of the `)` closing a body that starts just after its `(`
fn matching_close_paren(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, ch) in body.char_indices() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '(' => depth += 1,
                ')' if depth == 0 => return Some(idx),
                ')' => depth -= 1,
                _ => {}
            },
        }
    }
    None
}

/// Turn backtick-quoted identifiers into double-quoted ones, leaving string
/// literals untouched
fn requote_backticks(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '`' if !in_literal => out.push('"'),
            _ => out.push(ch),
        }
    }
    out
}

/// Split a table body on commas that are not nested in parentheses or quotes
fn split_top_level(body: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in body.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                current.push(ch);
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '(' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                ',' if depth == 0 => {
                    entries.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    entries.push(current);

    entries
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Drop `--` comments that are not inside a string literal
fn strip_line_comments(text: &str) -> String {
    text.lines()
        .map(|line| {
            let mut in_literal = false;
            let mut prev = '\0';
            for (idx, ch) in line.char_indices() {
                match ch {
                    '\'' => in_literal = !in_literal,
                    '-' if prev == '-' && !in_literal => return &line[..idx - 1],
                    _ => {}
                }
                prev = ch;
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

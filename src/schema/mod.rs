//! Declarative schema DSL that compiles table declarations to SQLite DDL.
//!
//! A [`Table`] is an ordered list of typed columns plus secondary indexes; a
//! [`VirtualTable`] is an FTS5 full-text index whose columns carry BM25 rank
//! weights. Compilation is a pure function of the declaration, so the same
//! declaration always yields byte-identical statements. [`Schema::hash`]
//! relies on that to detect stores created from a different layout.
//!
//! # Example
//!
//! ```
//! use kanjisync::schema::{Column, ColumnType, Index, Table};
//!
//! let table = Table::new("ledger")
//!     .column(Column::new("category", ColumnType::Text).not_null().primary_key())
//!     .column(Column::new("last_update_at", ColumnType::Text))
//!     .index(Index::new("idx_ledger_update", ["last_update_at"]));
//!
//! assert_eq!(
//!     table.ddl()[0],
//!     "CREATE TABLE ledger (category TEXT NOT NULL, last_update_at TEXT, PRIMARY KEY (category))"
//! );
//! ```

pub mod tables;

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// FTS5 tokenizer used by every virtual table.
const FTS_TOKENIZER: &str = "porter";

/// Default BM25 weight for a column that declares none.
const DEFAULT_RANK: f64 = 1.0;

// ============================================================================
// Error Types
// ============================================================================

/// A declaration that cannot compile to a usable schema.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("table {0} declares no columns")]
    EmptyTable(String),

    #[error("table {table} declares column {column} more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("index {index} on {table} references unknown column {column}")]
    UnknownIndexColumn {
        table: String,
        index: String,
        column: String,
    },

    #[error("schema declares {0} more than once")]
    DuplicateTable(String),
}

// ============================================================================
// Columns and Indexes
// ============================================================================

/// SQLite storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A single column declaration.
///
/// Columns are nullable and unranked until the builder methods say otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    /// BM25 weight when the column belongs to a [`VirtualTable`].
    pub rank: Option<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            unique: false,
            primary_key: false,
            rank: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn rank(mut self, weight: f64) -> Self {
        self.rank = Some(weight);
        self
    }

    fn definition(&self) -> String {
        let mut def = format!("{} {}", self.name, self.ty);
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if self.unique {
            def.push_str(" UNIQUE");
        }
        def
    }
}

/// A secondary index over one or more columns of its table.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Index {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unique: true,
            ..Self::new(name, columns)
        }
    }
}

// ============================================================================
// Tables
// ============================================================================

/// A regular table declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Compile to one `CREATE TABLE` followed by one statement per index.
    ///
    /// The `PRIMARY KEY` clause is emitted only when at least one column is
    /// flagged, listing the flagged columns in declaration order.
    pub fn ddl(&self) -> Vec<String> {
        let mut defs: Vec<String> = self.columns.iter().map(Column::definition).collect();

        let primary: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect();
        if !primary.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", primary.join(", ")));
        }

        let mut statements = Vec::with_capacity(1 + self.indexes.len());
        statements.push(format!("CREATE TABLE {} ({})", self.name, defs.join(", ")));

        for index in &self.indexes {
            statements.push(format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                index.name,
                self.name,
                index.columns.join(", ")
            ));
        }

        statements
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.columns.is_empty() {
            return Err(SchemaError::EmptyTable(self.name.clone()));
        }
        let names = unique_column_names(&self.name, &self.columns)?;
        for index in &self.indexes {
            if let Some(missing) = index.columns.iter().find(|c| !names.contains(c.as_str())) {
                return Err(SchemaError::UnknownIndexColumn {
                    table: self.name.clone(),
                    index: index.name.clone(),
                    column: missing.clone(),
                });
            }
        }
        Ok(())
    }
}

/// An FTS5 virtual table declaration.
///
/// Column types and constraint flags are ignored by FTS5; only the names and
/// rank weights reach the compiled statements.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualTable {
    pub name: String,
    pub columns: Vec<Column>,
}

impl VirtualTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// BM25 weight vector in column order.
    pub fn rank_weights(&self) -> Vec<f64> {
        self.columns
            .iter()
            .map(|c| c.rank.unwrap_or(DEFAULT_RANK))
            .collect()
    }

    /// Compile to the `CREATE VIRTUAL TABLE` statement and the statement that
    /// installs the weighted `bm25` ranking as the table's default `rank`.
    pub fn ddl(&self) -> Vec<String> {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let weights: Vec<String> = self
            .rank_weights()
            .into_iter()
            .map(|w| format!("{w:?}"))
            .collect();

        vec![
            format!(
                "CREATE VIRTUAL TABLE {} USING fts5({}, tokenize = {})",
                self.name,
                names.join(", "),
                FTS_TOKENIZER
            ),
            format!(
                "INSERT INTO {name}({name}, rank) VALUES('rank', 'bm25({})')",
                weights.join(", "),
                name = self.name
            ),
        ]
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.columns.is_empty() {
            return Err(SchemaError::EmptyTable(self.name.clone()));
        }
        unique_column_names(&self.name, &self.columns).map(|_| ())
    }
}

fn unique_column_names<'a>(
    table: &str,
    columns: &'a [Column],
) -> Result<HashSet<&'a str>, SchemaError> {
    let mut names = HashSet::with_capacity(columns.len());
    for column in columns {
        if !names.insert(column.name.as_str()) {
            return Err(SchemaError::DuplicateColumn {
                table: table.to_string(),
                column: column.name.clone(),
            });
        }
    }
    Ok(names)
}

// ============================================================================
// Schema
// ============================================================================

/// The complete set of tables a store is created with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub virtual_tables: Vec<VirtualTable>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    #[must_use]
    pub fn virtual_table(mut self, table: VirtualTable) -> Self {
        self.virtual_tables.push(table);
        self
    }

    /// Every statement needed to create the schema: regular tables first, then
    /// virtual tables, each in declaration order.
    pub fn statements(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(Table::ddl)
            .chain(self.virtual_tables.iter().flat_map(VirtualTable::ddl))
            .collect()
    }

    /// Hex SHA-256 of the compiled statements.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for statement in self.statements() {
            hasher.update(statement.as_bytes());
            hasher.update(b";\n");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Names of every regular table, in declaration order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }
        for table in &self.virtual_tables {
            table.validate()?;
            if !seen.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }
        Ok(())
    }
}

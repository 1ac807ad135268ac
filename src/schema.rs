//! # Column Descriptors
//!
//! A table is described once, statically, as a list of [`ColumnDef`]s:
//!
//! ```rust
//! use sqlbridge::schema::{ColumnDef, ConflictPolicy, FkAction, ForeignKey};
//! use sqlbridge::SqlType;
//!
//! static ORDER_COLUMNS: [ColumnDef; 3] = [
//!     ColumnDef::identity("id"),
//!     ColumnDef::new("customer", SqlType::Integer)
//!         .not_null(ConflictPolicy::Abort)
//!         .references(ForeignKey::new("customers", "id").on_delete(FkAction::Cascade)),
//!     ColumnDef::new("code", SqlType::Text).unique(ConflictPolicy::Fail),
//! ];
//!
//! let ddl = sqlbridge::schema::create_table_sql("orders", &ORDER_COLUMNS)?;
//! assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS orders (id INTEGER PRIMARY KEY"));
//! # Ok::<(), sqlbridge::Error>(())
//! ```
//!
//! The descriptors name columns for the clause builder, fix the bind order
//! for the table adapter, and produce the table's DDL.

use std::fmt::Write as _;

use crate::clause::{validate_column, validate_table};
use crate::error::{Error, Result};
use crate::value::SqlType;

// =============================================================================
// Constraint Policies
// =============================================================================

/// Conflict resolution for UNIQUE and NOT NULL constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Rollback,
    Abort,
    Fail,
    Ignore,
    Replace,
}

impl ConflictPolicy {
    fn sql(self) -> &'static str {
        match self {
            ConflictPolicy::Rollback => "ROLLBACK",
            ConflictPolicy::Abort => "ABORT",
            ConflictPolicy::Fail => "FAIL",
            ConflictPolicy::Ignore => "IGNORE",
            ConflictPolicy::Replace => "REPLACE",
        }
    }
}

/// Foreign key action on delete / update of the referenced row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkAction {
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl FkAction {
    fn sql(self) -> &'static str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Restrict => "RESTRICT",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
            FkAction::Cascade => "CASCADE",
        }
    }
}

/// Reference to a column in another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

impl ForeignKey {
    pub const fn new(table: &'static str, column: &'static str) -> Self {
        Self {
            table,
            column,
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        }
    }

    pub const fn on_delete(mut self, action: FkAction) -> Self {
        self.on_delete = action;
        self
    }

    pub const fn on_update(mut self, action: FkAction) -> Self {
        self.on_update = action;
        self
    }
}

// =============================================================================
// Column Descriptor
// =============================================================================

/// Static description of one column.
///
/// All builders are `const fn`, so descriptor lists can live in `static`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    /// `INTEGER PRIMARY KEY`: an alias for the rowid.
    pub identity: bool,
    pub unique: Option<ConflictPolicy>,
    pub not_null: Option<ConflictPolicy>,
    pub foreign_key: Option<ForeignKey>,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            identity: false,
            unique: None,
            not_null: None,
            foreign_key: None,
        }
    }

    /// An `INTEGER PRIMARY KEY` identity column.
    pub const fn identity(name: &'static str) -> Self {
        let mut def = Self::new(name, SqlType::Integer);
        def.identity = true;
        def
    }

    pub const fn unique(mut self, policy: ConflictPolicy) -> Self {
        self.unique = Some(policy);
        self
    }

    pub const fn not_null(mut self, policy: ConflictPolicy) -> Self {
        self.not_null = Some(policy);
        self
    }

    pub const fn references(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_key = Some(foreign_key);
        self
    }

    /// Column definition as it appears inside CREATE TABLE.
    pub fn to_sql(&self) -> String {
        let mut sql = self.name.to_string();
        let ty = self.sql_type.as_sql();
        if !ty.is_empty() {
            let _ = write!(sql, " {ty}");
        }
        if self.identity {
            sql.push_str(" PRIMARY KEY");
        }
        if let Some(policy) = self.not_null {
            let _ = write!(sql, " NOT NULL ON CONFLICT {}", policy.sql());
        }
        if let Some(policy) = self.unique {
            let _ = write!(sql, " UNIQUE ON CONFLICT {}", policy.sql());
        }
        if let Some(fk) = &self.foreign_key {
            let _ = write!(
                sql,
                " REFERENCES {}({}) ON DELETE {} ON UPDATE {}",
                fk.table,
                fk.column,
                fk.on_delete.sql(),
                fk.on_update.sql()
            );
        }
        sql
    }
}

/// Returns the identity column of a descriptor list, if any.
///
/// Fails when more than one column is marked as identity.
pub fn identity_column(columns: &[ColumnDef]) -> Result<Option<&ColumnDef>> {
    let mut identities = columns.iter().filter(|c| c.identity);
    let first = identities.next();
    if identities.next().is_some() {
        return Err(Error::InvalidArgument(
            "a table may have at most one identity column".into(),
        ));
    }
    Ok(first)
}

/// Checks a descriptor list: valid names, no duplicates, at most one identity.
pub fn validate_columns(table: &str, columns: &[ColumnDef]) -> Result<()> {
    validate_table(table)?;
    if columns.is_empty() {
        return Err(Error::InvalidArgument(format!("table '{table}' has no columns")));
    }
    for (i, column) in columns.iter().enumerate() {
        validate_column(column.name)?;
        if column.name.contains('.') {
            return Err(Error::InvalidArgument(format!(
                "column '{}' must not be qualified",
                column.name
            )));
        }
        if columns[..i]
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(column.name))
        {
            return Err(Error::InvalidArgument(format!(
                "duplicate column '{}' in table '{table}'",
                column.name
            )));
        }
        if let Some(fk) = &column.foreign_key {
            validate_table(fk.table)?;
            validate_column(fk.column)?;
        }
    }
    identity_column(columns)?;
    Ok(())
}

/// `CREATE TABLE IF NOT EXISTS` statement for a descriptor list.
pub fn create_table_sql(table: &str, columns: &[ColumnDef]) -> Result<String> {
    validate_columns(table, columns)?;
    let body = columns
        .iter()
        .map(ColumnDef::to_sql)
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("CREATE TABLE IF NOT EXISTS {table} ({body})"))
}

// =============================================================================
// Tests
// =============================================================================

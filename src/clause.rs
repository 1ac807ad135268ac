//! # Clause Builder
//!
//! Turns column/value pairs into SQL text with numbered placeholders and an
//! ordered list of values to bind.
//!
//! ```text
//!  WhereClause                                   SQL text
//!  ───────────                                   ────────
//!  ("i", >,  50)      ──► i > ?1
//!  ("s", IS NULL)     ──► s IS NULL              (no placeholder)
//!  ("t", =,  "Ho")    ──► t = ?2
//!
//!  bind order: ?1 ← 50, ?2 ← "Ho"
//! ```
//!
//! ## Ordering Invariant
//!
//! Entries keep insertion order. SQL generation and binding walk the same
//! entry list, and both skip NULL / NOT-NULL entries, so placeholder `?n`
//! always receives the n-th non-NULL value that was added.
//!
//! ## Identifiers
//!
//! Table and column names are written into the SQL text as-is, so they must
//! be plain identifiers (optionally `table.column`). Anything else is an
//! [`Error::InvalidArgument`] before the engine is involved. A well-formed
//! but unknown column fails when the statement is prepared.

use std::fmt::{self, Write as _};

use crate::connection::Database;
use crate::error::{Error, Result};
use crate::statement::Statement;
use crate::value::{ToValue, Value, ValuePool, ValueSlot};

// =============================================================================
// Operators and Ordering
// =============================================================================

/// Comparison operator for a where-clause entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    #[default]
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    IsNull,
    IsNotNull,
}

impl Op {
    /// SQL spelling of the operator.
    pub fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
        }
    }

    /// NULL / NOT-NULL sentinels carry no value and no placeholder.
    pub fn takes_value(self) -> bool {
        !matches!(self, Op::IsNull | Op::IsNotNull)
    }
}

/// Sort direction for ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

// =============================================================================
// Row Reference
// =============================================================================

/// Identifies one row: table name plus rowid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowRef {
    pub table: String,
    pub rowid: i64,
}

impl RowRef {
    pub fn new(table: impl Into<String>, rowid: i64) -> Self {
        Self {
            table: table.into(),
            rowid,
        }
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.rowid)
    }
}

// =============================================================================
// Identifier Validation
// =============================================================================

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks a table name: non-empty plain identifier.
pub(crate) fn validate_table(table: &str) -> Result<()> {
    if table.is_empty() {
        return Err(Error::InvalidArgument("empty table name".into()));
    }
    if !is_identifier(table) {
        return Err(Error::InvalidArgument(format!("invalid table name '{table}'")));
    }
    Ok(())
}

/// Checks a column name: identifier or `table.column`.
pub(crate) fn validate_column(column: &str) -> Result<()> {
    if column.is_empty() {
        return Err(Error::InvalidArgument("empty column name".into()));
    }
    if !column.split('.').all(is_identifier) || column.split('.').count() > 2 {
        return Err(Error::InvalidArgument(format!("invalid column name '{column}'")));
    }
    Ok(())
}

// =============================================================================
// Shared Base
// =============================================================================

/// One column/operator/value entry.
#[derive(Debug, Clone)]
struct Entry {
    column: String,
    op: Op,
    slot: ValueSlot,
}

impl Entry {
    fn has_placeholder(&self) -> bool {
        !self.slot.is_null()
    }
}

/// Ordered entries plus the pool holding their values.
#[derive(Debug, Clone, Default)]
struct Clause {
    entries: Vec<Entry>,
    pool: ValuePool,
}

impl Clause {
    fn push(&mut self, column: &str, op: Op, value: Value) {
        let slot = if op.takes_value() {
            self.pool.push(value)
        } else {
            ValueSlot::Null
        };
        self.entries.push(Entry {
            column: column.to_string(),
            op,
            slot,
        });
    }

    fn remove(&mut self, column: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.column != column);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.compact();
        }
        removed
    }

    /// Rebuilds the pool so it holds only the values of remaining entries.
    fn compact(&mut self) {
        let mut pool = ValuePool::new();
        for entry in &mut self.entries {
            entry.slot = pool.push(self.pool.get(entry.slot));
        }
        self.pool = pool;
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.pool.clear();
    }

    fn placeholder_count(&self) -> usize {
        self.entries.iter().filter(|e| e.has_placeholder()).count()
    }

    fn values(&self) -> Vec<Value> {
        self.entries
            .iter()
            .filter(|e| e.has_placeholder())
            .map(|e| self.pool.get(e.slot))
            .collect()
    }

    fn validate_columns(&self) -> Result<()> {
        self.entries.iter().try_for_each(|e| validate_column(&e.column))
    }

    /// Binds values to `?1..?n` in entry order, skipping NULL entries.
    fn bind(&self, stmt: &mut Statement<'_>) -> Result<()> {
        let mut position = 1;
        for entry in self.entries.iter().filter(|e| e.has_placeholder()) {
            stmt.bind(position, &self.pool.get(entry.slot))?;
            position += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Value Clause (INSERT / UPDATE)
// =============================================================================

/// Column/value pairs for INSERT and UPDATE.
///
/// Adding a column that is already present replaces its earlier value.
/// An explicit NULL is written as the literal `NULL`; a column that was
/// never added is left out of the statement entirely.
///
/// ```rust
/// use sqlbridge::ValueClause;
///
/// let mut values = ValueClause::new();
/// values.add("i", 84).add("s", "Ho").add_null("note");
///
/// assert_eq!(
///     values.to_insert_sql("items")?,
///     "INSERT INTO items (i, s, note) VALUES (?1, ?2, NULL)"
/// );
/// assert_eq!(
///     values.to_update_sql("items", 7)?,
///     "UPDATE items SET i = ?1, s = ?2, note = NULL WHERE rowid = 7"
/// );
/// # Ok::<(), sqlbridge::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValueClause {
    base: Clause,
}

impl ValueClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `column` to `value`. `None` values become explicit NULLs.
    pub fn add<V: ToValue>(&mut self, column: &str, value: V) -> &mut Self {
        self.base.remove(column);
        self.base.push(column, Op::Eq, value.to_value());
        self
    }

    /// Sets `column` to NULL.
    pub fn add_null(&mut self, column: &str) -> &mut Self {
        self.add(column, Value::Null)
    }

    /// Removes `column`. Returns true if it was present.
    pub fn remove(&mut self, column: &str) -> bool {
        self.base.remove(column) > 0
    }

    pub fn clear(&mut self) {
        self.base.clear();
    }

    pub fn len(&self) -> usize {
        self.base.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.entries.is_empty()
    }

    /// Number of `?n` placeholders the generated SQL contains.
    pub fn placeholder_count(&self) -> usize {
        self.base.placeholder_count()
    }

    /// Values to bind, in placeholder order.
    pub fn values(&self) -> Vec<Value> {
        self.base.values()
    }

    /// `INSERT INTO table (cols…) VALUES (?1, NULL, …)`.
    ///
    /// An empty clause inserts a row of defaults.
    pub fn to_insert_sql(&self, table: &str) -> Result<String> {
        validate_table(table)?;
        self.base.validate_columns()?;

        if self.is_empty() {
            return Ok(format!("INSERT INTO {table} DEFAULT VALUES"));
        }

        let mut columns = String::new();
        let mut values = String::new();
        let mut position = 1;
        for (i, entry) in self.base.entries.iter().enumerate() {
            if i > 0 {
                columns.push_str(", ");
                values.push_str(", ");
            }
            columns.push_str(&entry.column);
            if entry.has_placeholder() {
                let _ = write!(values, "?{position}");
                position += 1;
            } else {
                values.push_str("NULL");
            }
        }
        Ok(format!("INSERT INTO {table} ({columns}) VALUES ({values})"))
    }

    /// `UPDATE table SET col = ?1, … WHERE rowid = <row_id>`.
    pub fn to_update_sql(&self, table: &str, row_id: i64) -> Result<String> {
        validate_table(table)?;
        self.base.validate_columns()?;
        if self.is_empty() {
            return Err(Error::InvalidArgument(
                "update requires at least one column".into(),
            ));
        }

        let mut sql = format!("UPDATE {table} SET ");
        let mut position = 1;
        for (i, entry) in self.base.entries.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            if entry.has_placeholder() {
                let _ = write!(sql, "{} = ?{position}", entry.column);
                position += 1;
            } else {
                let _ = write!(sql, "{} = NULL", entry.column);
            }
        }
        let _ = write!(sql, " WHERE rowid = {row_id}");
        Ok(sql)
    }

    /// Binds this clause's values to `stmt` in placeholder order.
    pub fn bind(&self, stmt: &mut Statement<'_>) -> Result<()> {
        self.base.bind(stmt)
    }

    /// Inserts a row and returns a reference to it.
    pub fn insert(&self, db: &Database, table: &str) -> Result<RowRef> {
        let sql = self.to_insert_sql(table)?;
        let mut stmt = db.prepare(&sql)?;
        self.bind(&mut stmt)?;
        stmt.execute()?;
        Ok(RowRef::new(table, db.last_insert_rowid()))
    }

    /// Updates the referenced row. Returns the number of rows changed.
    pub fn update(&self, db: &Database, row: &RowRef) -> Result<usize> {
        let sql = self.to_update_sql(&row.table, row.rowid)?;
        let mut stmt = db.prepare(&sql)?;
        self.bind(&mut stmt)?;
        stmt.execute()
    }
}

// =============================================================================
// Where Clause (SELECT / COUNT / DELETE)
// =============================================================================

/// Conjunctive filter with optional ORDER BY and LIMIT.
///
/// # Empty Clauses
///
/// An empty clause is rejected for SELECT and DELETE, but a count over an
/// empty clause counts the whole table:
///
/// ```rust
/// use sqlbridge::{Error, WhereClause};
///
/// let empty = WhereClause::new();
/// assert_eq!(empty.to_select_sql("items", true)?, "SELECT COUNT(*) FROM items");
/// assert!(matches!(
///     empty.to_select_sql("items", false),
///     Err(Error::InvalidArgument(_))
/// ));
/// # Ok::<(), sqlbridge::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct WhereClause {
    base: Clause,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `column = value`.
    pub fn add<V: ToValue>(&mut self, column: &str, value: V) -> &mut Self {
        self.add_op(column, Op::Eq, value)
    }

    /// Adds `column <op> value`.
    ///
    /// A NULL value with `Eq` or `Ne` becomes `IS NULL` / `IS NOT NULL`,
    /// since `= NULL` never matches anything.
    pub fn add_op<V: ToValue>(&mut self, column: &str, op: Op, value: V) -> &mut Self {
        let value = value.to_value();
        let op = match (op, value.is_null()) {
            (Op::Eq, true) => Op::IsNull,
            (Op::Ne, true) => Op::IsNotNull,
            (op, _) => op,
        };
        self.base.push(column, op, value);
        self
    }

    /// Adds `column IS NULL`.
    pub fn is_null(&mut self, column: &str) -> &mut Self {
        self.base.push(column, Op::IsNull, Value::Null);
        self
    }

    /// Adds `column IS NOT NULL`.
    pub fn is_not_null(&mut self, column: &str) -> &mut Self {
        self.base.push(column, Op::IsNotNull, Value::Null);
        self
    }

    /// Appends an ORDER BY term.
    pub fn order_by(&mut self, column: &str, order: Order) -> &mut Self {
        self.order_by.push((column.to_string(), order));
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// The LIMIT set on this clause, if any.
    pub fn row_limit(&self) -> Option<u64> {
        self.limit
    }

    /// Removes every condition on `column`. Returns how many were removed.
    pub fn remove(&mut self, column: &str) -> usize {
        self.base.remove(column)
    }

    /// Removes all conditions, ordering and limit.
    pub fn clear(&mut self) {
        self.base.clear();
        self.order_by.clear();
        self.limit = None;
    }

    /// Number of conditions.
    pub fn len(&self) -> usize {
        self.base.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.entries.is_empty()
    }

    pub fn placeholder_count(&self) -> usize {
        self.base.placeholder_count()
    }

    pub fn values(&self) -> Vec<Value> {
        self.base.values()
    }

    /// The condition text after `WHERE`, e.g. `i > ?1 AND s IS NULL`.
    pub fn to_condition_sql(&self) -> Result<String> {
        if self.is_empty() {
            return Err(Error::InvalidArgument("empty where clause".into()));
        }
        self.base.validate_columns()?;

        let mut sql = String::new();
        let mut position = 1;
        for (i, entry) in self.base.entries.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            if entry.op.takes_value() {
                if !entry.has_placeholder() {
                    return Err(Error::InvalidArgument(format!(
                        "operator {} on column '{}' cannot compare against NULL",
                        entry.op.sql(),
                        entry.column
                    )));
                }
                let _ = write!(sql, "{} {} ?{position}", entry.column, entry.op.sql());
                position += 1;
            } else {
                let _ = write!(sql, "{} {}", entry.column, entry.op.sql());
            }
        }
        Ok(sql)
    }

    /// The ORDER BY / LIMIT suffix, with a leading space, or empty.
    pub fn to_modifier_sql(&self) -> Result<String> {
        let mut sql = String::new();
        for (i, (column, order)) in self.order_by.iter().enumerate() {
            validate_column(column)?;
            sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            let _ = write!(sql, "{column} {}", order.sql());
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        Ok(sql)
    }

    /// `SELECT rowid …` or, with `count_only`, `SELECT COUNT(*) …`.
    ///
    /// Counts ignore ORDER BY and LIMIT. An empty clause is only valid
    /// with `count_only`, where it counts the whole table.
    pub fn to_select_sql(&self, table: &str, count_only: bool) -> Result<String> {
        validate_table(table)?;
        if count_only {
            if self.is_empty() {
                return Ok(format!("SELECT COUNT(*) FROM {table}"));
            }
            return Ok(format!(
                "SELECT COUNT(*) FROM {table} WHERE {}",
                self.to_condition_sql()?
            ));
        }
        Ok(format!(
            "SELECT rowid FROM {table} WHERE {}{}",
            self.to_condition_sql()?,
            self.to_modifier_sql()?
        ))
    }

    /// `DELETE FROM table WHERE …`. Rejects an empty clause.
    pub fn to_delete_sql(&self, table: &str) -> Result<String> {
        validate_table(table)?;
        Ok(format!("DELETE FROM {table} WHERE {}", self.to_condition_sql()?))
    }

    /// Binds this clause's values to `stmt` in placeholder order.
    pub fn bind(&self, stmt: &mut Statement<'_>) -> Result<()> {
        self.base.bind(stmt)
    }

    /// Rowids of matching rows.
    pub fn select(&self, db: &Database, table: &str) -> Result<Vec<RowRef>> {
        let sql = self.to_select_sql(table, false)?;
        let mut stmt = db.prepare(&sql)?;
        self.bind(&mut stmt)?;

        let mut rows = Vec::new();
        while stmt.next_row()? {
            rows.push(RowRef::new(table, stmt.get(0)?));
        }
        Ok(rows)
    }

    /// Number of matching rows.
    pub fn count(&self, db: &Database, table: &str) -> Result<i64> {
        let sql = self.to_select_sql(table, true)?;
        let mut stmt = db.prepare(&sql)?;
        self.bind(&mut stmt)?;
        if !stmt.next_row()? {
            return Err(Error::NoData);
        }
        stmt.get(0)
    }

    /// Deletes matching rows. Returns the number deleted.
    pub fn delete(&self, db: &Database, table: &str) -> Result<usize> {
        let sql = self.to_delete_sql(table)?;
        let mut stmt = db.prepare(&sql)?;
        self.bind(&mut stmt)?;
        stmt.execute()
    }
}

// =============================================================================
// Tests
// =============================================================================
